//! Polling transport adapter
//!
//! Request/response clients cannot hold a socket open, so each role gets a
//! `PolledConnection` whose bounded inbox is drained on every `poll`.
//! Sessions created here use `Delivery::Queued`: anything sent to a role
//! before it attaches waits in the session and is handed over on join, so a
//! host may start sending before the client arrives. Messages are delivered
//! FIFO per direction.
//!
//! When the session ends, a polled peer that was still attached receives the
//! departure notice (`HOST_LEFT` or `ROOM_CLOSED`) on its next poll, with
//! `partnerPresent: false`; later polls get `not_found`. A role that stops
//! polling for longer than the idle timeout is detached by the liveness
//! monitor.

use crate::connection::PolledConnection;
use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use crate::session::Delivery;
use crate::types::{AckResponse, CreateResponse, PollResponse, Role};
use std::sync::Arc;

/// Default per-direction queue bound
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Polling front end to the session registry
pub struct PollAdapter {
    registry: Arc<SessionRegistry>,
    capacity: usize,
}

impl PollAdapter {
    pub fn new(registry: Arc<SessionRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            capacity: capacity.max(1),
        }
    }

    fn connection(&self) -> Arc<PolledConnection> {
        Arc::new(PolledConnection::new(self.capacity))
    }

    /// Open a session with a polled host
    pub async fn create(&self) -> Result<CreateResponse> {
        let code = self
            .registry
            .open(
                Delivery::Queued {
                    capacity: self.capacity,
                },
                self.connection(),
            )
            .await?;
        Ok(CreateResponse { code })
    }

    /// Attach a polled client
    pub async fn join(&self, code: &str) -> Result<AckResponse> {
        self.registry.attach_client(code, self.connection()).await?;
        Ok(AckResponse { ok: true })
    }

    /// Queue `data` for the other role
    ///
    /// `ok` is false when `role` is not attached to the session.
    pub async fn send(&self, code: &str, role: Role, data: serde_json::Value) -> Result<AckResponse> {
        let ok = self.registry.relay(code, role, None, data).await?;
        Ok(AckResponse { ok })
    }

    /// Drain everything queued for `role`
    pub async fn poll(&self, code: &str, role: Role) -> Result<PollResponse> {
        self.registry.drain(code, role).await
    }

    /// Detach `role`; a departing host ends the session
    pub async fn leave(&self, code: &str, role: Role) -> Result<AckResponse> {
        match self.registry.detach(code, role, None).await {
            Some(_) => Ok(AckResponse { ok: true }),
            None if self.registry.contains(code).await => Ok(AckResponse { ok: false }),
            None => Err(RelayError::NotFound(code.to_string())),
        }
    }
}
