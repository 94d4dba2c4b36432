//! Session state: two peer slots, timestamps, liveness flags
//!
//! Mutators are crate-private; only `SessionRegistry` changes a session, and
//! always under its lock. Outside the registry a session is seen through a
//! `SessionInfo` snapshot.

use crate::connection::PeerConnection;
use crate::types::{Role, ServerMessage};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// How messages reach a role whose slot is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Persistent bidirectional channel; nothing is buffered for an absent peer
    Push,
    /// Request/response polling; messages for an absent peer wait (bounded)
    /// and are handed over when that role attaches
    Queued { capacity: usize },
}

/// A value per role
#[derive(Debug, Clone, Default)]
pub struct PerRole<T> {
    pub host: T,
    pub client: T,
}

impl<T> PerRole<T> {
    pub fn get(&self, role: Role) -> &T {
        match role {
            Role::Host => &self.host,
            Role::Client => &self.client,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut T {
        match role {
            Role::Host => &mut self.host,
            Role::Client => &mut self.client,
        }
    }
}

/// A pairing context identified by a short code
pub struct Session {
    code: String,
    peers: PerRole<Option<Arc<dyn PeerConnection>>>,
    alive: PerRole<bool>,
    seen: PerRole<Option<Instant>>,
    pending: PerRole<VecDeque<ServerMessage>>,
    delivery: Delivery,
    created_at: Instant,
    last_activity_at: Option<Instant>,
}

impl Session {
    pub(crate) fn new(code: String, delivery: Delivery, now: Instant) -> Self {
        Self {
            code,
            peers: PerRole::default(),
            alive: PerRole::default(),
            seen: PerRole::default(),
            pending: PerRole::default(),
            delivery,
            created_at: now,
            last_activity_at: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    /// Reference point for idle eviction
    pub fn idle_since(&self) -> Instant {
        self.last_activity_at.unwrap_or(self.created_at)
    }

    pub fn peer(&self, role: Role) -> Option<&Arc<dyn PeerConnection>> {
        self.peers.get(role).as_ref()
    }

    pub fn has_peer(&self, role: Role) -> bool {
        self.peers.get(role).is_some()
    }

    /// Whether `role`'s slot holds the connection `conn_id`
    pub fn is_bound(&self, role: Role, conn_id: &str) -> bool {
        self.peer(role).is_some_and(|c| c.id() == conn_id)
    }

    pub fn is_alive(&self, role: Role) -> bool {
        *self.alive.get(role)
    }

    /// Last join, send, poll or probe answer from `role`
    pub fn last_seen(&self, role: Role) -> Option<Instant> {
        *self.seen.get(role)
    }

    pub fn peer_count(&self) -> usize {
        [Role::Host, Role::Client]
            .into_iter()
            .filter(|r| self.has_peer(*r))
            .count()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            code: self.code.clone(),
            host: self.peer(Role::Host).map(|c| c.id().to_string()),
            client: self.peer(Role::Client).map(|c| c.id().to_string()),
            host_alive: self.alive.host,
            client_alive: self.alive.client,
            delivery: self.delivery,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }

    /// Occupy `role`'s slot, handing over anything queued while it was empty
    pub(crate) fn attach(&mut self, role: Role, conn: Arc<dyn PeerConnection>) {
        for msg in self.pending.get_mut(role).drain(..) {
            conn.send(msg);
        }
        *self.peers.get_mut(role) = Some(conn);
        *self.alive.get_mut(role) = true;
        *self.seen.get_mut(role) = Some(Instant::now());
    }

    /// Clear `role`'s slot
    pub(crate) fn take(&mut self, role: Role) -> Option<Arc<dyn PeerConnection>> {
        *self.alive.get_mut(role) = false;
        *self.seen.get_mut(role) = None;
        self.peers.get_mut(role).take()
    }

    /// Deliver to `role`; returns whether the message went anywhere
    ///
    /// Push sessions drop messages for an absent or closed peer.
    pub(crate) fn deliver(&mut self, role: Role, msg: ServerMessage) -> bool {
        if let Some(conn) = self.peers.get(role).as_ref() {
            return conn.is_open() && conn.send(msg);
        }

        match self.delivery {
            Delivery::Push => false,
            Delivery::Queued { capacity } => {
                let queue = self.pending.get_mut(role);
                if queue.len() >= capacity.max(1) {
                    queue.pop_front();
                    tracing::warn!(code = %self.code, role = %role, "Pending queue full, dropped oldest message");
                }
                queue.push_back(msg);
                true
            }
        }
    }

    pub(crate) fn set_alive(&mut self, role: Role, alive: bool) {
        *self.alive.get_mut(role) = alive;
    }

    pub(crate) fn mark_seen(&mut self, role: Role, now: Instant) {
        *self.seen.get_mut(role) = Some(now);
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity_at = Some(now);
    }
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub code: String,
    /// Connection id in the host slot
    pub host: Option<String>,
    /// Connection id in the client slot
    pub client: Option<String>,
    pub host_alive: bool,
    pub client_alive: bool,
    pub delivery: Delivery,
    pub created_at: Instant,
    pub last_activity_at: Option<Instant>,
}
