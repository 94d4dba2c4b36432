//! Peer connection handles
//!
//! A session slot holds an `Arc<dyn PeerConnection>`. Two implementations
//! cover the two transport styles:
//!
//! - **ChannelConnection**: push transports (WebSocket). Messages go onto an
//!   unbounded channel drained by the socket writer task, so a send never
//!   waits on the peer and per-connection order is the channel order. Supports
//!   ping/pong liveness probes.
//! - **PolledConnection**: request/response polling. Messages wait in a
//!   bounded inbox until the peer polls. Never probed; a role that stops
//!   polling is detached once it has been silent past the idle timeout.

use crate::types::ServerMessage;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Handle to exactly one connected peer
pub trait PeerConnection: Send + Sync {
    /// Stable identifier (`conn-<uuid>`)
    fn id(&self) -> &str;

    /// Whether the transport is still open
    fn is_open(&self) -> bool;

    /// Deliver a message without blocking
    ///
    /// Returns `false` when the connection is closed and the message was
    /// dropped.
    fn send(&self, msg: ServerMessage) -> bool;

    /// Whether this connection answers liveness probes
    fn supports_probe(&self) -> bool {
        false
    }

    /// Send a liveness probe; returns whether one was sent
    fn probe(&self) -> bool {
        false
    }

    /// Messages buffered for a pull-style transport, oldest first
    ///
    /// Push connections deliver immediately and have nothing buffered.
    fn drain(&self) -> Vec<ServerMessage> {
        Vec::new()
    }

    /// Number of messages waiting for `drain`
    fn buffered(&self) -> usize {
        0
    }

    /// Close the transport; later sends are dropped
    fn close(&self);
}

impl fmt::Debug for dyn PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id())
            .field("open", &self.is_open())
            .finish()
    }
}

fn new_conn_id() -> String {
    format!("conn-{}", uuid::Uuid::new_v4())
}

/// Frames queued for a push transport's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Ping,
    Close,
}

/// Push connection backed by an mpsc channel
pub struct ChannelConnection {
    id: String,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
    probes: bool,
}

impl ChannelConnection {
    /// Create a connection and the receiver its writer task drains
    ///
    /// `probes` enables ping/pong liveness for this connection.
    pub fn new(probes: bool) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: new_conn_id(),
            tx,
            open: AtomicBool::new(true),
            probes,
        };
        (conn, rx)
    }
}

impl PeerConnection for ChannelConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, msg: ServerMessage) -> bool {
        self.is_open() && self.tx.send(Outbound::Message(msg)).is_ok()
    }

    fn supports_probe(&self) -> bool {
        self.probes
    }

    fn probe(&self) -> bool {
        self.probes && self.is_open() && self.tx.send(Outbound::Ping).is_ok()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Polling connection with a bounded inbox
pub struct PolledConnection {
    id: String,
    inbox: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    open: AtomicBool,
}

impl PolledConnection {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: new_conn_id(),
            inbox: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            open: AtomicBool::new(true),
        }
    }

    fn inbox(&self) -> std::sync::MutexGuard<'_, VecDeque<ServerMessage>> {
        // A panic while holding the inbox lock leaves a valid VecDeque behind
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PeerConnection for PolledConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, msg: ServerMessage) -> bool {
        if !self.is_open() {
            return false;
        }
        let mut inbox = self.inbox();
        if inbox.len() >= self.capacity {
            inbox.pop_front();
            tracing::warn!(conn = %self.id, capacity = self.capacity, "Poll inbox full, dropped oldest message");
        }
        inbox.push_back(msg);
        true
    }

    fn drain(&self) -> Vec<ServerMessage> {
        self.inbox().drain(..).collect()
    }

    fn buffered(&self) -> usize {
        self.inbox().len()
    }

    /// Stop accepting messages; whatever is already queued can still be drained
    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}
