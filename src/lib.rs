//! # a3s-relay
//!
//! Two-peer session pairing and low-latency message relay for live game sessions.
//!
//! ## Overview
//!
//! A host opens a session and receives a short numeric code; a client joins
//! with that code; from then on every payload one side sends is forwarded,
//! untouched and in order, to the other. Host departure ends the session,
//! client departure frees the slot for a new client.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_relay::{ChannelConnection, ClientMessage, PeerLink, RelayEngine, SessionRegistry};
//!
//! # async fn example() {
//! let engine = RelayEngine::new(Arc::new(SessionRegistry::default()));
//!
//! let (conn, mut outbound) = ChannelConnection::new(true);
//! let mut host = PeerLink::new(Arc::new(conn));
//! engine.handle(&mut host, ClientMessage::CreateRoom).await;
//!
//! // ROOM_CREATED{code} is now waiting on `outbound`
//! let frame = outbound.recv().await;
//! # }
//! ```
//!
//! ## Transports
//!
//! - **WebSocket** (`/ws`): push; payloads forwarded immediately, never buffered
//! - **HTTP polling** (`/api/rooms/...`): per-direction bounded queues drained on poll
//!
//! ## Architecture
//!
//! - **CodeGenerator**: four-digit session codes, unique among active sessions
//! - **SessionRegistry**: owns the code → session map; sole mutator
//! - **RelayEngine**: per-connection state machine over the registry
//! - **PollAdapter**: polling front end over the same registry
//! - **LivenessMonitor**: ping/pong probes and idle sweep

pub mod code;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod poll;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export core types
pub use code::CodeGenerator;
pub use config::RelayConfig;
pub use connection::{ChannelConnection, Outbound, PeerConnection, PolledConnection};
pub use engine::{Binding, PeerLink, RelayEngine};
pub use error::{RelayError, Result};
pub use liveness::{LivenessMonitor, TickReport};
pub use poll::PollAdapter;
pub use registry::{Attached, DeadPeer, Detached, Evicted, SessionRegistry};
pub use session::{Delivery, SessionInfo};
pub use types::{
    AckResponse, ClientMessage, CreateResponse, HealthResponse, PollResponse, RelayStats, Role,
    ServerMessage,
};
