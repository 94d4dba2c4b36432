//! Relay engine: per-connection state machine over the session registry
//!
//! Every transport connection is wrapped in a `PeerLink` that tracks its
//! binding (`Unbound → Bound(code, role) → Closed`). The transport adapter
//! feeds the link's events into the engine one at a time; the engine turns
//! them into registry operations and replies on the same connection.

use crate::code::CodeGenerator;
use crate::connection::PeerConnection;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use crate::session::Delivery;
use crate::types::{ClientMessage, RelayStats, Role, ServerMessage};
use std::sync::Arc;

/// Where a connection stands relative to the sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Not yet in a session
    Unbound,
    /// Occupies `role` of session `code`
    Bound { code: String, role: Role },
    /// Left its session (or the session went away); may create or join again
    Closed,
}

/// A transport connection and its binding
pub struct PeerLink {
    conn: Arc<dyn PeerConnection>,
    binding: Binding,
}

impl PeerLink {
    pub fn new(conn: Arc<dyn PeerConnection>) -> Self {
        Self {
            conn,
            binding: Binding::Unbound,
        }
    }

    pub fn conn(&self) -> &Arc<dyn PeerConnection> {
        &self.conn
    }

    pub fn id(&self) -> &str {
        self.conn.id()
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    fn reply(&self, msg: ServerMessage) {
        if !self.conn.send(msg) {
            tracing::debug!(conn = %self.conn.id(), "Reply dropped, connection closed");
        }
    }
}

/// Maps peer events onto the session registry
pub struct RelayEngine {
    registry: Arc<SessionRegistry>,
}

impl RelayEngine {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Decode and handle a text frame
    ///
    /// Malformed envelopes are logged and ignored; nothing is sent back.
    pub async fn handle_text(&self, link: &mut PeerLink, text: &str) {
        match ClientMessage::decode(text) {
            Ok(msg) => self.handle(link, msg).await,
            Err(e) => {
                tracing::debug!(conn = %link.id(), error = %e, "Ignoring malformed envelope");
            }
        }
    }

    /// Handle one decoded event
    pub async fn handle(&self, link: &mut PeerLink, msg: ClientMessage) {
        match msg {
            ClientMessage::CreateRoom => self.create(link).await,
            ClientMessage::JoinRoom { code } => self.join(link, code.trim()).await,
            ClientMessage::Relay { data } => self.relay(link, data).await,
            ClientMessage::Leave => self.leave(link).await,
        }
    }

    /// Whether the link may create or join; drops a binding whose session
    /// no longer holds this connection
    async fn can_bind(&self, link: &mut PeerLink) -> bool {
        let Binding::Bound { code, role } = &link.binding else {
            return true;
        };
        if self.registry.is_bound(code, *role, link.conn.id()).await {
            tracing::debug!(conn = %link.id(), code = %code, "Already bound, ignoring");
            return false;
        }
        link.binding = Binding::Closed;
        true
    }

    async fn create(&self, link: &mut PeerLink) {
        if !self.can_bind(link).await {
            return;
        }

        match self.registry.open(Delivery::Push, link.conn.clone()).await {
            Ok(code) => {
                link.binding = Binding::Bound {
                    code: code.clone(),
                    role: Role::Host,
                };
                link.reply(ServerMessage::RoomCreated { code });
            }
            Err(e) => {
                tracing::warn!(conn = %link.id(), error = %e, "Failed to create session");
                link.reply(ServerMessage::error("could not create room"));
            }
        }
    }

    async fn join(&self, link: &mut PeerLink, code: &str) {
        if !self.can_bind(link).await {
            return;
        }

        if !CodeGenerator::is_valid(code) {
            link.reply(ServerMessage::error("room not found"));
            return;
        }

        match self.registry.attach_client(code, link.conn.clone()).await {
            Ok(_) => {
                link.binding = Binding::Bound {
                    code: code.to_string(),
                    role: Role::Client,
                };
                link.reply(ServerMessage::Joined {
                    code: code.to_string(),
                });
            }
            Err(RelayError::NotFound(_)) => link.reply(ServerMessage::error("room not found")),
            Err(RelayError::Full(_)) => link.reply(ServerMessage::error("room is full")),
            Err(e) => {
                tracing::warn!(conn = %link.id(), code = %code, error = %e, "Join failed");
                link.reply(ServerMessage::error(e.to_string()));
            }
        }
    }

    async fn relay(&self, link: &mut PeerLink, data: serde_json::Value) {
        let Binding::Bound { code, role } = &link.binding else {
            return;
        };

        match self.registry.relay(code, *role, Some(link.conn.id()), data).await {
            Ok(_) => {}
            Err(_) => {
                // Session removed under us (host left, sweep, admin close)
                link.binding = Binding::Closed;
            }
        }
    }

    async fn leave(&self, link: &mut PeerLink) {
        match std::mem::replace(&mut link.binding, Binding::Closed) {
            Binding::Bound { code, role } => {
                self.registry.detach(&code, role, Some(link.conn.id())).await;
            }
            // Nothing to leave: an unbound link stays unbound
            previous => link.binding = previous,
        }
    }

    /// Record a liveness probe answer
    pub async fn pong(&self, link: &PeerLink) {
        if let Binding::Bound { code, role } = &link.binding {
            self.registry.mark_alive(code, *role, link.conn.id()).await;
        }
    }

    /// Transport-level close or error: same as `LEAVE`
    pub async fn disconnect(&self, link: &mut PeerLink) {
        self.leave(link).await;
        link.binding = Binding::Closed;
        link.conn.close();
    }

    pub async fn stats(&self) -> RelayStats {
        self.registry.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelConnection, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> RelayEngine {
        RelayEngine::new(Arc::new(SessionRegistry::default()))
    }

    fn link() -> (PeerLink, UnboundedReceiver<Outbound>) {
        let (conn, rx) = ChannelConnection::new(true);
        (PeerLink::new(Arc::new(conn)), rx)
    }

    fn recv(rx: &mut UnboundedReceiver<Outbound>) -> Option<ServerMessage> {
        match rx.try_recv().ok()? {
            Outbound::Message(msg) => Some(msg),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    async fn create(engine: &RelayEngine, host: &mut PeerLink, rx: &mut UnboundedReceiver<Outbound>) -> String {
        engine.handle(host, ClientMessage::CreateRoom).await;
        match recv(rx) {
            Some(ServerMessage::RoomCreated { code }) => code,
            other => panic!("expected ROOM_CREATED, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_binds_host() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        assert_eq!(
            host.binding(),
            &Binding::Bound {
                code: code.clone(),
                role: Role::Host
            }
        );
        assert!(engine.registry().contains(&code).await);
    }

    #[tokio::test]
    async fn test_create_twice_is_ignored() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        create(&engine, &mut host, &mut host_rx).await;

        engine.handle(&mut host, ClientMessage::CreateRoom).await;
        assert_eq!(recv(&mut host_rx), None);
        assert_eq!(engine.stats().await.sessions, 1);
    }

    #[tokio::test]
    async fn test_join_not_found() {
        let engine = engine();
        let (mut client, mut client_rx) = link();
        engine
            .handle(&mut client, ClientMessage::JoinRoom { code: "1234".into() })
            .await;

        assert_eq!(recv(&mut client_rx), Some(ServerMessage::error("room not found")));
        assert_eq!(client.binding(), &Binding::Unbound);
        assert!(engine.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_join_malformed_code() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        for bad in ["", "12", "0999", "abcd", &format!("{code}0")] {
            let (mut client, mut client_rx) = link();
            engine
                .handle(&mut client, ClientMessage::JoinRoom { code: bad.to_string() })
                .await;
            assert_eq!(recv(&mut client_rx), Some(ServerMessage::error("room not found")));
        }

        // Surrounding whitespace is tolerated
        let (mut client, mut client_rx) = link();
        engine
            .handle(&mut client, ClientMessage::JoinRoom { code: format!(" {code} ") })
            .await;
        assert_eq!(recv(&mut client_rx), Some(ServerMessage::Joined { code }));
    }

    #[tokio::test]
    async fn test_join_full() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        let (mut first, mut first_rx) = link();
        engine.handle(&mut first, ClientMessage::JoinRoom { code: code.clone() }).await;
        assert_eq!(recv(&mut first_rx), Some(ServerMessage::Joined { code: code.clone() }));

        let (mut second, mut second_rx) = link();
        engine.handle(&mut second, ClientMessage::JoinRoom { code: code.clone() }).await;
        assert_eq!(recv(&mut second_rx), Some(ServerMessage::error("room is full")));
        assert_eq!(second.binding(), &Binding::Unbound);

        let info = engine.registry().get(&code).await.unwrap();
        assert_eq!(info.client.as_deref(), Some(first.id()));
    }

    #[tokio::test]
    async fn test_unbound_events_ignored() {
        let engine = engine();
        let (mut conn, mut rx) = link();
        engine.handle(&mut conn, ClientMessage::Relay { data: json!(1) }).await;
        engine.handle(&mut conn, ClientMessage::Leave).await;
        engine.handle_text(&mut conn, "{not json").await;

        assert_eq!(recv(&mut rx), None);
        assert_eq!(conn.binding(), &Binding::Unbound);
    }

    #[tokio::test]
    async fn test_leave_twice_stays_closed() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        create(&engine, &mut host, &mut host_rx).await;

        engine.handle(&mut host, ClientMessage::Leave).await;
        assert_eq!(host.binding(), &Binding::Closed);
        engine.handle(&mut host, ClientMessage::Leave).await;
        assert_eq!(host.binding(), &Binding::Closed);
        assert!(engine.registry().is_empty().await);

        // A closed link may open a new session
        create(&engine, &mut host, &mut host_rx).await;
        assert!(matches!(host.binding(), Binding::Bound { role: Role::Host, .. }));
    }

    #[tokio::test]
    async fn test_full_scenario() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        let (mut client, mut client_rx) = link();
        engine
            .handle_text(&mut client, &format!(r#"{{"type":"JOIN_ROOM","code":"{code}"}}"#))
            .await;
        assert_eq!(recv(&mut client_rx), Some(ServerMessage::Joined { code: code.clone() }));
        assert_eq!(recv(&mut host_rx), Some(ServerMessage::PlayerJoined));

        engine.handle_text(&mut host, r#"{"type":"RELAY","data":{"x":1}}"#).await;
        assert_eq!(recv(&mut client_rx), Some(ServerMessage::Relay { data: json!({"x": 1}) }));

        engine.disconnect(&mut client).await;
        assert_eq!(client.binding(), &Binding::Closed);
        assert_eq!(recv(&mut host_rx), Some(ServerMessage::PlayerLeft));

        // Dropped silently: no error to the host
        engine.handle(&mut host, ClientMessage::Relay { data: json!({"x": 2}) }).await;
        assert_eq!(recv(&mut host_rx), None);

        engine.disconnect(&mut host).await;
        assert!(!engine.registry().contains(&code).await);
    }

    #[tokio::test]
    async fn test_message_order_preserved() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;
        let (mut client, mut client_rx) = link();
        engine.handle(&mut client, ClientMessage::JoinRoom { code }).await;
        recv(&mut client_rx);

        for i in 0..100 {
            engine.handle(&mut host, ClientMessage::Relay { data: json!(i) }).await;
        }
        for i in 0..100 {
            assert_eq!(recv(&mut client_rx), Some(ServerMessage::Relay { data: json!(i) }));
        }
    }

    #[tokio::test]
    async fn test_client_can_rejoin_after_host_left() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;
        let (mut client, mut client_rx) = link();
        engine.handle(&mut client, ClientMessage::JoinRoom { code: code.clone() }).await;
        recv(&mut client_rx);

        engine.handle(&mut host, ClientMessage::Leave).await;
        assert_eq!(recv(&mut client_rx), Some(ServerMessage::HostLeft));
        assert_eq!(recv(&mut client_rx), None);

        // The stale binding no longer blocks a fresh create
        engine.handle(&mut client, ClientMessage::CreateRoom).await;
        assert!(matches!(recv(&mut client_rx), Some(ServerMessage::RoomCreated { .. })));
    }

    #[tokio::test]
    async fn test_leave_then_join_again() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        let (mut client, mut client_rx) = link();
        engine.handle(&mut client, ClientMessage::JoinRoom { code: code.clone() }).await;
        engine.handle(&mut client, ClientMessage::Leave).await;
        assert_eq!(client.binding(), &Binding::Closed);

        let (mut next, mut next_rx) = link();
        engine.handle(&mut next, ClientMessage::JoinRoom { code: code.clone() }).await;
        assert_eq!(recv(&mut next_rx), Some(ServerMessage::Joined { code }));

        recv(&mut client_rx);
        assert_eq!(recv(&mut client_rx), None);
    }

    #[tokio::test]
    async fn test_pong_marks_alive() {
        let engine = engine();
        let (mut host, mut host_rx) = link();
        let code = create(&engine, &mut host, &mut host_rx).await;

        engine.registry().probe_round().await;
        assert!(!engine.registry().get(&code).await.unwrap().host_alive);

        engine.pong(&host).await;
        assert!(engine.registry().get(&code).await.unwrap().host_alive);
    }
}
