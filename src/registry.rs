//! Session registry: the code → session map and every mutation of it
//!
//! All operations take the registry lock for their full duration, so a join
//! can never interleave with a host leave or a sweep on the same session.
//! Notifications to the remaining peer are delivered inside the same critical
//! section as the state change that causes them: a departure is announced
//! exactly once, and never for a session that has already been removed.
//!
//! Peers are identified by `(code, role)` plus, for connection-oriented
//! transports, the connection id. Passing the id makes the operation a no-op
//! when the slot has since been taken over by another connection, so a late
//! close from a connection the liveness monitor already evicted cannot detach
//! its successor. Polling transports address peers by role alone.
//!
//! A removed session whose polled peers still have unread notices leaves a
//! tombstone behind, so each of those peers can collect `HOST_LEFT` or
//! `ROOM_CLOSED` on its next poll. Tombstones are served once and otherwise
//! expire with the idle sweep.

use crate::code::CodeGenerator;
use crate::connection::PeerConnection;
use crate::error::{RelayError, Result};
use crate::session::{Delivery, PerRole, Session, SessionInfo};
use crate::types::{PollResponse, RelayStats, Role, ServerMessage};
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Outcome of a successful `attach_client`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached {
    pub code: String,
    /// Whether `PLAYER_JOINED` reached (or was queued for) the host
    pub host_notified: bool,
}

/// Outcome of a `detach`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub code: String,
    pub role: Role,
    /// Host departure removes the session
    pub session_closed: bool,
    /// Whether the remaining peer was sent `HOST_LEFT`/`PLAYER_LEFT`
    pub notified: bool,
}

/// A session removed by the relay itself (sweep, liveness, admin close)
#[derive(Debug)]
pub struct Evicted {
    pub code: String,
    /// Connections still attached at removal; already notified, not yet closed
    pub peers: Vec<Arc<dyn PeerConnection>>,
}

/// A connection detached because it failed a liveness probe
#[derive(Debug)]
pub struct DeadPeer {
    pub code: String,
    pub role: Role,
    pub conn: Arc<dyn PeerConnection>,
    pub session_closed: bool,
}

/// Polled peers of a removed session with messages still unread
struct Retired {
    peers: PerRole<Option<Arc<dyn PeerConnection>>>,
    retired_at: Instant,
}

/// Owner of all active sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    /// Only touched while `sessions` is locked
    retired: std::sync::Mutex<HashMap<String, Retired>>,
    codes: CodeGenerator,
    max_sessions: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(crate::code::CODE_SPACE)
    }
}

impl SessionRegistry {
    /// Create an empty registry holding at most `max_sessions` sessions
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            retired: std::sync::Mutex::new(HashMap::new()),
            codes: CodeGenerator::default(),
            max_sessions,
        }
    }

    fn allocate(&self, sessions: &mut HashMap<String, Session>, delivery: Delivery) -> Result<String> {
        if sessions.len() >= self.max_sessions {
            return Err(RelayError::Exhausted(format!(
                "{} active sessions",
                sessions.len()
            )));
        }
        let code = {
            let retired = self.retired();
            self.codes
                .generate(|c| sessions.contains_key(c) || retired.contains_key(c))?
        };
        sessions.insert(code.clone(), Session::new(code.clone(), delivery, Instant::now()));
        Ok(code)
    }

    fn retired(&self) -> MutexGuard<'_, HashMap<String, Retired>> {
        self.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keep the polled peers of a removed session reachable for one last poll
    fn retire<I>(&self, code: &str, peers: I)
    where
        I: IntoIterator<Item = (Role, Arc<dyn PeerConnection>)>,
    {
        let mut retired = Retired {
            peers: PerRole::default(),
            retired_at: Instant::now(),
        };
        let mut kept = 0;
        for (role, conn) in peers {
            if conn.buffered() > 0 {
                *retired.peers.get_mut(role) = Some(conn);
                kept += 1;
            }
        }
        if kept > 0 {
            self.retired().insert(code.to_string(), retired);
        }
    }

    /// Allocate a code and insert a session with both slots empty
    pub async fn create_session(&self, delivery: Delivery) -> Result<String> {
        let mut sessions = self.sessions.lock().await;
        let code = self.allocate(&mut sessions, delivery)?;
        tracing::info!(code = %code, "Session created");
        Ok(code)
    }

    /// Create a session with `host` already in the host slot
    pub async fn open(&self, delivery: Delivery, host: Arc<dyn PeerConnection>) -> Result<String> {
        let mut sessions = self.sessions.lock().await;
        let code = self.allocate(&mut sessions, delivery)?;
        if let Some(session) = sessions.get_mut(&code) {
            session.attach(Role::Host, host.clone());
        }
        tracing::info!(code = %code, conn = %host.id(), "Session created");
        Ok(code)
    }

    /// Snapshot of a session
    pub async fn get(&self, code: &str) -> Option<SessionInfo> {
        self.sessions.lock().await.get(code).map(Session::info)
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.sessions.lock().await.contains_key(code)
    }

    /// Whether `role` of `code` is held by connection `conn_id`
    pub async fn is_bound(&self, code: &str, role: Role, conn_id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(code)
            .is_some_and(|s| s.is_bound(role, conn_id))
    }

    /// Put `conn` in the host slot
    ///
    /// Rejected with `HostPresent` while another open connection holds the
    /// slot; a closed previous host is replaced.
    pub async fn attach_host(&self, code: &str, conn: Arc<dyn PeerConnection>) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(code)
            .ok_or_else(|| RelayError::NotFound(code.to_string()))?;

        if let Some(current) = session.peer(Role::Host) {
            if current.id() != conn.id() && current.is_open() {
                return Err(RelayError::HostPresent(code.to_string()));
            }
            tracing::info!(code = %code, old = %current.id(), new = %conn.id(), "Replacing closed host connection");
        }

        session.attach(Role::Host, conn);
        Ok(())
    }

    /// Put `conn` in the client slot and tell the host
    pub async fn attach_client(&self, code: &str, conn: Arc<dyn PeerConnection>) -> Result<Attached> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(code)
            .ok_or_else(|| RelayError::NotFound(code.to_string()))?;

        if session.has_peer(Role::Client) {
            return Err(RelayError::Full(code.to_string()));
        }

        let conn_id = conn.id().to_string();
        session.attach(Role::Client, conn);
        session.touch(Instant::now());
        let host_notified = session.deliver(Role::Host, ServerMessage::PlayerJoined);

        tracing::info!(code = %code, conn = %conn_id, host_notified, "Client joined");
        Ok(Attached {
            code: code.to_string(),
            host_notified,
        })
    }

    /// Forward `data` from `from` to the other role
    ///
    /// Returns whether it was delivered (or queued, for polled sessions).
    /// An absent peer is not an error: the payload is dropped.
    pub async fn relay(
        &self,
        code: &str,
        from: Role,
        conn_id: Option<&str>,
        data: serde_json::Value,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(code)
            .ok_or_else(|| RelayError::NotFound(code.to_string()))?;

        let bound = match conn_id {
            Some(id) => session.is_bound(from, id),
            None => session.has_peer(from),
        };
        if !bound {
            return Ok(false);
        }

        session.mark_seen(from, Instant::now());
        let delivered = session.deliver(from.other(), ServerMessage::Relay { data });
        if delivered {
            session.touch(Instant::now());
        } else {
            tracing::trace!(code = %code, from = %from, "Relay dropped, no peer");
        }
        Ok(delivered)
    }

    /// Clear `role`'s slot
    ///
    /// Host departure removes the session and sends `HOST_LEFT` to the client;
    /// client departure keeps the session open for a new client and sends
    /// `PLAYER_LEFT` to the host. Returns `None` if the session is gone or the
    /// slot is no longer held by `conn_id`.
    pub async fn detach(&self, code: &str, role: Role, conn_id: Option<&str>) -> Option<Detached> {
        let mut sessions = self.sessions.lock().await;
        let detached = self.detach_locked(&mut sessions, code, role, conn_id)?;
        tracing::info!(
            code = %code,
            role = %role,
            session_closed = detached.session_closed,
            notified = detached.notified,
            "Peer left"
        );
        Some(detached)
    }

    fn detach_locked(
        &self,
        sessions: &mut HashMap<String, Session>,
        code: &str,
        role: Role,
        conn_id: Option<&str>,
    ) -> Option<Detached> {
        let session = sessions.get_mut(code)?;
        let bound = match conn_id {
            Some(id) => session.is_bound(role, id),
            None => session.has_peer(role),
        };
        if !bound {
            return None;
        }

        session.take(role);
        let detached = match role {
            Role::Host => {
                let mut session = sessions.remove(code)?;
                let notified = session.deliver(Role::Client, ServerMessage::HostLeft);
                if let Some(client) = session.take(Role::Client) {
                    self.retire(code, [(Role::Client, client)]);
                }
                Detached {
                    code: code.to_string(),
                    role,
                    session_closed: true,
                    notified,
                }
            }
            Role::Client => {
                session.touch(Instant::now());
                let notified = session.deliver(Role::Host, ServerMessage::PlayerLeft);
                Detached {
                    code: code.to_string(),
                    role,
                    session_closed: false,
                    notified,
                }
            }
        };
        Some(detached)
    }

    /// Drain `role`'s polled inbox
    ///
    /// Once the session is gone, a peer that was still attached gets its
    /// final notices from one more drain; after that the code is `NotFound`.
    pub async fn drain(&self, code: &str, role: Role) -> Result<PollResponse> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(code) {
            let conn = session
                .peer(role)
                .cloned()
                .ok_or_else(|| RelayError::NotFound(format!("{code} has no {role}")))?;

            let now = Instant::now();
            session.touch(now);
            session.mark_seen(role, now);
            return Ok(PollResponse {
                messages: conn.drain(),
                partner_present: session.has_peer(role.other()),
            });
        }

        let mut retired = self.retired();
        let entry = retired
            .get_mut(code)
            .ok_or_else(|| RelayError::NotFound(code.to_string()))?;
        let conn = entry
            .peers
            .get_mut(role)
            .take()
            .ok_or_else(|| RelayError::NotFound(code.to_string()))?;
        if entry.peers.host.is_none() && entry.peers.client.is_none() {
            retired.remove(code);
        }

        tracing::debug!(code = %code, role = %role, "Final notices collected");
        Ok(PollResponse {
            messages: conn.drain(),
            partner_present: false,
        })
    }

    /// Record a liveness probe answer
    pub async fn mark_alive(&self, code: &str, role: Role, conn_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(code) {
            Some(session) if session.is_bound(role, conn_id) => {
                let now = Instant::now();
                session.set_alive(role, true);
                session.mark_seen(role, now);
                session.touch(now);
                true
            }
            _ => false,
        }
    }

    /// Run one liveness cycle
    ///
    /// Every probe-capable peer whose previous probe went unanswered, or whose
    /// transport is already closed, is detached exactly as if it had left.
    /// The rest are marked pending and probed again.
    pub async fn probe_round(&self) -> Vec<DeadPeer> {
        let mut sessions = self.sessions.lock().await;
        let mut dead = Vec::new();

        for session in sessions.values_mut() {
            for role in [Role::Host, Role::Client] {
                let Some(conn) = session.peer(role).cloned() else {
                    continue;
                };
                if !conn.supports_probe() {
                    continue;
                }
                if !session.is_alive(role) || !conn.is_open() {
                    dead.push((session.code().to_string(), role, conn));
                    continue;
                }
                session.set_alive(role, false);
                conn.probe();
            }
        }

        dead.into_iter()
            .filter_map(|(code, role, conn)| {
                let detached = self.detach_locked(&mut sessions, &code, role, Some(conn.id()))?;
                tracing::info!(code = %code, role = %role, conn = %conn.id(), "Peer failed liveness probe");
                Some(DeadPeer {
                    code,
                    role,
                    conn,
                    session_closed: detached.session_closed,
                })
            })
            .collect()
    }

    /// Detach polled peers that stopped polling
    ///
    /// A polled connection cannot answer probes, so a role that has not
    /// joined, sent or polled within `max_idle` is detached as if it had left,
    /// even while its partner keeps the session active.
    pub async fn expire_polled(&self, max_idle: Duration, now: Instant) -> Vec<DeadPeer> {
        let mut sessions = self.sessions.lock().await;
        let mut stale = Vec::new();

        for session in sessions.values() {
            for role in [Role::Host, Role::Client] {
                let Some(conn) = session.peer(role) else {
                    continue;
                };
                if conn.supports_probe() {
                    continue;
                }
                let seen = session.last_seen(role).unwrap_or(session.created_at());
                if now.saturating_duration_since(seen) > max_idle {
                    stale.push((session.code().to_string(), role, conn.clone()));
                }
            }
        }

        stale
            .into_iter()
            .filter_map(|(code, role, conn)| {
                let detached = self.detach_locked(&mut sessions, &code, role, Some(conn.id()))?;
                tracing::info!(code = %code, role = %role, conn = %conn.id(), "Polled peer stopped polling");
                Some(DeadPeer {
                    code,
                    role,
                    conn,
                    session_closed: detached.session_closed,
                })
            })
            .collect()
    }

    /// Remove every session idle for longer than `max_idle`
    ///
    /// Idle time counts from the last relayed message, join, leave, poll or
    /// probe answer, or from creation if none happened. Tombstones older than
    /// `max_idle` are dropped as well.
    pub async fn sweep_idle(&self, max_idle: Duration, now: Instant) -> Vec<Evicted> {
        let mut sessions = self.sessions.lock().await;
        self.retired()
            .retain(|_, r| now.saturating_duration_since(r.retired_at) <= max_idle);

        let expired: Vec<String> = sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.idle_since()) > max_idle)
            .map(|s| s.code().to_string())
            .collect();

        expired
            .into_iter()
            .filter_map(|code| {
                let session = sessions.remove(&code)?;
                tracing::info!(code = %code, peers = session.peer_count(), "Idle session evicted");
                Some(self.evict(session, "idle"))
            })
            .collect()
    }

    /// Administrative close of a single session
    pub async fn close(&self, code: &str, reason: &str) -> Option<Evicted> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(code)?;
        tracing::info!(code = %code, reason = %reason, "Session closed");
        Some(self.evict(session, reason))
    }

    /// Remove every session, e.g. on shutdown
    pub async fn clear(&self, reason: &str) -> Vec<Evicted> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .drain()
            .map(|(_, session)| self.evict(session, reason))
            .collect()
    }

    fn evict(&self, mut session: Session, reason: &str) -> Evicted {
        let mut departed = Vec::new();
        if let Some(client) = session.take(Role::Client) {
            client.send(ServerMessage::HostLeft);
            departed.push((Role::Client, client));
        }
        if let Some(host) = session.take(Role::Host) {
            host.send(ServerMessage::RoomClosed {
                reason: reason.to_string(),
            });
            departed.push((Role::Host, host));
        }

        let peers = departed.iter().map(|(_, conn)| conn.clone()).collect();
        self.retire(session.code(), departed);
        Evicted {
            code: session.code().to_string(),
            peers,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Active session codes, sorted
    pub async fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub async fn stats(&self) -> RelayStats {
        let sessions = self.sessions.lock().await;
        RelayStats {
            sessions: sessions.len(),
            peers: sessions.values().map(Session::peer_count).sum(),
        }
    }
}
