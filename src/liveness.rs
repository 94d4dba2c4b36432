//! Liveness monitor
//!
//! A recurring background task. Each tick:
//!
//! 1. Probes every probe-capable peer. A peer that left the previous tick's
//!    probe unanswered is detached as if it had sent `LEAVE`, and its
//!    transport is closed. The probe deadline is therefore one period.
//! 2. Sweeps sessions idle for longer than the idle timeout, notifying and
//!    closing any peers still attached.
//! 3. Detaches polled peers that have not polled within the idle timeout,
//!    so a silent client cannot hold the slot while its host keeps polling.
//!
//! The task stops when its `CancellationToken` is cancelled.

use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What one monitor tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Peers detached for failing a probe
    pub dead_peers: usize,
    /// Sessions removed by the idle sweep
    pub evicted_sessions: usize,
    /// Polled peers detached for not polling
    pub expired_peers: usize,
}

/// Periodic probe + idle sweep over a registry
pub struct LivenessMonitor {
    registry: Arc<SessionRegistry>,
    probe_interval: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<SessionRegistry>, probe_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            registry,
            probe_interval,
            idle_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Run one probe round and one idle sweep
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// `tick` with an explicit clock for the idle sweep
    pub async fn tick_at(&self, now: Instant) -> TickReport {
        let dead = self.registry.probe_round().await;
        for peer in &dead {
            peer.conn.close();
        }

        let evicted = self.registry.sweep_idle(self.idle_timeout, now).await;
        for session in &evicted {
            for conn in &session.peers {
                conn.close();
            }
        }

        let expired = self.registry.expire_polled(self.idle_timeout, now).await;
        for peer in &expired {
            peer.conn.close();
        }

        let report = TickReport {
            dead_peers: dead.len(),
            evicted_sessions: evicted.len(),
            expired_peers: expired.len(),
        };
        if report != TickReport::default() {
            tracing::info!(
                dead_peers = report.dead_peers,
                evicted_sessions = report.evicted_sessions,
                expired_peers = report.expired_peers,
                "Liveness tick"
            );
        }
        report
    }

    /// Spawn the recurring task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(
            probe_interval_secs = self.probe_interval.as_secs_f64(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "Liveness monitor started"
        );

        tokio::spawn(async move {
            let mut ticker = interval(self.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }

            tracing::info!("Liveness monitor stopped");
        })
    }

    /// Stop the recurring task
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelConnection, Outbound, PeerConnection};
    use crate::poll::PollAdapter;
    use crate::session::Delivery;
    use crate::types::{Role, ServerMessage};

    #[tokio::test]
    async fn test_unanswered_probe_detaches_on_next_tick() {
        let registry = Arc::new(SessionRegistry::default());
        let (host, mut host_rx) = ChannelConnection::new(true);
        let host: Arc<dyn PeerConnection> = Arc::new(host);
        let code = registry.open(Delivery::Push, host.clone()).await.unwrap();

        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30), Duration::from_secs(3600));

        let report = monitor.tick().await;
        assert_eq!(report, TickReport::default());
        assert_eq!(host_rx.try_recv().ok(), Some(Outbound::Ping));

        let report = monitor.tick().await;
        assert_eq!(report.dead_peers, 1);
        assert!(!registry.contains(&code).await);
        assert!(!host.is_open());
        assert_eq!(host_rx.try_recv().ok(), Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_answered_probe_keeps_peer() {
        let registry = Arc::new(SessionRegistry::default());
        let (host, _host_rx) = ChannelConnection::new(true);
        let host: Arc<dyn PeerConnection> = Arc::new(host);
        let code = registry.open(Delivery::Push, host.clone()).await.unwrap();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30), Duration::from_secs(3600));

        for _ in 0..3 {
            monitor.tick().await;
            assert!(registry.mark_alive(&code, Role::Host, host.id()).await);
        }
        assert!(registry.contains(&code).await);
    }

    #[tokio::test]
    async fn test_tick_sweeps_idle_sessions() {
        let registry = Arc::new(SessionRegistry::default());
        let (host, mut host_rx) = ChannelConnection::new(false);
        let host: Arc<dyn PeerConnection> = Arc::new(host);
        let code = registry.open(Delivery::Push, host.clone()).await.unwrap();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30), Duration::from_secs(300));

        let report = monitor.tick_at(Instant::now() + Duration::from_secs(301)).await;
        assert_eq!(report.evicted_sessions, 1);
        assert!(!registry.contains(&code).await);
        assert_eq!(
            host_rx.try_recv().ok(),
            Some(Outbound::Message(ServerMessage::RoomClosed {
                reason: "idle".to_string()
            }))
        );
        assert_eq!(host_rx.try_recv().ok(), Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_tick_expires_silent_polled_client() {
        let registry = Arc::new(SessionRegistry::default());
        let polls = PollAdapter::new(registry.clone(), 8);
        let code = polls.create().await.unwrap().code;
        polls.join(&code).await.unwrap();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30), Duration::from_millis(100));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            polls.poll(&code, Role::Host).await.unwrap();
            monitor.tick().await;
        }

        assert!(registry.contains(&code).await);
        assert!(registry.get(&code).await.unwrap().client.is_none());
        let host = polls.poll(&code, Role::Host).await.unwrap();
        assert!(!host.partner_present);
        assert!(polls.join(&code).await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_background_task_runs_and_stops() {
        let registry = Arc::new(SessionRegistry::default());
        let (host, _host_rx) = ChannelConnection::new(true);
        let code = registry.open(Delivery::Push, Arc::new(host)).await.unwrap();

        let monitor = Arc::new(LivenessMonitor::new(
            registry.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        ));
        let handle = monitor.clone().start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.contains(&code).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("silent host should be evicted");

        monitor.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor should stop")
            .unwrap();
    }
}
