//! Reclaims connections whose client stopped heartbeating.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::connection::CloseReason;
use super::registry::ConnectionRegistry;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct LivenessSupervisor {
    registry: ConnectionRegistry,
    interval: Duration,
    deadline: Duration,
}

impl LivenessSupervisor {
    /// A connection silent for longer than `interval * grace_multiplier` is
    /// considered dead. A zero interval is raised to one millisecond.
    pub fn new(registry: ConnectionRegistry, interval: Duration, grace_multiplier: u32) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        Self {
            registry,
            interval,
            deadline: interval * grace_multiplier,
        }
    }

    /// Close and unregister every connection past its deadline at `now`.
    /// Returns how many were reclaimed.
    pub async fn sweep(&self, now: Instant) -> usize {
        let stale: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|conn| now.saturating_duration_since(conn.last_heartbeat()) > self.deadline)
            .collect();

        for conn in &stale {
            tracing::info!(
                conn_id = %conn.id,
                user_id = %conn.user_id,
                "heartbeat deadline missed, reclaiming connection"
            );
            conn.close(CloseReason::HeartbeatTimeout);
            if self.registry.remove(&conn.id).await.is_err() {
                tracing::warn!(conn_id = %conn.id, "registry stopped during liveness sweep");
            }
        }

        stale.len()
    }

    /// Sweep once per heartbeat interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // First tick fires immediately; skip it.

            loop {
                ticker.tick().await;
                let reclaimed = self.sweep(Instant::now()).await;
                if reclaimed > 0 {
                    tracing::debug!(reclaimed, "liveness sweep finished");
                }
            }
        })
    }
}
