//! Background reconciliation
//!
//! - [`ResyncWorker`]: debounced on-demand reconciliation after publishes
//! - [`ReconcileLoop`]: periodic reconciliation while this replica leads

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gantry_common::{Result, SYSTEM_OPERATOR};
use gantry_etcd::LeadershipHandle;
use metrics::counter;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info};

use crate::reconcile::SyncOutcome;
use crate::service::GatewayRuntime;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    /// Upper bound of the random delay added to every periodic tick.
    pub jitter_max: Duration,
    pub debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter_max: Duration::from_secs(300),
            debounce: Duration::from_millis(1000),
        }
    }
}

impl SyncSettings {
    /// Interval plus a jitter drawn from `1..=jitter_max` seconds.
    pub fn next_delay(&self) -> Duration {
        let max = self.jitter_max.as_secs();
        if max == 0 {
            return self.interval;
        }
        self.interval + Duration::from_secs(rand::rng().random_range(1..=max))
    }
}

/// Submits gateways for a background re-sync.
#[derive(Clone, Debug)]
pub struct ResyncHandle {
    tx: Option<mpsc::UnboundedSender<i64>>,
}

impl ResyncHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle that drops every request.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Fire and forget; never fails the caller.
    pub fn request(&self, gateway_id: i64) {
        if let Some(tx) = &self.tx
            && tx.send(gateway_id).is_err()
        {
            debug!(gateway_id, "Re-sync worker is gone, request dropped");
        }
    }
}

async fn reconcile_gateway(runtime: &GatewayRuntime, gateway_id: i64) -> Result<SyncOutcome> {
    let scope = runtime
        .scope(gateway_id, SYSTEM_OPERATOR, ResyncHandle::disabled())
        .await?;
    scope.reconciler().sync().await
}

pub struct ResyncWorker;

impl ResyncWorker {
    /// Coalesces requests per gateway within `debounce` and reconciles each
    /// gateway once its window closes. Runs until shutdown.
    pub fn spawn(
        runtime: Arc<GatewayRuntime>,
        debounce: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> ResyncHandle {
        let (handle, mut rx) = ResyncHandle::channel();

        tokio::spawn(async move {
            let mut pending: HashMap<i64, Instant> = HashMap::new();
            loop {
                let next_due = pending.values().min().copied();
                let wait_due = async {
                    match next_due {
                        Some(due) => sleep_until(due).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Re-sync worker shutting down");
                        break;
                    }
                    request = rx.recv() => match request {
                        Some(gateway_id) => {
                            pending.entry(gateway_id).or_insert_with(|| Instant::now() + debounce);
                        }
                        None => break,
                    },
                    _ = wait_due => {
                        let now = Instant::now();
                        let due: Vec<i64> = pending
                            .iter()
                            .filter(|(_, deadline)| **deadline <= now)
                            .map(|(id, _)| *id)
                            .collect();
                        for gateway_id in due {
                            pending.remove(&gateway_id);
                            match reconcile_gateway(&runtime, gateway_id).await {
                                Ok(outcome) => debug!(gateway_id, ?outcome, "Post-publish re-sync finished"),
                                Err(e) => {
                                    counter!("gantry_resync_failures_total").increment(1);
                                    error!(gateway_id, error = %e, "Post-publish re-sync failed");
                                }
                            }
                        }
                    }
                }
            }
        });

        handle
    }
}

pub struct ReconcileLoop;

impl ReconcileLoop {
    /// Periodically reconciles one gateway while `leadership` says so.
    pub fn spawn(
        runtime: Arc<GatewayRuntime>,
        gateway_id: i64,
        mut leadership: LeadershipHandle,
        settings: SyncSettings,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if !leadership.is_leader() {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        leading = leadership.wait_for_leadership() => {
                            if !leading {
                                info!(gateway_id, "Leader elector stopped, reconcile loop exits");
                                break;
                            }
                            info!(gateway_id, "Became leader, starting periodic reconciliation");
                        }
                    }
                    continue;
                }

                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = sleep(settings.next_delay()) => {}
                }
                if !leadership.is_leader() {
                    continue;
                }

                counter!("gantry_reconcile_runs_total").increment(1);
                match reconcile_gateway(&runtime, gateway_id).await {
                    Ok(outcome) => debug!(gateway_id, ?outcome, "Periodic reconciliation finished"),
                    Err(e) => {
                        counter!("gantry_reconcile_failures_total").increment(1);
                        error!(gateway_id, error = %e, "Periodic reconciliation failed");
                    }
                }
            }
            info!(gateway_id, "Reconcile loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_next_delay_bounds() {
        let settings = SyncSettings {
            interval: Duration::from_secs(10),
            jitter_max: Duration::from_secs(3),
            debounce: Duration::from_millis(10),
        };
        for _ in 0..50 {
            let delay = settings.next_delay();
            assert!(delay >= Duration::from_secs(11) && delay <= Duration::from_secs(13));
        }
        let no_jitter = SyncSettings {
            jitter_max: Duration::ZERO,
            ..settings
        };
        assert_eq!(no_jitter.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_disabled_handle_drops_requests() {
        ResyncHandle::disabled().request(1);
        let (handle, mut rx) = ResyncHandle::channel();
        handle.request(7);
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_worker_reconciles_after_debounce() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1","uri":"/a"}"#);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = ResyncWorker::spawn(fx.runtime(), Duration::from_millis(1000), shutdown_rx);

        handle.request(fx.gateway.id);
        handle.request(fx.gateway.id);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.persistence.sync_write_count(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.persistence.sync_write_count(), 1);
        let _ = shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_loop_waits_for_leadership() {
        let fx = Fixture::new().await;
        fx.etcd.seed("/apisix/routes/r1", r#"{"id":"r1","uri":"/a"}"#);
        let (switch, leadership) = LeadershipHandle::manual(false);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let settings = SyncSettings {
            interval: Duration::from_secs(60),
            jitter_max: Duration::ZERO,
            debounce: Duration::from_millis(10),
        };
        let task = ReconcileLoop::spawn(fx.runtime(), fx.gateway.id, leadership, settings, shutdown_rx);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fx.persistence.sync_write_count(), 0);

        switch.set(true);
        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.persistence.sync_write_count(), 1);

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }
}
