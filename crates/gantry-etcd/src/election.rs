//! Per-gateway leader election.
//!
//! Only the replica holding a gateway's election key runs that gateway's
//! periodic reconciliation. Leadership is observed through a
//! [`LeadershipHandle`], a watch channel flipped by the elector task.

use std::time::Duration;

use etcd_client::{Client, LeaderKey, ResignOptions};
use gantry_common::Result;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use crate::client::etcd_error;

/// Read side of a leadership flag.
#[derive(Clone, Debug)]
pub struct LeadershipHandle {
    rx: watch::Receiver<bool>,
}

impl LeadershipHandle {
    /// A replica that always leads, for single-instance deployments.
    pub fn always() -> Self {
        let (_, rx) = watch::channel(true);
        Self { rx }
    }

    /// A handle whose flag is driven manually.
    pub fn manual(initial: bool) -> (LeadershipSwitch, Self) {
        let (tx, rx) = watch::channel(initial);
        (LeadershipSwitch { tx }, Self { rx })
    }

    pub fn is_leader(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once this replica leads. Returns `false` if the elector is gone
    /// while following.
    pub async fn wait_for_leadership(&mut self) -> bool {
        loop {
            if *self.rx.borrow_and_update() {
                return true;
            }
            if self.rx.changed().await.is_err() {
                return *self.rx.borrow();
            }
        }
    }
}

/// Write side of a manual [`LeadershipHandle`].
#[derive(Debug)]
pub struct LeadershipSwitch {
    tx: watch::Sender<bool>,
}

impl LeadershipSwitch {
    pub fn set(&self, leader: bool) {
        self.tx.send_replace(leader);
    }
}

#[derive(Debug, Clone)]
pub struct ElectionOptions {
    /// Lease TTL in seconds.
    pub lease_ttl: i64,
    pub retry_delay: Duration,
}

impl Default for ElectionOptions {
    fn default() -> Self {
        Self {
            lease_ttl: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

enum Exit {
    Shutdown,
    LeaseLost,
}

/// Campaigns on `{gateway}-leader-election` with a keep-alive lease.
pub struct EtcdLeaderElector {
    client: Client,
    election: String,
    instance_id: String,
    options: ElectionOptions,
}

impl EtcdLeaderElector {
    pub fn new(
        client: Client,
        gateway_name: &str,
        instance_id: impl Into<String>,
        options: ElectionOptions,
    ) -> Self {
        Self {
            client,
            election: format!("{}-leader-election", gateway_name),
            instance_id: instance_id.into(),
            options,
        }
    }

    pub fn election_name(&self) -> &str {
        &self.election
    }

    /// Runs the election until shutdown, re-campaigning after any loss.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> LeadershipHandle {
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                let result = self.hold(&tx, &mut shutdown).await;
                tx.send_replace(false);
                match result {
                    Ok(Exit::Shutdown) => {
                        info!("Leader election {} stopped", self.election);
                        return;
                    }
                    Ok(Exit::LeaseLost) => {
                        warn!("Lost leadership of {}, campaigning again", self.election);
                    }
                    Err(e) => {
                        error!("Leader election {} failed: {}", self.election, e);
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.options.retry_delay) => {}
                    _ = shutdown.recv() => return,
                }
            }
        });

        LeadershipHandle { rx }
    }

    async fn hold(
        &self,
        tx: &watch::Sender<bool>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Exit> {
        let mut lease_client = self.client.lease_client();
        let lease_id = lease_client
            .grant(self.options.lease_ttl, None)
            .await
            .map_err(|e| etcd_error("lease grant", e))?
            .id();
        let (mut keeper, mut responses) = lease_client
            .keep_alive(lease_id)
            .await
            .map_err(|e| etcd_error("lease keep-alive", e))?;
        let mut ticker =
            tokio::time::interval(Duration::from_secs((self.options.lease_ttl / 3).max(1) as u64));
        let mut election = self.client.election_client();

        let leader: Option<LeaderKey> = {
            let campaign =
                election.campaign(self.election.as_str(), self.instance_id.as_str(), lease_id);
            tokio::pin!(campaign);
            loop {
                tokio::select! {
                    resp = &mut campaign => {
                        break resp.map_err(|e| etcd_error("campaign", e))?.leader().cloned();
                    }
                    _ = ticker.tick() => {
                        keeper.keep_alive().await.map_err(|e| etcd_error("lease keep-alive", e))?;
                        responses.message().await.map_err(|e| etcd_error("lease keep-alive", e))?;
                    }
                    _ = shutdown.recv() => {
                        let _ = lease_client.revoke(lease_id).await;
                        return Ok(Exit::Shutdown);
                    }
                }
            }
        };

        info!("{} is now leader of {}", self.instance_id, self.election);
        tx.send_replace(true);

        let exit = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    keeper.keep_alive().await.map_err(|e| etcd_error("lease keep-alive", e))?;
                    match responses.message().await {
                        Ok(Some(resp)) if resp.ttl() > 0 => {}
                        Ok(_) => break Exit::LeaseLost,
                        Err(e) => return Err(etcd_error("lease keep-alive", e)),
                    }
                }
                _ = shutdown.recv() => break Exit::Shutdown,
            }
        };

        tx.send_replace(false);
        if let Exit::Shutdown = exit {
            if let Some(key) = leader {
                let options = ResignOptions::new().with_leader(key);
                if let Err(e) = election.resign(Some(options)).await {
                    warn!("Failed to resign {}: {}", self.election, e);
                }
            }
            let _ = lease_client.revoke(lease_id).await;
        }
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_leader() {
        let mut handle = LeadershipHandle::always();
        assert!(handle.is_leader());
        assert!(handle.wait_for_leadership().await);
    }

    #[tokio::test]
    async fn test_manual_switch() {
        let (switch, mut handle) = LeadershipHandle::manual(false);
        assert!(!handle.is_leader());

        let waiter = tokio::spawn(async move { handle.wait_for_leadership().await });
        switch.set(true);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_switch_while_following() {
        let (switch, mut handle) = LeadershipHandle::manual(false);
        drop(switch);
        assert!(!handle.wait_for_leadership().await);
    }
}
