//! Gateway persistence trait

use async_trait::async_trait;
use gantry_common::GatewayInfo;

#[async_trait]
pub trait GatewayPersistence: Send + Sync {
    async fn gateway_find(&self, gateway_id: i64) -> anyhow::Result<Option<GatewayInfo>>;

    async fn gateway_find_all(&self) -> anyhow::Result<Vec<GatewayInfo>>;

    /// Create a gateway, returning its ID
    async fn gateway_create(&self, gateway: &GatewayInfo, operator: &str) -> anyhow::Result<i64>;
}
