use gantry_common::GatewayInfo;

/// Who is acting on which gateway; passed to every entry point.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub gateway: GatewayInfo,
    pub operator: String,
}

impl GatewayContext {
    pub fn new(gateway: GatewayInfo, operator: impl Into<String>) -> Self {
        Self {
            gateway,
            operator: operator.into(),
        }
    }

    pub fn gateway_id(&self) -> i64 {
        self.gateway.id
    }
}
