use chrono::{DateTime, Utc};

/// A persisted (network, gateway) identity. The surrogate id is assigned on
/// first insert and never reassigned.
#[derive(Debug, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct GatewayIdentity {
    pub id: i64,
    pub network: String,
    pub gateway_id: String,
}

/// A persisted radio frequency. Stored in Hertz.
#[derive(Debug, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct FrequencyIdentity {
    pub id: i64,
    pub hertz: i64,
}

/// Running occurrence counter for one (gateway, frequency) pair.
#[derive(Debug, sqlx::FromRow, Clone)]
pub struct GatewayFrequency {
    pub gateway_identity_id: i64,
    pub frequency_identity_id: i64,
    pub count: i64,
    pub last_heard: DateTime<Utc>,
}
