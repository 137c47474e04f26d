use crate::database::models::{FrequencyIdentity, GatewayIdentity};
use crate::database::queries::{
    QueryError, create_frequency_identity, create_gateway_identity, select_frequency_identity,
    select_gateway_identity, upsert_gateway_frequency,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("frequency {0} Hz does not fit the store's integer range")]
    FrequencyOutOfRange(u64),
    #[error("store unavailable: {0}")]
    Unavailable(&'static str),
}

/// The persistence seam the pipeline is written against. The store only has
/// to provide point lookup by natural key, insert-if-absent, and the atomic
/// counter upsert; everything stateful above it lives in the resolvers.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn find_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<Option<GatewayIdentity>, StoreError>;

    /// Insert-if-absent. Always returns the canonical row for the key, even
    /// when a concurrent caller created it first.
    async fn create_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<GatewayIdentity, StoreError>;

    async fn find_frequency(&self, hertz: u64) -> Result<Option<FrequencyIdentity>, StoreError>;

    async fn create_frequency(&self, hertz: u64) -> Result<FrequencyIdentity, StoreError>;

    /// Atomically create the pair with count 1 or increment its counter,
    /// refreshing the last-heard timestamp. Must be a single conditional
    /// statement on the store side, never read-then-write.
    async fn record_occurrence(
        &self,
        gateway_identity_id: i64,
        frequency_identity_id: i64,
        heard_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgChannelStore {
    pool: Pool<Postgres>,
}

impl PgChannelStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn hertz_column(hertz: u64) -> Result<i64, StoreError> {
    i64::try_from(hertz).map_err(|_| StoreError::FrequencyOutOfRange(hertz))
}

#[async_trait]
impl ChannelStore for PgChannelStore {
    async fn find_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<Option<GatewayIdentity>, StoreError> {
        Ok(select_gateway_identity(&self.pool, network, gateway_id).await?)
    }

    async fn create_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<GatewayIdentity, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(QueryError::from)?;
        Ok(create_gateway_identity(conn.as_mut(), network, gateway_id).await?)
    }

    async fn find_frequency(&self, hertz: u64) -> Result<Option<FrequencyIdentity>, StoreError> {
        Ok(select_frequency_identity(&self.pool, hertz_column(hertz)?).await?)
    }

    async fn create_frequency(&self, hertz: u64) -> Result<FrequencyIdentity, StoreError> {
        let hertz = hertz_column(hertz)?;
        let mut conn = self.pool.acquire().await.map_err(QueryError::from)?;
        Ok(create_frequency_identity(conn.as_mut(), hertz).await?)
    }

    async fn record_occurrence(
        &self,
        gateway_identity_id: i64,
        frequency_identity_id: i64,
        heard_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(upsert_gateway_frequency(
            &self.pool,
            gateway_identity_id,
            frequency_identity_id,
            heard_at,
        )
        .await?)
    }
}
