use crate::database::models::{FrequencyIdentity, GatewayIdentity};
use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub async fn select_gateway_identity<'e, E>(
    executor: E,
    network: &str,
    gateway_id: &str,
) -> Result<Option<GatewayIdentity>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, GatewayIdentity>(
        r"
        SELECT id, network, gateway_id
        FROM gateway_identities
        WHERE network = $1 AND gateway_id = $2
        ",
    )
    .bind(network)
    .bind(gateway_id)
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

/// Insert-if-absent for a gateway identity. A concurrent insert of the same
/// natural key loses the `ON CONFLICT DO NOTHING` race and falls back to
/// selecting the canonical row, so the operation is idempotent per key.
pub async fn create_gateway_identity<'e, E>(
    executor: &mut E,
    network: &str,
    gateway_id: &str,
) -> Result<GatewayIdentity, QueryError>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    if let Some(identity) = sqlx::query_as::<_, GatewayIdentity>(
        r"
        INSERT INTO gateway_identities (network, gateway_id)
        VALUES ($1, $2)
        ON CONFLICT (network, gateway_id) DO NOTHING
        RETURNING id, network, gateway_id
        ",
    )
    .bind(network)
    .bind(gateway_id)
    .fetch_optional(&mut *executor)
    .await?
    {
        return Ok(identity);
    }

    sqlx::query_as::<_, GatewayIdentity>(
        "SELECT id, network, gateway_id FROM gateway_identities WHERE network = $1 AND gateway_id = $2",
    )
    .bind(network)
    .bind(gateway_id)
    .fetch_one(&mut *executor)
    .await
    .map_err(QueryError::from)
}

pub async fn select_frequency_identity<'e, E>(
    executor: E,
    hertz: i64,
) -> Result<Option<FrequencyIdentity>, QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, FrequencyIdentity>(
        "SELECT id, hertz FROM frequency_identities WHERE hertz = $1",
    )
    .bind(hertz)
    .fetch_optional(executor)
    .await
    .map_err(QueryError::from)
}

/// Insert-if-absent for a frequency identity; same race recovery as
/// [`create_gateway_identity`].
pub async fn create_frequency_identity<'e, E>(
    executor: &mut E,
    hertz: i64,
) -> Result<FrequencyIdentity, QueryError>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    if let Some(identity) = sqlx::query_as::<_, FrequencyIdentity>(
        r"
        INSERT INTO frequency_identities (hertz)
        VALUES ($1)
        ON CONFLICT (hertz) DO NOTHING
        RETURNING id, hertz
        ",
    )
    .bind(hertz)
    .fetch_optional(&mut *executor)
    .await?
    {
        return Ok(identity);
    }

    sqlx::query_as::<_, FrequencyIdentity>(
        "SELECT id, hertz FROM frequency_identities WHERE hertz = $1",
    )
    .bind(hertz)
    .fetch_one(&mut *executor)
    .await
    .map_err(QueryError::from)
}

/// Single conditional upsert: first occurrence of a pair inserts the row with
/// count 1, every later occurrence increments the counter. `GREATEST` keeps
/// `last_heard` at the latest observed timestamp even when deliveries arrive
/// out of order.
pub async fn upsert_gateway_frequency<'e, E>(
    executor: E,
    gateway_identity_id: i64,
    frequency_identity_id: i64,
    heard_at: DateTime<Utc>,
) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO gateway_frequencies (gateway_identity_id, frequency_identity_id, count, last_heard)
        VALUES ($1, $2, 1, $3)
        ON CONFLICT (gateway_identity_id, frequency_identity_id) DO UPDATE
        SET count      = gateway_frequencies.count + 1,
            last_heard = GREATEST(gateway_frequencies.last_heard, EXCLUDED.last_heard)
        ",
    )
    .bind(gateway_identity_id)
    .bind(frequency_identity_id)
    .bind(heard_at)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(QueryError::from)
}
