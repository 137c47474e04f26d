use crate::store::StoreError;
use shared::error::InitializationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MainError {
    #[error("failed to initialize channel processor: {0}")]
    Initialization(#[from] InitializationError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error(transparent)]
    Consume(#[from] ConsumeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("intake buffer closed before the consumer stopped")]
    IntakeClosed,
}

/// A delivery body that could not be decoded. The whole delivery is dropped
/// with no side effects.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed uplink payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure while processing a single gateway observation. Siblings in the
/// same delivery and subsequent deliveries continue.
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("identity resolution failed: {0}")]
    Resolution(#[source] StoreError),
    #[error("occurrence record failed: {0}")]
    Record(#[source] StoreError),
}
