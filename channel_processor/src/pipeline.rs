use crate::error::{DecodeError, ObservationError};
use crate::metrics::{record_observation_duration, record_observation_processed};
use crate::resolver::{FrequencyResolver, IdentityResolver};
use crate::store::ChannelStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::DEFAULT_NETWORK_ID;
use shared::ttn::uplink::{GatewayReport, UplinkMessage};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

/// Drains the intake buffer and processes deliveries strictly sequentially:
/// decode, then resolve and record each gateway report in order. The
/// resolver caches and the store handle are the only state.
pub struct ChannelPipeline<S> {
    store: Arc<S>,
    identities: IdentityResolver<S>,
    frequencies: FrequencyResolver<S>,
    last_processed: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl<S: ChannelStore> ChannelPipeline<S> {
    pub fn new(store: Arc<S>, last_processed: Arc<RwLock<Option<DateTime<Utc>>>>) -> Self {
        Self {
            identities: IdentityResolver::new(Arc::clone(&store)),
            frequencies: FrequencyResolver::new(Arc::clone(&store)),
            store,
            last_processed,
        }
    }

    /// Runs until the intake sender side closes, which is how shutdown
    /// reaches the pipeline: the consumer stops feeding the buffer, buffered
    /// deliveries drain, the in-flight one finishes, and the loop exits.
    pub async fn run(self, mut intake: Receiver<Vec<u8>>) {
        info!("pipeline started");
        while let Some(payload) = intake.recv().await {
            match self.handle_delivery(&payload).await {
                Ok(()) => *self.last_processed.write() = Some(Utc::now()),
                Err(e) => warn!(error = ?e, "dropping undecodable delivery"),
            }
        }
        info!("intake closed, pipeline exiting");
    }

    /// Processes one delivery body. Decode failure drops the whole delivery
    /// with no side effects; a resolver or counter failure skips that one
    /// observation and continues with its siblings.
    pub async fn handle_delivery(&self, payload: &[u8]) -> Result<(), DecodeError> {
        let message: UplinkMessage = serde_json::from_slice(payload)?;
        let heard_at = DateTime::from_timestamp_nanos(message.time);

        for mut report in message.gateways {
            sanitize_report(&mut report, message.time);
            debug!(
                gateway_id = report.gateway_id,
                network_id = report.network_id,
                frequency = message.frequency,
                heard_at = %heard_at,
                "processing gateway observation"
            );

            if let Err(e) = self
                .process_observation(&report, message.frequency, heard_at)
                .await
            {
                warn!(
                    error = ?e,
                    gateway_id = report.gateway_id,
                    "skipping observation after store failure"
                );
            }
        }

        Ok(())
    }

    async fn process_observation(
        &self,
        report: &GatewayReport,
        frequency: u64,
        heard_at: DateTime<Utc>,
    ) -> Result<(), ObservationError> {
        let started = Instant::now();

        let gateway_identity_id = self
            .identities
            .resolve(&report.network_id, &report.gateway_id)
            .await
            .map_err(ObservationError::Resolution)?;
        let frequency_identity_id = self
            .frequencies
            .resolve(frequency)
            .await
            .map_err(ObservationError::Resolution)?;

        self.store
            .record_occurrence(gateway_identity_id, frequency_identity_id, heard_at)
            .await
            .map_err(ObservationError::Record)?;

        record_observation_processed();
        record_observation_duration(started.elapsed());
        Ok(())
    }
}

/// Applies the per-observation policy before resolution: the report carries
/// its parent message's timestamp, geolocation from live data is discarded,
/// and reports without a network fall back to the default network id.
pub fn sanitize_report(report: &mut GatewayReport, message_time: i64) {
    report.time = message_time;

    // Ignore locations obtained from live data
    report.latitude = 0.0;
    report.longitude = 0.0;
    report.altitude = 0.0;

    if report.network_id.is_empty() {
        report.network_id = DEFAULT_NETWORK_ID.to_string();
    }
}
