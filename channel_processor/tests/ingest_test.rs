use async_trait::async_trait;
use channel_processor::database::models::{FrequencyIdentity, GatewayIdentity};
use channel_processor::pipeline::ChannelPipeline;
use channel_processor::resolver::IdentityResolver;
use channel_processor::store::{ChannelStore, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory `ChannelStore` with the same observable semantics as the
/// Postgres implementation: create is idempotent per natural key and the
/// occurrence upsert increments the counter while keeping the latest
/// timestamp.
#[derive(Default)]
struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Gateway id whose resolution should fail, to simulate a store error
    /// for a single observation.
    fail_gateway: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    gateways: Vec<GatewayIdentity>,
    frequencies: Vec<FrequencyIdentity>,
    pairs: HashMap<(i64, i64), (i64, DateTime<Utc>)>,
    record_log: Vec<(i64, i64, DateTime<Utc>)>,
    next_id: i64,
    find_gateway_calls: usize,
    create_gateway_calls: usize,
    find_frequency_calls: usize,
    create_frequency_calls: usize,
}

impl MemoryStore {
    fn failing_for(gateway_id: &str) -> Self {
        Self {
            fail_gateway: Some(gateway_id.to_string()),
            ..Self::default()
        }
    }

    fn check_gateway(&self, gateway_id: &str) -> Result<(), StoreError> {
        match &self.fail_gateway {
            Some(bad) if bad == gateway_id => Err(StoreError::Unavailable("injected failure")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn find_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<Option<GatewayIdentity>, StoreError> {
        self.check_gateway(gateway_id)?;
        // Widen the first-touch race window between concurrent resolvers.
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.find_gateway_calls += 1;
        Ok(state
            .gateways
            .iter()
            .find(|g| g.network == network && g.gateway_id == gateway_id)
            .cloned())
    }

    async fn create_gateway(
        &self,
        network: &str,
        gateway_id: &str,
    ) -> Result<GatewayIdentity, StoreError> {
        self.check_gateway(gateway_id)?;
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.create_gateway_calls += 1;
        if let Some(existing) = state
            .gateways
            .iter()
            .find(|g| g.network == network && g.gateway_id == gateway_id)
        {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let identity = GatewayIdentity {
            id: state.next_id,
            network: network.to_string(),
            gateway_id: gateway_id.to_string(),
        };
        state.gateways.push(identity.clone());
        Ok(identity)
    }

    async fn find_frequency(&self, hertz: u64) -> Result<Option<FrequencyIdentity>, StoreError> {
        let mut state = self.state.lock();
        state.find_frequency_calls += 1;
        let hertz = i64::try_from(hertz).map_err(|_| StoreError::FrequencyOutOfRange(hertz))?;
        Ok(state.frequencies.iter().find(|f| f.hertz == hertz).cloned())
    }

    async fn create_frequency(&self, hertz: u64) -> Result<FrequencyIdentity, StoreError> {
        let mut state = self.state.lock();
        state.create_frequency_calls += 1;
        let hertz = i64::try_from(hertz).map_err(|_| StoreError::FrequencyOutOfRange(hertz))?;
        if let Some(existing) = state.frequencies.iter().find(|f| f.hertz == hertz) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let identity = FrequencyIdentity {
            id: state.next_id,
            hertz,
        };
        state.frequencies.push(identity.clone());
        Ok(identity)
    }

    async fn record_occurrence(
        &self,
        gateway_identity_id: i64,
        frequency_identity_id: i64,
        heard_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .record_log
            .push((gateway_identity_id, frequency_identity_id, heard_at));
        state
            .pairs
            .entry((gateway_identity_id, frequency_identity_id))
            .and_modify(|(count, last_heard)| {
                *count += 1;
                *last_heard = (*last_heard).max(heard_at);
            })
            .or_insert((1, heard_at));
        Ok(())
    }
}

fn pipeline_over(store: Arc<MemoryStore>) -> ChannelPipeline<MemoryStore> {
    ChannelPipeline::new(store, Arc::new(RwLock::new(None)))
}

fn uplink(time: i64, frequency: u64, gateway_ids: &[&str]) -> Vec<u8> {
    let gateways = gateway_ids
        .iter()
        .map(|id| format!(r#"{{"gateway_id":"{id}","antenna_index":0}}"#))
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"time":{time},"frequency":{frequency},"gateways":[{gateways}]}}"#).into_bytes()
}

#[tokio::test]
async fn processes_each_gateway_entry() {
    let store = Arc::new(MemoryStore::default());
    let pipeline = pipeline_over(Arc::clone(&store));

    let payload = uplink(1000, 868_100_000, &["gw1", "gw2", "gw3"]);
    pipeline.handle_delivery(&payload).await.unwrap();

    let state = store.state.lock();
    assert_eq!(state.record_log.len(), 3);
    assert_eq!(state.gateways.len(), 3);
    assert_eq!(state.frequencies.len(), 1);
}

#[tokio::test]
async fn reference_delivery_processed_twice_counts_two() {
    let store = Arc::new(MemoryStore::default());
    let pipeline = pipeline_over(Arc::clone(&store));

    let payload =
        br#"{"time":1000,"frequency":868100000,"gateways":[{"gateway_id":"gw1","antenna_index":0}]}"#;
    pipeline.handle_delivery(payload).await.unwrap();
    pipeline.handle_delivery(payload).await.unwrap();

    let state = store.state.lock();
    assert_eq!(state.gateways.len(), 1);
    assert_eq!(state.gateways[0].network, "thethingsnetwork.org");
    assert_eq!(state.gateways[0].gateway_id, "gw1");
    assert_eq!(state.frequencies.len(), 1);
    assert_eq!(state.frequencies[0].hertz, 868_100_000);

    let (count, last_heard) = state.pairs[&(state.gateways[0].id, state.frequencies[0].id)];
    assert_eq!(count, 2);
    assert_eq!(last_heard, DateTime::from_timestamp_nanos(1000));

    // The second delivery was served from the resolver caches.
    assert_eq!(state.find_gateway_calls, 1);
    assert_eq!(state.create_gateway_calls, 1);
    assert_eq!(state.find_frequency_calls, 1);
    assert_eq!(state.create_frequency_calls, 1);
}

#[tokio::test]
async fn occurrences_accumulate_with_latest_timestamp() {
    let store = Arc::new(MemoryStore::default());
    let pipeline = pipeline_over(Arc::clone(&store));

    for time in [3000_i64, 1000, 5000, 2000, 4000] {
        let payload = uplink(time, 868_100_000, &["gw1"]);
        pipeline.handle_delivery(&payload).await.unwrap();
    }

    let state = store.state.lock();
    assert_eq!(state.pairs.len(), 1);
    let (count, last_heard) = *state.pairs.values().next().unwrap();
    assert_eq!(count, 5);
    assert_eq!(last_heard, DateTime::from_timestamp_nanos(5000));
}

#[tokio::test]
async fn concurrent_resolution_yields_single_identity() {
    let store = Arc::new(MemoryStore::default());
    let resolver = Arc::new(IdentityResolver::new(Arc::clone(&store)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move {
            resolver.resolve("thethingsnetwork.org", "gw-race").await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    let state = store.state.lock();
    assert_eq!(state.gateways.len(), 1, "eventual uniqueness violated");
    assert!(ids.iter().all(|id| *id == state.gateways[0].id));
}

#[tokio::test]
async fn malformed_delivery_has_no_side_effects() {
    let store = Arc::new(MemoryStore::default());
    let pipeline = pipeline_over(Arc::clone(&store));

    let payload = br#"{"time":"not-a-number","frequency":868100000,"gateways":[]}"#;
    assert!(pipeline.handle_delivery(payload).await.is_err());

    let state = store.state.lock();
    assert_eq!(state.find_gateway_calls, 0);
    assert_eq!(state.create_gateway_calls, 0);
    assert_eq!(state.find_frequency_calls, 0);
    assert!(state.record_log.is_empty());
}

#[tokio::test]
async fn store_failure_skips_only_that_observation() {
    let store = Arc::new(MemoryStore::failing_for("gw-broken"));
    let pipeline = pipeline_over(Arc::clone(&store));

    let payload = uplink(1000, 868_100_000, &["gw-broken", "gw-ok"]);
    // A per-observation store failure is not a delivery failure.
    pipeline.handle_delivery(&payload).await.unwrap();

    let state = store.state.lock();
    assert_eq!(state.record_log.len(), 1);
    assert_eq!(state.gateways.len(), 1);
    assert_eq!(state.gateways[0].gateway_id, "gw-ok");
}

#[tokio::test]
async fn run_drains_fifo_and_exits_when_intake_closes() {
    let store = Arc::new(MemoryStore::default());
    let last_processed = Arc::new(RwLock::new(None));
    let pipeline = ChannelPipeline::new(Arc::clone(&store), Arc::clone(&last_processed));

    let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
    let handle = tokio::spawn(pipeline.run(rx));

    tx.send(uplink(1000, 868_100_000, &["gw-first"]))
        .await
        .unwrap();
    tx.send(uplink(2000, 868_300_000, &["gw-second"]))
        .await
        .unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline should exit once the intake closes")
        .unwrap();

    let state = store.state.lock();
    assert_eq!(state.record_log.len(), 2);
    // FIFO: gw-first resolved before gw-second, so it got the lower id.
    let first_gateway = state
        .gateways
        .iter()
        .find(|g| g.gateway_id == "gw-first")
        .unwrap();
    let second_gateway = state
        .gateways
        .iter()
        .find(|g| g.gateway_id == "gw-second")
        .unwrap();
    assert!(first_gateway.id < second_gateway.id);
    assert_eq!(state.record_log[0].0, first_gateway.id);
    assert_eq!(state.record_log[1].0, second_gateway.id);

    assert!(last_processed.read().is_some());
}
