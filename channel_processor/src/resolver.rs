use crate::store::{ChannelStore, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Memoizing lookup-or-create for (network, gateway) identities.
///
/// The cache key equals the store's natural key, so repeated observations of
/// one gateway cost a single store round-trip regardless of which antenna
/// reported them. Concurrent first touches of the same key are not
/// serialized; both callers may take the miss path, which is safe because
/// the store's create is idempotent per natural key.
pub struct IdentityResolver<S> {
    store: Arc<S>,
    cache: RwLock<HashMap<(String, String), i64>>,
}

impl<S: ChannelStore> IdentityResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, network: &str, gateway_id: &str) -> Result<i64, StoreError> {
        let key = (network.to_string(), gateway_id.to_string());
        if let Some(id) = self.cache.read().get(&key) {
            return Ok(*id);
        }

        let identity = match self.store.find_gateway(network, gateway_id).await? {
            Some(identity) => identity,
            None => {
                debug!(network, gateway_id, "gateway not seen before, creating");
                self.store.create_gateway(network, gateway_id).await?
            }
        };

        self.cache.write().insert(key, identity.id);
        Ok(identity.id)
    }
}

/// Memoizing lookup-or-create for frequencies, keyed by Hertz.
pub struct FrequencyResolver<S> {
    store: Arc<S>,
    cache: RwLock<HashMap<u64, i64>>,
}

impl<S: ChannelStore> FrequencyResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, hertz: u64) -> Result<i64, StoreError> {
        if let Some(id) = self.cache.read().get(&hertz) {
            return Ok(*id);
        }

        let identity = match self.store.find_frequency(hertz).await? {
            Some(identity) => identity,
            None => {
                debug!(hertz, "frequency not seen before, creating");
                self.store.create_frequency(hertz).await?
            }
        };

        self.cache.write().insert(hertz, identity.id);
        Ok(identity.id)
    }
}
