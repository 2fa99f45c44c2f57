use std::collections::HashMap;
use std::sync::Arc;

use shopassist_core::domain::catalog::CatalogEntry;
use shopassist_core::domain::features::{FeatureProfile, Taxonomy};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::oracles::ClassificationOracle;
use crate::retry::RetryPolicy;

/// Cache key: BLAKE3 digest of the description text.
pub type DescriptionKey = blake3::Hash;

pub fn description_key(description: &str) -> DescriptionKey {
    blake3::hash(description.as_bytes())
}

/// Derives ordinal feature profiles from catalog descriptions through the
/// classification oracle, memoized by description content.
///
/// Clones share the cache and the concurrency limit.
#[derive(Clone)]
pub struct FeatureDeriver {
    oracle: Arc<dyn ClassificationOracle>,
    taxonomy: Arc<Taxonomy>,
    retry: RetryPolicy,
    cache: Arc<RwLock<HashMap<DescriptionKey, FeatureProfile>>>,
    limiter: Arc<Semaphore>,
}

impl FeatureDeriver {
    pub fn new(
        oracle: Arc<dyn ClassificationOracle>,
        taxonomy: Taxonomy,
        retry: RetryPolicy,
        max_concurrency: usize,
    ) -> Self {
        Self {
            oracle,
            taxonomy: Arc::new(taxonomy),
            retry,
            cache: Arc::new(RwLock::new(HashMap::new())),
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub async fn cached(&self, description: &str) -> Option<FeatureProfile> {
        self.cache.read().await.get(&description_key(description)).cloned()
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Profile for one entry. Oracle failure yields the unclassified profile,
    /// which is returned but not cached.
    pub async fn derive(&self, entry: &CatalogEntry) -> FeatureProfile {
        self.derive_description(&entry.description).await
    }

    /// Profiles for `entries`, in the same order. One oracle call is made per
    /// distinct uncached description, at most `max_concurrency` at a time.
    pub async fn derive_many(&self, entries: &[CatalogEntry]) -> Vec<FeatureProfile> {
        let mut resolved: HashMap<DescriptionKey, FeatureProfile> = HashMap::new();
        let mut pending: Vec<(DescriptionKey, String)> = Vec::new();

        {
            let cache = self.cache.read().await;
            for entry in entries {
                let key = description_key(&entry.description);
                if resolved.contains_key(&key) || pending.iter().any(|(seen, _)| *seen == key) {
                    continue;
                }
                match cache.get(&key) {
                    Some(profile) => {
                        resolved.insert(key, profile.clone());
                    }
                    None => pending.push((key, entry.description.clone())),
                }
            }
        }

        debug!(
            event_name = "features.derive_many.start",
            entries = entries.len(),
            cache_hits = resolved.len(),
            pending = pending.len(),
            "deriving catalog features"
        );

        let mut tasks = JoinSet::new();
        for (key, description) in pending {
            let deriver = self.clone();
            tasks.spawn(async move {
                let profile = deriver.derive_description(&description).await;
                (key, profile)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, profile)) => {
                    resolved.insert(key, profile);
                }
                Err(error) => warn!(
                    event_name = "features.derive_many.task_failed",
                    error = %error,
                    "feature derivation task failed; entry stays unclassified"
                ),
            }
        }

        entries
            .iter()
            .map(|entry| {
                resolved.get(&description_key(&entry.description)).cloned().unwrap_or_default()
            })
            .collect()
    }

    async fn derive_description(&self, description: &str) -> FeatureProfile {
        let key = description_key(description);
        if let Some(profile) = self.cache.read().await.get(&key) {
            return profile.clone();
        }

        let result = {
            let _permit = match self.limiter.acquire().await {
                Ok(permit) => permit,
                Err(_) => return FeatureProfile::unclassified(),
            };
            let oracle = &self.oracle;
            let taxonomy = self.taxonomy.as_ref();
            self.retry.run("classification", move || oracle.classify(description, taxonomy)).await
        };

        match result {
            Ok(record) => {
                let profile = FeatureProfile::from_record(&record);
                if profile.is_unclassified() {
                    warn!(
                        event_name = "features.unclassified",
                        key = %key.to_hex(),
                        "classifier returned no usable levels"
                    );
                    return profile;
                }
                self.cache.write().await.entry(key).or_insert_with(|| profile.clone()).clone()
            }
            Err(error) => {
                warn!(
                    event_name = "features.oracle_failed",
                    key = %key.to_hex(),
                    error = %error,
                    "classification failed; entry left unclassified"
                );
                FeatureProfile::unclassified()
            }
        }
    }
}
