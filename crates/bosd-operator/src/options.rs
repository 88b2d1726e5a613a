use std::sync::Arc;
use std::time::{Duration, Instant};

use bosd_client::CallPolicy;
use bosd_domain::OptionsSnapshot;
use bosd_store::{Kind, StateStore, OPTIONS_KEY};
use tokio::sync::RwLock;
use tracing::warn;

/// How long a snapshot is served before the backing record is re-read.
/// Operators refresh once per iteration at most, so this only bounds the
/// staleness seen by short iteration loops.
const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Cached {
    at: Instant,
    snapshot: OptionsSnapshot,
}

/// Reads the mutable `options/global` record, merged over typed defaults and
/// cached briefly. Store unavailability serves the last good snapshot
/// instead of failing the iteration.
#[derive(Clone)]
pub struct OptionsProvider {
    store: Arc<dyn StateStore>,
    cache: Arc<RwLock<Option<Cached>>>,
}

impl OptionsProvider {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn snapshot(&self) -> OptionsSnapshot {
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.at.elapsed() < CACHE_TTL {
                    return cached.snapshot.clone();
                }
            }
        }

        let snapshot = match self.store.get(Kind::Options, OPTIONS_KEY).await {
            // `#[serde(default)]` on the snapshot struct merges a partial
            // stored record over the typed defaults.
            Ok(Some(value)) => match serde_json::from_value::<OptionsSnapshot>(value) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "options record is malformed, using defaults");
                    OptionsSnapshot::default()
                }
            },
            Ok(None) => OptionsSnapshot::default(),
            Err(e) => {
                let guard = self.cache.read().await;
                if let Some(cached) = guard.as_ref() {
                    warn!(error = %e, "options read failed, serving cached snapshot");
                    return cached.snapshot.clone();
                }
                warn!(error = %e, "options read failed, using defaults");
                OptionsSnapshot::default()
            }
        };

        let mut guard = self.cache.write().await;
        *guard = Some(Cached {
            at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        snapshot
    }
}

// ── Per-service call policies ─────────────────────────────────────────────────

fn policy(timeout_secs: u64, max_bytes: usize) -> CallPolicy {
    CallPolicy {
        timeout: Duration::from_secs(timeout_secs),
        max_response_bytes: max_bytes,
    }
}

/// Default response cap for services whose payloads scale with batch size,
/// not with image size.
const SERVICE_RESPONSE_CAP: usize = 8 * 1024 * 1024;

pub fn pcs_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.pcs_read_timeout_secs, SERVICE_RESPONSE_CAP)
}

pub fn hsm_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.hsm_read_timeout_secs, SERVICE_RESPONSE_CAP)
}

pub fn bss_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.bss_read_timeout_secs, SERVICE_RESPONSE_CAP)
}

pub fn ims_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.ims_read_timeout_secs, SERVICE_RESPONSE_CAP)
}

pub fn cfs_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.cfs_read_timeout_secs, SERVICE_RESPONSE_CAP)
}

/// Manifest fetches are the one place a response can be image-sized; the
/// cap is its own option.
pub fn manifest_policy(opts: &OptionsSnapshot) -> CallPolicy {
    policy(opts.ims_read_timeout_secs, opts.max_manifest_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosd_store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_record_yields_defaults() {
        let store = Arc::new(InMemoryStore::new());
        let provider = OptionsProvider::new(store);
        let snapshot = provider.snapshot().await;
        assert_eq!(snapshot, OptionsSnapshot::default());
    }

    #[tokio::test]
    async fn partial_record_merges_over_defaults() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(
                Kind::Options,
                OPTIONS_KEY,
                json!({ "default_retry_policy": 9, "reject_nids": true }),
            )
            .await
            .unwrap();

        let provider = OptionsProvider::new(store);
        let snapshot = provider.snapshot().await;
        assert_eq!(snapshot.default_retry_policy, 9);
        assert!(snapshot.reject_nids);
        // Untouched field keeps its default.
        assert_eq!(
            snapshot.polling_frequency_secs,
            OptionsSnapshot::default().polling_frequency_secs
        );
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let provider = OptionsProvider::new(store.clone());

        let first = provider.snapshot().await;
        store
            .put(Kind::Options, OPTIONS_KEY, json!({ "default_retry_policy": 42 }))
            .await
            .unwrap();
        let second = provider.snapshot().await;
        assert_eq!(first, second, "within the TTL the cached snapshot is served");
    }
}
