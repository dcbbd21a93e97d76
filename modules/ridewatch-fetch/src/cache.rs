use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ridewatch_common::{content_hash, MetricsSink};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::urlnorm::cache_key_url;

/// Caller-supplied freshness predicate, e.g. "payload is non-empty HTML".
/// A failing validator evicts the entry.
pub type Validator = dyn Fn(&[u8]) -> bool + Send + Sync;

/// One cached fetch. Entries are immutable; updates are whole-entry
/// replacements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRecord {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub content_hash: u64,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

/// Content-addressed disk cache keyed by a stable hash of the canonicalized
/// URL. Metadata and payload live in sibling files; writes go through a
/// temp file + rename so readers never see a torn entry.
pub struct ContentCache {
    dir: PathBuf,
    force_refresh: bool,
    metrics: Arc<MetricsSink>,
}

impl ContentCache {
    pub async fn open(
        dir: impl Into<PathBuf>,
        force_refresh: bool,
        metrics: Arc<MetricsSink>,
    ) -> Result<Self, FetchError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FetchError::Cache(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            force_refresh,
            metrics,
        })
    }

    fn key(url: &str) -> Option<String> {
        let canonical = cache_key_url(url)?;
        Some(format!("{:016x}", content_hash(canonical.as_bytes())))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    /// Look up a fresh entry for `url`. Fresh means unexpired AND passing the
    /// validator when one is given. Expired entries miss; validator failures
    /// evict. The global force-refresh flag turns every read into a miss.
    pub async fn get(&self, url: &str, validator: Option<&Validator>) -> Option<FetchRecord> {
        if self.force_refresh {
            self.metrics.incr("cache.misses");
            return None;
        }
        let key = Self::key(url)?;
        let meta_bytes = match tokio::fs::read(self.meta_path(&key)).await {
            Ok(b) => b,
            Err(_) => {
                self.metrics.incr("cache.misses");
                return None;
            }
        };
        let mut record: FetchRecord = match serde_json::from_slice(&meta_bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "corrupt cache metadata, evicting");
                self.evict(&key).await;
                self.metrics.incr("cache.misses");
                return None;
            }
        };

        if Utc::now() >= record.expires_at {
            self.metrics.incr("cache.misses");
            return None;
        }

        record.payload = match tokio::fs::read(self.payload_path(&key)).await {
            Ok(b) => b,
            Err(_) => {
                self.evict(&key).await;
                self.metrics.incr("cache.misses");
                return None;
            }
        };

        if let Some(validate) = validator {
            if !validate(&record.payload) {
                debug!(url, "cache entry failed validator, evicting");
                self.metrics.incr("cache.validator_fails");
                self.evict(&key).await;
                self.metrics.incr("cache.misses");
                return None;
            }
        }

        self.metrics.incr("cache.hits");
        Some(record)
    }

    /// Store an entry, replacing whatever was there.
    pub async fn put(&self, record: &FetchRecord) -> Result<(), FetchError> {
        let key = Self::key(&record.url)
            .ok_or_else(|| FetchError::Cache(format!("uncacheable url: {}", record.url)))?;

        let payload_path = self.payload_path(&key);
        let payload_tmp = payload_path.with_extension("bin.tmp");
        write_atomic(&payload_tmp, &payload_path, &record.payload).await?;

        let meta = serde_json::to_vec(record)
            .map_err(|e| FetchError::Cache(format!("serialize metadata: {e}")))?;
        let meta_path = self.meta_path(&key);
        let meta_tmp = meta_path.with_extension("json.tmp");
        write_atomic(&meta_tmp, &meta_path, &meta).await?;
        Ok(())
    }

    async fn evict(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.meta_path(key)).await;
        let _ = tokio::fs::remove_file(self.payload_path(key)).await;
        self.metrics.incr("cache.evictions");
    }
}

async fn write_atomic(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    tokio::fs::write(tmp, bytes)
        .await
        .map_err(|e| FetchError::Cache(format!("write {}: {e}", tmp.display())))?;
    tokio::fs::rename(tmp, dest)
        .await
        .map_err(|e| FetchError::Cache(format!("rename to {}: {e}", dest.display())))?;
    Ok(())
}
