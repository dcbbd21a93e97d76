//! Per-provider geocode result cache. Successful lookups keep for weeks;
//! negative results expire in hours so corrections on the provider side
//! get picked up.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ridewatch_common::content_hash;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeCacheRecord {
    pub query: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// True for cached "provider found nothing / was ambiguous".
    pub negative: bool,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct GeocodeCache {
    dir: PathBuf,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl GeocodeCache {
    pub async fn open(
        dir: impl Into<PathBuf>,
        provider: &str,
        positive_ttl: Duration,
        negative_ttl: Duration,
    ) -> std::io::Result<Self> {
        let dir = dir.into().join("geocode").join(provider);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            positive_ttl,
            negative_ttl,
        })
    }

    fn path_for(&self, query: &str) -> PathBuf {
        self.dir
            .join(format!("{:016x}.json", content_hash(query.as_bytes())))
    }

    pub async fn get(&self, query: &str) -> Option<GeocodeCacheRecord> {
        let bytes = tokio::fs::read(self.path_for(query)).await.ok()?;
        let record: GeocodeCacheRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(query, error = %e, "corrupt geocode cache entry");
                return None;
            }
        };
        if Utc::now() >= record.expires_at {
            return None;
        }
        Some(record)
    }

    pub async fn put_positive(&self, query: &str, lat: f64, lng: f64) {
        self.put(query, Some((lat, lng)), false, self.positive_ttl)
            .await;
    }

    pub async fn put_negative(&self, query: &str) {
        self.put(query, None, true, self.negative_ttl).await;
    }

    async fn put(&self, query: &str, coords: Option<(f64, f64)>, negative: bool, ttl: Duration) {
        let record = GeocodeCacheRecord {
            query: query.to_string(),
            lat: coords.map(|c| c.0),
            lng: coords.map(|c| c.1),
            negative,
            fetched_at: Utc::now(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(3)),
        };
        let Ok(bytes) = serde_json::to_vec(&record) else {
            return;
        };
        let path = self.path_for(query);
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            warn!(query, error = %e, "geocode cache write failed");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!(query, error = %e, "geocode cache rename failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache(positive_ttl: Duration, negative_ttl: Duration) -> (GeocodeCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeocodeCache::open(dir.path(), "nominatim", positive_ttl, negative_ttl)
            .await
            .unwrap();
        (cache, dir)
    }

    #[tokio::test]
    async fn positive_round_trip() {
        let (cache, _dir) = cache(Duration::from_secs(3600), Duration::from_secs(60)).await;
        cache.put_positive("sonoita, az, usa", 31.68, -110.65).await;
        let record = cache.get("sonoita, az, usa").await.unwrap();
        assert!(!record.negative);
        assert_eq!(record.lat, Some(31.68));
    }

    #[tokio::test]
    async fn negative_round_trip() {
        let (cache, _dir) = cache(Duration::from_secs(3600), Duration::from_secs(60)).await;
        cache.put_negative("nowhere at all").await;
        let record = cache.get("nowhere at all").await.unwrap();
        assert!(record.negative);
        assert_eq!(record.lat, None);
    }

    #[tokio::test]
    async fn expired_negative_misses() {
        let (cache, _dir) = cache(Duration::from_secs(3600), Duration::ZERO).await;
        cache.put_negative("nowhere").await;
        assert!(cache.get("nowhere").await.is_none());
    }

    #[tokio::test]
    async fn unknown_query_misses() {
        let (cache, _dir) = cache(Duration::from_secs(3600), Duration::from_secs(60)).await;
        assert!(cache.get("never seen").await.is_none());
    }
}
