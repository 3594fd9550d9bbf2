//! Outbound byte metering, per group.
//!
//! # Overview
//!
//! [`UploadGovernor`] holds one [`TokenBucket`] per configured group,
//! keyed the same way the teacher's `RateLimiter` keys its per-domain
//! state: a [`DashMap`] of name to `Arc`-wrapped state, cloned out before
//! any `.await` so no shard lock is ever held across a suspension point.
//!
//! A background task refills every bucket every 100 ms (§4.2: bucket
//! capacity is rate/10, refilled by that same amount each 100 ms tick).
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use tokio_util::sync::CancellationToken;
//! use upload_core::governor::{GovernorConfig, UploadGovernor};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut rates = HashMap::new();
//! rates.insert("Default".to_string(), 10_000);
//! let governor = UploadGovernor::new(GovernorConfig::new(rates));
//!
//! let ct = CancellationToken::new();
//! let grant = governor.get_bytes(Some("Default"), 500, &ct).await.unwrap();
//! assert!(grant <= 500);
//! # }
//! ```

mod bucket;
mod error;

pub use bucket::TokenBucket;
pub use error::GovernorError;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use bucket::SharedBucket;

/// Name every username resolves to when its real group has no configured
/// rate, per §4.2's "falling back to the Default group bucket".
pub const DEFAULT_GROUP: &str = "Default";

/// Refill interval: 100 ms of headroom per §4.2 and §9.
const REFILL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-group speed limits, in bytes/second.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Group name to speed limit in bytes/second.
    rates: HashMap<String, u64>,
}

impl GovernorConfig {
    /// Builds a config from a group-name to bytes/second map. Callers
    /// should always include an entry for [`DEFAULT_GROUP`].
    #[must_use]
    pub fn new(rates: HashMap<String, u64>) -> Self {
        Self { rates }
    }

    fn hash_digest(&self) -> u64 {
        let mut entries: Vec<_> = self.rates.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (name, rate) in entries {
            name.hash(&mut hasher);
            rate.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[derive(Debug)]
struct Buckets {
    by_group: DashMap<String, SharedBucket>,
    config_digest: u64,
}

impl Buckets {
    fn build(config: &GovernorConfig) -> Self {
        let by_group = DashMap::new();
        for (name, rate) in &config.rates {
            by_group.insert(
                name.clone(),
                Arc::new(TokenBucket::for_rate_bytes_per_sec(*rate)),
            );
        }
        Self {
            by_group,
            config_digest: config.hash_digest(),
        }
    }
}

/// Meters outbound bytes per group, refilling every bucket on a 100 ms
/// tick and exposing grants/returns to the upload service.
#[derive(Debug)]
pub struct UploadGovernor {
    buckets: Arc<RwLock<Arc<Buckets>>>,
    refill_task: JoinHandle<()>,
}

impl UploadGovernor {
    /// Builds the governor and spawns its periodic refill task.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let buckets = Arc::new(RwLock::new(Arc::new(Buckets::build(&config))));
        let refill_buckets = Arc::clone(&buckets);
        let refill_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFILL_INTERVAL);
            loop {
                interval.tick().await;
                let current = Arc::clone(&refill_buckets.read().unwrap_or_else(|poison| poison.into_inner()));
                for entry in &current.by_group {
                    entry.value().refill();
                }
            }
        });

        Self { buckets, refill_task }
    }

    fn snapshot(&self) -> Arc<Buckets> {
        Arc::clone(&self.buckets.read().unwrap_or_else(|poison| poison.into_inner()))
    }

    fn resolve_bucket(&self, group: Option<&str>) -> Result<SharedBucket, GovernorError> {
        let snapshot = self.snapshot();
        let name = group.unwrap_or(DEFAULT_GROUP);

        if let Some(bucket) = snapshot.by_group.get(name) {
            return Ok(Arc::clone(bucket.value()));
        }
        if let Some(bucket) = snapshot.by_group.get(DEFAULT_GROUP) {
            return Ok(Arc::clone(bucket.value()));
        }
        Err(GovernorError::NoBucketForGroup(group.map(str::to_string)))
    }

    /// Obtains a grant of up to `requested` bytes for `group` (falling
    /// back to [`DEFAULT_GROUP`] when `group` is `None` or unconfigured).
    /// Blocks while the bucket's balance is empty; returns `None` if `ct`
    /// fires first, consuming no tokens in that case.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::NoBucketForGroup`] if neither `group` nor
    /// the Default group has a configured bucket.
    #[instrument(skip(self, ct), fields(group = group.unwrap_or(DEFAULT_GROUP), requested))]
    pub async fn get_bytes(
        &self,
        group: Option<&str>,
        requested: u64,
        ct: &CancellationToken,
    ) -> Result<Option<u64>, GovernorError> {
        let bucket = self.resolve_bucket(group)?;
        Ok(bucket.acquire(requested, ct).await)
    }

    /// Credits back unused bytes (`max(0, granted - actual)`) to `group`'s
    /// bucket.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::NoBucketForGroup`] if neither `group` nor
    /// the Default group has a configured bucket.
    #[instrument(skip(self))]
    pub fn return_bytes(
        &self,
        group: Option<&str>,
        _attempted: u64,
        granted: u64,
        actual: u64,
    ) -> Result<(), GovernorError> {
        let bucket = self.resolve_bucket(group)?;
        bucket.return_bytes(granted, actual);
        Ok(())
    }

    /// Reconfigures the governor. If `config`'s digest is unchanged from
    /// the current one, this is a no-op. Otherwise rebuilds every bucket
    /// and atomically swaps the map in — in-flight transfers briefly reset
    /// to full capacity and any outstanding credit in the old map is lost,
    /// per §4.2.
    #[instrument(skip(self, config))]
    pub fn reconfigure(&self, config: &GovernorConfig) {
        let digest = config.hash_digest();
        if self.snapshot().config_digest == digest {
            debug!("governor config unchanged, skipping rebuild");
            return;
        }
        let rebuilt = Arc::new(Buckets::build(config));
        let mut guard = self
            .buckets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = rebuilt;
    }
}

impl Drop for UploadGovernor {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, u64)]) -> GovernorConfig {
        let rates = pairs
            .iter()
            .map(|(name, rate)| ((*name).to_string(), *rate))
            .collect();
        GovernorConfig::new(rates)
    }

    #[tokio::test]
    async fn get_bytes_falls_back_to_default_for_unknown_group() {
        let governor = UploadGovernor::new(config(&[("Default", 10_000)]));
        let ct = CancellationToken::new();
        let grant = governor
            .get_bytes(Some("Unconfigured"), 100, &ct)
            .await
            .unwrap();
        assert_eq!(grant, Some(100));
    }

    #[tokio::test]
    async fn get_bytes_none_group_uses_default() {
        let governor = UploadGovernor::new(config(&[("Default", 10_000)]));
        let ct = CancellationToken::new();
        let grant = governor.get_bytes(None, 100, &ct).await.unwrap();
        assert_eq!(grant, Some(100));
    }

    #[tokio::test]
    async fn get_bytes_partial_grant_when_balance_insufficient() {
        let governor = UploadGovernor::new(config(&[("Default", 3000)]));
        let ct = CancellationToken::new();
        // capacity = 3000/10 = 300
        let grant = governor.get_bytes(Some("Default"), 1000, &ct).await.unwrap();
        assert_eq!(grant, Some(300));
    }

    #[tokio::test]
    async fn return_bytes_credits_waste() {
        let governor = UploadGovernor::new(config(&[("Default", 3000)]));
        let ct = CancellationToken::new();
        governor.get_bytes(Some("Default"), 300, &ct).await.unwrap();
        governor.return_bytes(Some("Default"), 300, 300, 100).unwrap();
        let grant = governor.get_bytes(Some("Default"), 1000, &ct).await.unwrap();
        assert_eq!(grant, Some(200));
    }

    #[tokio::test]
    async fn reconfigure_is_noop_when_digest_unchanged() {
        let cfg = config(&[("Default", 3000)]);
        let governor = UploadGovernor::new(cfg.clone());
        let ct = CancellationToken::new();
        governor.get_bytes(Some("Default"), 100, &ct).await.unwrap();

        governor.reconfigure(&cfg);
        // balance should still be 200 (300 - 100), not reset to 300.
        let grant = governor.get_bytes(Some("Default"), 1000, &ct).await.unwrap();
        assert_eq!(grant, Some(200));
    }

    #[tokio::test]
    async fn reconfigure_rebuilds_when_digest_changes() {
        let governor = UploadGovernor::new(config(&[("Default", 3000)]));
        let ct = CancellationToken::new();
        governor.get_bytes(Some("Default"), 300, &ct).await.unwrap();

        governor.reconfigure(&config(&[("Default", 5000)]));
        let grant = governor.get_bytes(Some("Default"), 1000, &ct).await.unwrap();
        assert_eq!(grant, Some(500));
    }

    #[tokio::test]
    async fn unconfigured_group_without_default_errors() {
        let governor = UploadGovernor::new(config(&[("Privileged", 3000)]));
        let ct = CancellationToken::new();
        let result = governor.get_bytes(Some("Unknown"), 100, &ct).await;
        assert!(matches!(result, Err(GovernorError::NoBucketForGroup(_))));
    }
}
