//! Per-user feature gating.
//!
//! The matcher only sees [`FeatureGate::is_enabled`]. [`FeatureService`] is
//! the concrete gate: it resolves a per-user override first, then falls back
//! to the global flag, which it caches in memory for a bounded time.
//!
//! ```text
//! is_enabled(user, feature)
//!   ├─ unexpired override for (user, feature)? → override.enabled
//!   ├─ flag cached and fresh?                  → flag.is_enabled()
//!   └─ fetch flag from store, cache it         → flag.is_enabled() (absent = off)
//! ```

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

/// Default lifetime of a cached flag.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Gated matching dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "BPM_MATCHING")]
    TempoMatching,
    #[serde(rename = "KEY_MATCHING")]
    KeyMatching,
}

impl Feature {
    pub const ALL: [Self; 2] = [Self::TempoMatching, Self::KeyMatching];

    /// Stable storage key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::TempoMatching => "BPM_MATCHING",
            Self::KeyMatching => "KEY_MATCHING",
        }
    }

    /// Flag definition used when seeding an empty store. Off by default.
    #[must_use]
    pub fn default_flag(self) -> FeatureFlag {
        let (name, description) = match self {
            Self::TempoMatching => ("BPM Matching", "Find tracks with compatible BPM"),
            Self::KeyMatching => ("Key Matching", "Find tracks with compatible keys"),
        };
        FeatureFlag {
            feature: self,
            name: name.to_string(),
            description: description.to_string(),
            global_enabled: true,
            default_enabled: false,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "BPM_MATCHING" | "BPM" | "TEMPO" | "TEMPO_MATCHING" => Ok(Self::TempoMatching),
            "KEY_MATCHING" | "KEY" => Ok(Self::KeyMatching),
            other => Err(anyhow!("Unknown feature: {other}. Use 'bpm' or 'key'")),
        }
    }
}

/// Global flag configuration for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub feature: Feature,
    pub name: String,
    pub description: String,
    /// Master switch; when off nobody gets the feature except through an override.
    pub global_enabled: bool,
    /// Value for users without an override.
    pub default_enabled: bool,
}

impl FeatureFlag {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.global_enabled && self.default_enabled
    }
}

/// Per-user override of a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOverride {
    pub user_id: String,
    pub feature: Feature,
    pub enabled: bool,
    /// Why the override exists.
    pub reason: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl FeatureOverride {
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// Expiry time `hours` from now, for time-limited overrides.
///
/// Errors instead of overflowing when the result cannot be represented.
pub fn expires_in_hours(hours: u64) -> Result<SystemTime> {
    hours
        .checked_mul(3600)
        .and_then(|secs| SystemTime::now().checked_add(Duration::from_secs(secs)))
        .ok_or_else(|| anyhow!("Expiry of {hours} hours is too far in the future"))
}

/// Persistence for flags and overrides.
pub trait FeatureStore: Send + Sync {
    fn get_flag(&self, feature: Feature) -> Result<Option<FeatureFlag>>;
    fn list_flags(&self) -> Result<Vec<FeatureFlag>>;
    fn put_flag(&self, flag: &FeatureFlag) -> Result<()>;
    fn get_override(&self, user_id: &str, feature: Feature) -> Result<Option<FeatureOverride>>;
    fn list_overrides(&self, user_id: &str) -> Result<Vec<FeatureOverride>>;
    fn put_override(&self, feature_override: &FeatureOverride) -> Result<()>;
    fn delete_override(&self, user_id: &str, feature: Feature) -> Result<()>;
}

impl<S: FeatureStore + ?Sized> FeatureStore for std::sync::Arc<S> {
    fn get_flag(&self, feature: Feature) -> Result<Option<FeatureFlag>> {
        (**self).get_flag(feature)
    }
    fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
        (**self).list_flags()
    }
    fn put_flag(&self, flag: &FeatureFlag) -> Result<()> {
        (**self).put_flag(flag)
    }
    fn get_override(&self, user_id: &str, feature: Feature) -> Result<Option<FeatureOverride>> {
        (**self).get_override(user_id, feature)
    }
    fn list_overrides(&self, user_id: &str) -> Result<Vec<FeatureOverride>> {
        (**self).list_overrides(user_id)
    }
    fn put_override(&self, feature_override: &FeatureOverride) -> Result<()> {
        (**self).put_override(feature_override)
    }
    fn delete_override(&self, user_id: &str, feature: Feature) -> Result<()> {
        (**self).delete_override(user_id, feature)
    }
}

/// Boolean capability check consumed by the matcher.
pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self, user_id: &str, feature: Feature) -> Result<bool>;
}

impl<G: FeatureGate + ?Sized> FeatureGate for std::sync::Arc<G> {
    fn is_enabled(&self, user_id: &str, feature: Feature) -> Result<bool> {
        (**self).is_enabled(user_id, feature)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    flag: Option<FeatureFlag>,
    fetched_at: Instant,
}

/// Time-bounded in-memory cache of flags, keyed by feature.
#[derive(Debug)]
pub struct FlagCache {
    entries: RwLock<HashMap<Feature, CacheEntry>>,
    ttl: Duration,
}

impl FlagCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fresh cached value. The outer `None` means "miss or expired"; the
    /// inner one means the flag is known not to exist.
    #[allow(clippy::option_option)]
    fn get(&self, feature: Feature) -> Option<Option<FeatureFlag>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&feature)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.flag.clone())
    }

    fn insert(&self, feature: Feature, flag: Option<FeatureFlag>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            feature,
            CacheEntry {
                flag,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Flag + override resolution backed by a [`FeatureStore`].
pub struct FeatureService<S> {
    store: S,
    cache: FlagCache,
}

impl<S: FeatureStore> FeatureService<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_cache_ttl(store, DEFAULT_CACHE_TTL)
    }

    #[must_use]
    pub fn with_cache_ttl(store: S, ttl: Duration) -> Self {
        Self {
            store,
            cache: FlagCache::new(ttl),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drop every cached flag; the next lookup goes to the store.
    pub fn invalidate_cache(&self) {
        debug!("Invalidating feature flag cache");
        self.cache.clear();
    }

    fn flag(&self, feature: Feature) -> Result<Option<FeatureFlag>> {
        if let Some(cached) = self.cache.get(feature) {
            return Ok(cached);
        }

        let flag = self
            .store
            .get_flag(feature)
            .with_context(|| format!("Failed to load feature flag {feature}"))?;
        self.cache.insert(feature, flag.clone());
        Ok(flag)
    }

    /// Unexpired override for `(user_id, feature)`. Expired ones are removed
    /// on sight.
    fn active_override(&self, user_id: &str, feature: Feature) -> Result<Option<FeatureOverride>> {
        let Some(found) = self
            .store
            .get_override(user_id, feature)
            .with_context(|| format!("Failed to load {feature} override for user '{user_id}'"))?
        else {
            return Ok(None);
        };

        if found.is_expired(SystemTime::now()) {
            debug!("Override of {feature} for '{user_id}' expired, removing");
            if let Err(e) = self.store.delete_override(user_id, feature) {
                warn!("Failed to remove expired {feature} override for '{user_id}': {e:#}");
            }
            return Ok(None);
        }

        Ok(Some(found))
    }

    /// Effective value of every known flag for `user_id`.
    pub fn user_features(&self, user_id: &str) -> Result<Vec<(FeatureFlag, bool)>> {
        let now = SystemTime::now();
        let overrides: HashMap<Feature, bool> = self
            .store
            .list_overrides(user_id)
            .context("Failed to list feature overrides")?
            .into_iter()
            .filter(|o| !o.is_expired(now))
            .map(|o| (o.feature, o.enabled))
            .collect();

        Ok(self
            .store
            .list_flags()
            .context("Failed to list feature flags")?
            .into_iter()
            .map(|flag| {
                let enabled = overrides
                    .get(&flag.feature)
                    .copied()
                    .unwrap_or_else(|| flag.is_enabled());
                (flag, enabled)
            })
            .collect())
    }

    pub fn set_flag(&self, flag: &FeatureFlag) -> Result<()> {
        self.store
            .put_flag(flag)
            .with_context(|| format!("Failed to store feature flag {}", flag.feature))?;
        self.invalidate_cache();
        Ok(())
    }

    pub fn set_override(
        &self,
        user_id: &str,
        feature: Feature,
        enabled: bool,
        reason: Option<String>,
        expires_at: Option<SystemTime>,
    ) -> Result<()> {
        info!("Setting {feature} override for '{user_id}' to {enabled}");
        self.store.put_override(&FeatureOverride {
            user_id: user_id.to_string(),
            feature,
            enabled,
            reason,
            expires_at,
        })
    }

    pub fn remove_override(&self, user_id: &str, feature: Feature) -> Result<()> {
        info!("Removing {feature} override for '{user_id}'");
        self.store.delete_override(user_id, feature)
    }

    /// Write the default (disabled) flag for every feature missing from the store.
    pub fn seed_defaults(&self) -> Result<()> {
        for feature in Feature::ALL {
            if self.store.get_flag(feature)?.is_none() {
                debug!("Seeding default flag for {feature}");
                self.store.put_flag(&feature.default_flag())?;
            }
        }
        self.invalidate_cache();
        Ok(())
    }
}

impl<S: FeatureStore> FeatureGate for FeatureService<S> {
    fn is_enabled(&self, user_id: &str, feature: Feature) -> Result<bool> {
        if let Some(found) = self.active_override(user_id, feature)? {
            return Ok(found.enabled);
        }

        Ok(self.flag(feature)?.is_some_and(|flag| flag.is_enabled()))
    }
}
