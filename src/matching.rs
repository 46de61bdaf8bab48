//! # Match Orchestrator
//!
//! Ranks a user's catalog against a source track, a target tempo or a target
//! key. Every query runs the same pipeline:
//!
//! 1. Validate arguments (nothing is looked up for a bad request)
//! 2. Resolve feature gates for the user
//! 3. Snapshot the candidate pool from the [`Catalog`]
//! 4. Score candidates in parallel on the service's rayon pool
//! 5. Drop candidates below `min_overall_score`, stable sort descending, truncate
//!
//! Scoring is pure, so the only shared state during the fan-out is the
//! [`CancelToken`]. A cancelled query returns [`MatchError::Cancelled`] and
//! never a partial list.
//!
//! ## Example
//!
//! ```no_run
//! use mixmatch::db::SqliteStore;
//! use mixmatch::features::FeatureService;
//! use mixmatch::matching::{CancelToken, MatchingConfig, MatchingService};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let gate = FeatureService::new(Arc::clone(&store));
//! let service = MatchingService::new(store, gate, MatchingConfig::default())?;
//!
//! let results = service.find_key_compatible("local", "Am", 10, &CancelToken::new())?;
//! for result in results {
//!     println!("{} {:.2}", result.track.title, result.overall_score);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::catalog::{Catalog, Track};
use crate::features::{Feature, FeatureGate};
use crate::harmonic::{key_compatibility, KeyRelation};
use crate::tempo::tempo_compatibility;
use anyhow::Context;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced by the matcher.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("limit must be at least 1")]
    InvalidLimit,

    #[error("BPM tolerance must be a positive percentage, got {0}")]
    InvalidTolerance(f64),

    #[error("target BPM must be positive, got {0}")]
    InvalidBpm(f64),

    #[error("matching was cancelled")]
    Cancelled,

    #[error("failed to check feature {feature}")]
    FeatureLookup {
        feature: Feature,
        #[source]
        source: anyhow::Error,
    },

    #[error("catalog {operation} failed")]
    Catalog {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Cooperative cancellation shared between a caller and a running query.
///
/// Clones share the same flag. An optional deadline cancels the token
/// implicitly once it passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that cancels itself `timeout` from now. A timeout too large to
    /// represent as an `Instant` means no deadline.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Wrap an existing flag, e.g. one flipped by a signal handler.
    #[must_use]
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            deadline: None,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn check(&self) -> Result<(), MatchError> {
        if self.is_cancelled() {
            Err(MatchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Tuning knobs for [`MatchingService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Size of the scoring pool. `0` lets rayon pick (available parallelism).
    pub worker_threads: usize,
    /// Candidates scoring below this are dropped before ranking.
    pub min_overall_score: f64,
    /// Limit used by the CLI when none is given.
    pub default_limit: usize,
    /// BPM tolerance (percent) used by the CLI when none is given.
    pub default_tolerance_pct: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            min_overall_score: 0.0,
            default_limit: 20,
            default_tolerance_pct: 6.0,
        }
    }
}

impl MatchingConfig {
    /// Reject settings that would make every query come back empty.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.min_overall_score) {
            anyhow::bail!(
                "min_overall_score must be between 0 and 1, got {}",
                self.min_overall_score
            );
        }
        Ok(())
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub track: Track,
    /// `None` when tempo matching was not applied.
    pub bpm_compatibility: Option<f64>,
    pub bpm_diff: f64,
    /// `None` when key matching was not applied.
    pub key_compatibility: Option<f64>,
    pub key_relation: KeyRelation,
    pub overall_score: f64,
}

/// Ranks catalog tracks by mixability.
pub struct MatchingService<C, G> {
    catalog: C,
    gate: G,
    config: MatchingConfig,
    pool: rayon::ThreadPool,
}

impl<C: Catalog, G: FeatureGate> MatchingService<C, G> {
    /// Build a service with its own scoring pool.
    ///
    /// Fails when `min_overall_score` is not a number in `[0, 1]`.
    pub fn new(catalog: C, gate: G, config: MatchingConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("mixmatch-score-{i}"))
            .build()
            .context("Failed to build scoring thread pool")?;

        debug!(
            "Matching service ready with {} scoring threads",
            pool.current_num_threads()
        );

        Ok(Self {
            catalog,
            gate,
            config,
            pool,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Rank every other track of `user_id` against `source_track_id`.
    ///
    /// Each enabled dimension contributes its score; with both enabled the
    /// overall score is their average. Returns an empty list when neither
    /// feature is enabled or the source track does not exist.
    pub fn find_compatible_tracks(
        &self,
        user_id: &str,
        source_track_id: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchResult>, MatchError> {
        validate_limit(limit)?;

        let tempo_enabled = self.is_enabled(user_id, Feature::TempoMatching, cancel)?;
        let key_enabled = self.is_enabled(user_id, Feature::KeyMatching, cancel)?;
        if !tempo_enabled && !key_enabled {
            debug!("No matching features enabled for '{user_id}'");
            return Ok(Vec::new());
        }

        cancel.check()?;
        let source = self
            .catalog
            .get_track(user_id, source_track_id)
            .map_err(|source| MatchError::Catalog {
                operation: "get_track",
                source,
            })?;
        let Some(source) = source else {
            debug!("Source track '{source_track_id}' not found for '{user_id}'");
            return Ok(Vec::new());
        };

        info!(
            "Matching against '{}' ({} BPM, key '{}'), tempo: {tempo_enabled}, key: {key_enabled}",
            source.id, source.bpm, source.musical_key
        );

        let candidates = self.candidates(user_id, cancel)?;
        self.rank(candidates, limit, cancel, |track| {
            if track.id == source.id {
                return None;
            }

            let tempo = tempo_enabled.then(|| tempo_compatibility(source.bpm, track.bpm));
            let key = key_enabled
                .then(|| key_compatibility(&source.musical_key, &track.musical_key));

            let overall_score = match (tempo, key) {
                (Some(tempo), Some(key)) => (tempo.score + key.score) / 2.0,
                (Some(tempo), None) => tempo.score,
                (None, Some(key)) => key.score,
                (None, None) => 0.0,
            };

            Some(MatchResult {
                track: track.clone(),
                bpm_compatibility: tempo.map(|t| t.score),
                bpm_diff: tempo.map_or(0.0, |t| t.diff),
                key_compatibility: key.map(|k| k.score),
                key_relation: key.map_or(KeyRelation::Unknown, |k| k.relation),
                overall_score,
            })
        })
    }

    /// Tracks whose tempo (folded through half/double time) lies within
    /// `tolerance_pct` percent of `target_bpm`, best first.
    pub fn find_bpm_compatible(
        &self,
        user_id: &str,
        target_bpm: f64,
        tolerance_pct: f64,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchResult>, MatchError> {
        validate_limit(limit)?;
        if !tolerance_pct.is_finite() || tolerance_pct <= 0.0 {
            return Err(MatchError::InvalidTolerance(tolerance_pct));
        }
        if !target_bpm.is_finite() || target_bpm <= 0.0 {
            return Err(MatchError::InvalidBpm(target_bpm));
        }

        if !self.is_enabled(user_id, Feature::TempoMatching, cancel)? {
            debug!("Tempo matching disabled for '{user_id}'");
            return Ok(Vec::new());
        }

        info!("Finding tracks within {tolerance_pct}% of {target_bpm} BPM");
        let candidates = self.candidates(user_id, cancel)?;
        self.rank(candidates, limit, cancel, |track| {
            let tempo = tempo_compatibility(target_bpm, track.bpm);
            tempo.within_tolerance(tolerance_pct).then(|| MatchResult {
                track: track.clone(),
                bpm_compatibility: Some(tempo.score),
                bpm_diff: tempo.diff,
                key_compatibility: None,
                key_relation: KeyRelation::Unknown,
                overall_score: tempo.score,
            })
        })
    }

    /// Every track scored harmonically against `target_key`, best first.
    /// Tracks with unreadable keys stay in the list at the neutral score.
    pub fn find_key_compatible(
        &self,
        user_id: &str,
        target_key: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchResult>, MatchError> {
        validate_limit(limit)?;

        if !self.is_enabled(user_id, Feature::KeyMatching, cancel)? {
            debug!("Key matching disabled for '{user_id}'");
            return Ok(Vec::new());
        }

        info!("Finding tracks compatible with key '{target_key}'");
        let candidates = self.candidates(user_id, cancel)?;
        self.rank(candidates, limit, cancel, |track| {
            let key = key_compatibility(target_key, &track.musical_key);
            Some(MatchResult {
                track: track.clone(),
                bpm_compatibility: None,
                bpm_diff: 0.0,
                key_compatibility: Some(key.score),
                key_relation: key.relation,
                overall_score: key.score,
            })
        })
    }

    fn is_enabled(
        &self,
        user_id: &str,
        feature: Feature,
        cancel: &CancelToken,
    ) -> Result<bool, MatchError> {
        cancel.check()?;
        self.gate
            .is_enabled(user_id, feature)
            .map_err(|source| MatchError::FeatureLookup { feature, source })
    }

    fn candidates(&self, user_id: &str, cancel: &CancelToken) -> Result<Vec<Track>, MatchError> {
        cancel.check()?;
        let candidates = self
            .catalog
            .list_candidate_tracks(user_id)
            .map_err(|source| MatchError::Catalog {
                operation: "list_candidate_tracks",
                source,
            })?;
        cancel.check()?;
        debug!("Scoring {} candidates for '{user_id}'", candidates.len());
        Ok(candidates)
    }

    /// Score in parallel, then filter, sort and truncate on the calling thread.
    fn rank<F>(
        &self,
        candidates: Vec<Track>,
        limit: usize,
        cancel: &CancelToken,
        score: F,
    ) -> Result<Vec<MatchResult>, MatchError>
    where
        F: Fn(&Track) -> Option<MatchResult> + Send + Sync,
    {
        let scored: Vec<Option<MatchResult>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|track| {
                    cancel.check()?;
                    Ok(score(track))
                })
                .collect::<Result<_, MatchError>>()
        })?;
        cancel.check()?;

        let min_score = self.config.min_overall_score;
        let mut results: Vec<MatchResult> = scored
            .into_iter()
            .flatten()
            .filter(|result| result.overall_score >= min_score)
            .collect();

        // `sort_by` is stable: equal scores keep catalog order.
        results.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
        results.truncate(limit);

        debug!("Returning {} matches", results.len());
        Ok(results)
    }
}

fn validate_limit(limit: usize) -> Result<(), MatchError> {
    if limit == 0 {
        return Err(MatchError::InvalidLimit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MemoryCatalog {
        tracks: Vec<Track>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl MemoryCatalog {
        fn with(tracks: Vec<Track>) -> Self {
            Self {
                tracks,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Catalog for MemoryCatalog {
        fn get_track(&self, _user_id: &str, track_id: &str) -> Result<Option<Track>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("catalog offline"));
            }
            Ok(self.tracks.iter().find(|t| t.id == track_id).cloned())
        }

        fn list_candidate_tracks(&self, _user_id: &str) -> Result<Vec<Track>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("catalog offline"));
            }
            Ok(self.tracks.clone())
        }
    }

    struct StaticGate {
        tempo: bool,
        key: bool,
        fail: bool,
    }

    const BOTH: StaticGate = StaticGate {
        tempo: true,
        key: true,
        fail: false,
    };

    impl FeatureGate for StaticGate {
        fn is_enabled(&self, _user_id: &str, feature: Feature) -> Result<bool> {
            if self.fail {
                return Err(anyhow!("flag store offline"));
            }
            Ok(match feature {
                Feature::TempoMatching => self.tempo,
                Feature::KeyMatching => self.key,
            })
        }
    }

    fn track(id: &str, bpm: f64, key: &str) -> Track {
        Track {
            id: id.to_string(),
            title: format!("Track {id}"),
            artist: "Artist".to_string(),
            bpm,
            musical_key: key.to_string(),
        }
    }

    fn library() -> Vec<Track> {
        vec![
            track("source", 128.0, "Am"),
            track("far", 150.0, "F#m"),
            track("relative", 128.0, "C"),
            track("twin", 128.0, "Am"),
            track("neighbor", 130.0, "Em"),
        ]
    }

    fn service(
        catalog: MemoryCatalog,
        gate: StaticGate,
    ) -> MatchingService<MemoryCatalog, StaticGate> {
        MatchingService::new(catalog, gate, MatchingConfig::default()).unwrap()
    }

    fn ids(results: &[MatchResult]) -> Vec<&str> {
        results.iter().map(|r| r.track.id.as_str()).collect()
    }

    #[test]
    fn test_ranks_by_combined_score() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let results = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap();

        assert_eq!(ids(&results), vec!["twin", "relative", "neighbor", "far"]);

        let relative = &results[1];
        assert_eq!(relative.bpm_compatibility, Some(1.0));
        assert_eq!(relative.key_compatibility, Some(0.9));
        assert_eq!(relative.key_relation, KeyRelation::Relative);
        assert!((relative.overall_score - 0.95).abs() < 1e-9);

        for pair in results.windows(2) {
            assert!(pair[0].overall_score >= pair[1].overall_score);
        }
        for result in &results {
            assert!((0.0..=1.0).contains(&result.overall_score));
            assert!(result.bpm_diff >= 0.0);
        }
    }

    #[test]
    fn test_never_matches_source_with_itself() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let results = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap();
        assert!(results.iter().all(|r| r.track.id != "source"));
    }

    #[test]
    fn test_limit_truncates() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let results = service
            .find_compatible_tracks("u1", "source", 2, &CancelToken::new())
            .unwrap();
        assert_eq!(ids(&results), vec!["twin", "relative"]);
    }

    #[test]
    fn test_single_dimension_scores() {
        let tempo_only = StaticGate {
            tempo: true,
            key: false,
            fail: false,
        };
        let service = service(MemoryCatalog::with(library()), tempo_only);
        let results = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap();

        for result in &results {
            assert_eq!(result.key_compatibility, None);
            assert_eq!(result.key_relation, KeyRelation::Unknown);
            assert_eq!(result.bpm_compatibility, Some(result.overall_score));
        }
        // twin and relative tie on tempo, catalog order decides
        assert_eq!(ids(&results)[..2], ["relative", "twin"]);
    }

    #[test]
    fn test_both_features_disabled_returns_empty() {
        let off = StaticGate {
            tempo: false,
            key: false,
            fail: false,
        };
        let service = service(MemoryCatalog::with(library()), off);
        let results = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(service.catalog.calls(), 0);
    }

    #[test]
    fn test_missing_source_or_empty_pool_returns_empty() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        assert!(service
            .find_compatible_tracks("u1", "nope", 10, &CancelToken::new())
            .unwrap()
            .is_empty());

        let service = self::service(MemoryCatalog::default(), BOTH);
        assert!(service
            .find_key_compatible("u1", "Am", 10, &CancelToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_zero_bpm_candidate_scores_zero_tempo() {
        let tracks = vec![track("source", 128.0, "Am"), track("unknown", 0.0, "Am")];
        let service = service(MemoryCatalog::with(tracks), BOTH);
        let results = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap();

        assert_eq!(results[0].bpm_compatibility, Some(0.0));
        assert_eq!(results[0].bpm_diff, 0.0);
        assert!((results[0].overall_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_arguments_skip_lookups() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let cancel = CancelToken::new();

        assert!(matches!(
            service.find_compatible_tracks("u1", "source", 0, &cancel),
            Err(MatchError::InvalidLimit)
        ));
        assert!(matches!(
            service.find_key_compatible("u1", "Am", 0, &cancel),
            Err(MatchError::InvalidLimit)
        ));
        assert!(matches!(
            service.find_bpm_compatible("u1", 128.0, 0.0, 10, &cancel),
            Err(MatchError::InvalidTolerance(_))
        ));
        assert!(matches!(
            service.find_bpm_compatible("u1", 128.0, f64::NAN, 10, &cancel),
            Err(MatchError::InvalidTolerance(_))
        ));
        assert!(matches!(
            service.find_bpm_compatible("u1", -1.0, 5.0, 10, &cancel),
            Err(MatchError::InvalidBpm(_))
        ));
        assert_eq!(service.catalog.calls(), 0);
    }

    #[test]
    fn test_bpm_search_applies_tolerance() {
        let tracks = vec![
            track("exact", 128.0, "Am"),
            track("half", 64.0, "C"),
            track("close", 131.0, "Em"),
            track("outside", 140.0, "Am"),
            track("unknown", 0.0, "Am"),
        ];
        let service = service(MemoryCatalog::with(tracks), BOTH);
        let results = service
            .find_bpm_compatible("u1", 128.0, 5.0, 10, &CancelToken::new())
            .unwrap();

        assert_eq!(ids(&results), vec!["exact", "half", "close"]);
        for result in &results {
            assert_eq!(result.key_compatibility, None);
            assert_eq!(result.bpm_compatibility, Some(result.overall_score));
        }
    }

    #[test]
    fn test_bpm_search_gated() {
        let key_only = StaticGate {
            tempo: false,
            key: true,
            fail: false,
        };
        let service = service(MemoryCatalog::with(library()), key_only);
        assert!(service
            .find_bpm_compatible("u1", 128.0, 5.0, 10, &CancelToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_key_search_keeps_unknown_keys() {
        let tracks = vec![
            track("far", 120.0, "F#m"),
            track("blank", 120.0, ""),
            track("neighbor", 120.0, "Em"),
            track("same", 120.0, "A minor"),
            track("relative", 120.0, "C"),
        ];
        let service = service(MemoryCatalog::with(tracks), BOTH);
        let results = service
            .find_key_compatible("u1", "Am", 10, &CancelToken::new())
            .unwrap();

        assert_eq!(ids(&results), vec!["same", "relative", "neighbor", "blank", "far"]);
        assert_eq!(results[3].key_relation, KeyRelation::Unknown);
        assert_eq!(results[3].overall_score, 0.5);
        assert!(results.iter().all(|r| r.bpm_compatibility.is_none()));
    }

    #[test]
    fn test_min_overall_score_filters() {
        let config = MatchingConfig {
            min_overall_score: 0.6,
            ..MatchingConfig::default()
        };
        let service =
            MatchingService::new(MemoryCatalog::with(library()), BOTH, config).unwrap();
        let results = service
            .find_key_compatible("u1", "Am", 10, &CancelToken::new())
            .unwrap();

        assert_eq!(ids(&results), vec!["source", "twin", "relative", "neighbor"]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let cancel = CancelToken::new();
        cancel.cancel();

        assert!(matches!(
            service.find_compatible_tracks("u1", "source", 10, &cancel),
            Err(MatchError::Cancelled)
        ));
        assert_eq!(service.catalog.calls(), 0);
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let cancel = CancelToken::with_deadline(Instant::now());
        assert!(cancel.is_cancelled());
        assert!(matches!(
            service.find_key_compatible("u1", "Am", 10, &cancel),
            Err(MatchError::Cancelled)
        ));
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_huge_timeout_means_no_deadline() {
        let token = CancelToken::with_timeout(Duration::from_secs(u64::MAX));
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    /// Catalog that cancels the query while handing out the candidate pool.
    struct CancellingCatalog {
        tracks: Vec<Track>,
        cancel: CancelToken,
    }

    impl Catalog for CancellingCatalog {
        fn get_track(&self, _user_id: &str, track_id: &str) -> Result<Option<Track>> {
            Ok(self.tracks.iter().find(|t| t.id == track_id).cloned())
        }

        fn list_candidate_tracks(&self, _user_id: &str) -> Result<Vec<Track>> {
            self.cancel.cancel();
            Ok(self.tracks.clone())
        }
    }

    #[test]
    fn test_cancelled_during_candidate_fetch() {
        let cancel = CancelToken::new();
        let catalog = CancellingCatalog {
            tracks: library(),
            cancel: cancel.clone(),
        };
        let service = MatchingService::new(catalog, BOTH, MatchingConfig::default()).unwrap();

        assert!(matches!(
            service.find_compatible_tracks("u1", "source", 10, &cancel),
            Err(MatchError::Cancelled)
        ));
    }

    /// Gate that cancels the query once tempo matching has been resolved.
    struct CancellingGate {
        cancel: CancelToken,
    }

    impl FeatureGate for CancellingGate {
        fn is_enabled(&self, _user_id: &str, feature: Feature) -> Result<bool> {
            if feature == Feature::TempoMatching {
                self.cancel.cancel();
            }
            Ok(true)
        }
    }

    #[test]
    fn test_cancelled_between_feature_lookups() {
        let cancel = CancelToken::new();
        let gate = CancellingGate {
            cancel: cancel.clone(),
        };
        let service =
            MatchingService::new(MemoryCatalog::with(library()), gate, MatchingConfig::default())
                .unwrap();

        assert!(matches!(
            service.find_compatible_tracks("u1", "source", 10, &cancel),
            Err(MatchError::Cancelled)
        ));
        assert_eq!(service.catalog.calls(), 0);
    }

    #[test]
    fn test_cancelled_while_scoring_returns_no_partial_list() {
        let service = service(MemoryCatalog::default(), BOTH);
        let cancel = CancelToken::new();
        let scored = AtomicUsize::new(0);

        let outcome = service.rank(library(), 10, &cancel, |track| {
            scored.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            Some(MatchResult {
                track: track.clone(),
                bpm_compatibility: None,
                bpm_diff: 0.0,
                key_compatibility: None,
                key_relation: KeyRelation::Unknown,
                overall_score: 1.0,
            })
        });

        assert!(matches!(outcome, Err(MatchError::Cancelled)));
        assert!(scored.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_rejects_out_of_range_min_score() {
        for bad in [f64::NAN, -0.1, 1.5, f64::INFINITY] {
            let config = MatchingConfig {
                min_overall_score: bad,
                ..MatchingConfig::default()
            };
            assert!(
                MatchingService::new(MemoryCatalog::default(), BOTH, config).is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_collaborator_errors_are_wrapped() {
        let broken_gate = StaticGate {
            tempo: true,
            key: true,
            fail: true,
        };
        let service = service(MemoryCatalog::with(library()), broken_gate);
        let err = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::FeatureLookup {
                feature: Feature::TempoMatching,
                ..
            }
        ));

        let catalog = MemoryCatalog {
            fail: true,
            ..MemoryCatalog::default()
        };
        let service = self::service(catalog, BOTH);
        let err = service
            .find_compatible_tracks("u1", "source", 10, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, MatchError::Catalog { operation: "get_track", .. }));
        assert_eq!(err.to_string(), "catalog get_track failed");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let service = service(MemoryCatalog::with(library()), BOTH);
        let results = service
            .find_compatible_tracks("u1", "source", 1, &CancelToken::new())
            .unwrap();
        let json = serde_json::to_value(&results[0]).unwrap();

        assert_eq!(json["keyRelation"], "same");
        assert_eq!(json["bpmCompatibility"], 1.0);
        assert_eq!(json["track"]["musicalKey"], "Am");
    }
}
