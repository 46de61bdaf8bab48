//! Tempo compatibility scoring.
//!
//! Two BPM values mix well when they are close, or when one is (close to)
//! half or double the other. The target tempo is folded onto the source
//! before scoring, so the half/double case goes through the same decay as a
//! direct match.

use serde::Serialize;

/// Deviation (in percent) at which the score reaches zero.
pub const ZERO_SCORE_DEVIATION_PCT: f64 = 20.0;

/// How the target tempo was folded onto the source tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoRelation {
    Direct,
    DoubleTime,
    HalfTime,
}

/// Outcome of scoring one tempo pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoMatch {
    /// Compatibility in `[0, 1]`.
    pub score: f64,
    /// Absolute BPM gap to the best folded candidate, never negative.
    pub diff: f64,
    /// Percentage deviation of the best folded candidate from the source.
    /// `None` when either tempo was unusable.
    pub deviation_pct: Option<f64>,
    pub relation: TempoRelation,
}

impl TempoMatch {
    const INCOMPATIBLE: Self = Self {
        score: 0.0,
        diff: 0.0,
        deviation_pct: None,
        relation: TempoRelation::Direct,
    };

    /// Whether the folded deviation stays within `tolerance_pct`.
    #[must_use]
    pub fn within_tolerance(&self, tolerance_pct: f64) -> bool {
        self.deviation_pct
            .is_some_and(|deviation| deviation <= tolerance_pct)
    }
}

/// Score how mixable `target_bpm` is against `source_bpm`.
///
/// Candidates are the target itself, its double and its half. The one
/// deviating least from the source wins, and the score decays linearly from
/// 1.0 at 0% deviation to 0.0 at [`ZERO_SCORE_DEVIATION_PCT`].
///
/// A non-positive (or non-finite) tempo on either side scores 0 with a zero
/// diff.
///
/// # Examples
///
/// ```
/// use mixmatch::tempo::{tempo_compatibility, TempoRelation};
///
/// let exact = tempo_compatibility(128.0, 128.0);
/// assert_eq!(exact.score, 1.0);
///
/// let half = tempo_compatibility(128.0, 64.0);
/// assert_eq!(half.score, 1.0);
/// assert_eq!(half.relation, TempoRelation::DoubleTime);
///
/// assert_eq!(tempo_compatibility(128.0, 0.0).score, 0.0);
/// ```
#[must_use]
pub fn tempo_compatibility(source_bpm: f64, target_bpm: f64) -> TempoMatch {
    if !is_usable(source_bpm) || !is_usable(target_bpm) {
        return TempoMatch::INCOMPATIBLE;
    }

    let candidates = [
        (TempoRelation::Direct, target_bpm),
        (TempoRelation::DoubleTime, target_bpm * 2.0),
        (TempoRelation::HalfTime, target_bpm / 2.0),
    ];

    // First candidate wins ties, so an exact direct match stays `Direct`.
    let (relation, diff) = candidates
        .into_iter()
        .map(|(relation, bpm)| (relation, (source_bpm - bpm).abs()))
        .fold((TempoRelation::Direct, f64::INFINITY), |best, current| {
            if current.1 < best.1 {
                current
            } else {
                best
            }
        });

    let deviation_pct = diff / source_bpm * 100.0;
    let score = (1.0 - deviation_pct / ZERO_SCORE_DEVIATION_PCT).clamp(0.0, 1.0);

    log::trace!(
        "tempo {source_bpm} vs {target_bpm}: {relation:?}, \
         deviation {deviation_pct:.2}%, score {score:.3}"
    );

    TempoMatch {
        score,
        diff,
        deviation_pct: Some(deviation_pct),
        relation,
    }
}

#[inline]
fn is_usable(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_score_between(source: f64, target: f64, min: f64, max: f64) {
        let result = tempo_compatibility(source, target);
        assert!(
            (min..=max).contains(&result.score),
            "{source} vs {target}: score {} not in [{min}, {max}]",
            result.score
        );
        assert!(result.diff >= 0.0, "diff should be non-negative");
    }

    #[test]
    fn test_exact_match() {
        let result = tempo_compatibility(128.0, 128.0);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.diff, 0.0);
        assert_eq!(result.relation, TempoRelation::Direct);
    }

    #[test]
    fn test_compatibility_tiers() {
        assert_score_between(128.0, 131.0, 0.7, 1.0);
        assert_score_between(128.0, 64.0, 0.9, 1.0);
        assert_score_between(64.0, 128.0, 0.9, 1.0);
        assert_score_between(128.0, 136.0, 0.3, 0.7);
        assert_score_between(128.0, 150.0, 0.0, 0.3);
    }

    #[test]
    fn test_folding_picks_nearest_candidate() {
        let double = tempo_compatibility(128.0, 64.0);
        assert_eq!(double.relation, TempoRelation::DoubleTime);
        assert_eq!(double.diff, 0.0);

        let half = tempo_compatibility(70.0, 140.0);
        assert_eq!(half.relation, TempoRelation::HalfTime);
        assert_eq!(half.diff, 0.0);

        let near_half = tempo_compatibility(128.0, 66.0);
        assert_eq!(near_half.relation, TempoRelation::DoubleTime);
        assert!((near_half.diff - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_unusable_tempos_score_zero() {
        for (source, target) in [
            (0.0, 128.0),
            (128.0, 0.0),
            (-10.0, 128.0),
            (128.0, f64::NAN),
            (f64::INFINITY, 120.0),
        ] {
            let result = tempo_compatibility(source, target);
            assert_eq!(result.score, 0.0);
            assert_eq!(result.diff, 0.0);
            assert!(result.deviation_pct.is_none());
            assert!(!result.within_tolerance(100.0));
        }
    }

    #[test]
    fn test_score_reaches_zero_at_twenty_percent() {
        assert_eq!(tempo_compatibility(100.0, 120.0).score, 0.0);
        assert_eq!(tempo_compatibility(100.0, 125.0).score, 0.0);
        assert!((tempo_compatibility(100.0, 110.0).score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_within_tolerance() {
        let result = tempo_compatibility(128.0, 130.0);
        assert!(result.within_tolerance(5.0));
        assert!(!result.within_tolerance(1.0));
    }

    #[test]
    fn test_scores_always_in_range() {
        for source in (40..=200).step_by(7) {
            for target in (20..=400).step_by(11) {
                let result = tempo_compatibility(f64::from(source), f64::from(target));
                assert!((0.0..=1.0).contains(&result.score));
                assert!(result.diff >= 0.0);
            }
        }
    }
}
