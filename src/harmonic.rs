//! Harmonic (musical key) compatibility scoring.
//!
//! Compatibility between keys is categorical: a neighbour on the wheel is a
//! safe mix, a tritone is a risky but recognised move, everything else is
//! rough. Scores therefore come from a fixed table keyed on wheel distance
//! and track agreement, not from a decay curve.

use crate::keys::{distance, CamelotPosition};
use serde::Serialize;
use std::fmt;

/// How two keys relate on the Camelot wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRelation {
    Same,
    Relative,
    Neighbor,
    EnergyShift,
    Compatible,
    Tritone,
    Incompatible,
    Unknown,
}

impl KeyRelation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Relative => "relative",
            Self::Neighbor => "neighbor",
            Self::EnergyShift => "energy_shift",
            Self::Compatible => "compatible",
            Self::Tritone => "tritone",
            Self::Incompatible => "incompatible",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for KeyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring one key pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyMatch {
    /// Compatibility in `[0, 1]`.
    pub score: f64,
    pub relation: KeyRelation,
}

impl KeyMatch {
    const fn new(score: f64, relation: KeyRelation) -> Self {
        Self { score, relation }
    }
}

/// Neutral result for keys that cannot be placed on the wheel.
pub const UNKNOWN_MATCH: KeyMatch = KeyMatch::new(0.5, KeyRelation::Unknown);

/// Fallback for any `(distance, same_track)` pair missing from [`RELATION_TABLE`].
pub const INCOMPATIBLE_MATCH: KeyMatch = KeyMatch::new(0.3, KeyRelation::Incompatible);

/// `(wheel distance, same track) -> score/relation`.
///
/// Tritone (distance 6) deliberately outranks distances 3 to 5.
pub const RELATION_TABLE: [(u8, bool, KeyMatch); 6] = [
    (0, true, KeyMatch::new(1.0, KeyRelation::Same)),
    (0, false, KeyMatch::new(0.9, KeyRelation::Relative)),
    (1, true, KeyMatch::new(0.85, KeyRelation::Neighbor)),
    (1, false, KeyMatch::new(0.7, KeyRelation::EnergyShift)),
    (2, true, KeyMatch::new(0.6, KeyRelation::Compatible)),
    (6, true, KeyMatch::new(0.4, KeyRelation::Tritone)),
];

/// Score two wheel positions against each other.
#[must_use]
pub fn position_compatibility(source: CamelotPosition, target: CamelotPosition) -> KeyMatch {
    let steps = distance(source.number, target.number);
    let same_track = source.mode == target.mode;

    RELATION_TABLE
        .iter()
        .find(|(d, track, _)| *d == steps && *track == same_track)
        .map_or(INCOMPATIBLE_MATCH, |(_, _, result)| *result)
}

/// Score two free-text keys.
///
/// Both keys are normalized and mapped onto the wheel. If either cannot be
/// mapped the result is neutral (0.5, [`KeyRelation::Unknown`]) so one bad
/// metadata field never sinks a candidate.
///
/// # Examples
///
/// ```
/// use mixmatch::harmonic::{key_compatibility, KeyRelation};
///
/// let relative = key_compatibility("Am", "C");
/// assert_eq!(relative.score, 0.9);
/// assert_eq!(relative.relation, KeyRelation::Relative);
///
/// assert_eq!(key_compatibility("Am", "").relation, KeyRelation::Unknown);
/// ```
#[must_use]
pub fn key_compatibility(source_key: &str, target_key: &str) -> KeyMatch {
    match (
        CamelotPosition::from_key(source_key),
        CamelotPosition::from_key(target_key),
    ) {
        (Some(source), Some(target)) => {
            let result = position_compatibility(source, target);
            log::trace!("key {source} -> {target}: {} ({})", result.relation, result.score);
            result
        }
        _ => {
            log::trace!("key '{source_key}' -> '{target_key}': unmappable, neutral score");
            UNKNOWN_MATCH
        }
    }
}
