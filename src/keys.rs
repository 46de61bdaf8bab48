//! Key normalization and Camelot wheel mapping.
//!
//! Free-text key labels ("Am", "A min", " C maj ", "8A") are first normalized,
//! then mapped to a position on the Camelot wheel: 12 slots, each with a minor
//! track (`A`) and a major track (`B`). Slot *n* on track A is the relative
//! minor of slot *n* on track B.
//!
//! ```text
//!        12B  1B  2B
//!    11B    12A 1A 2A    3B
//!  10B   11A         3A    4B
//!  9B  10A     ...     4A  5B
//!  8B   9A (Am=8A, C=8B) 5A 6B
//!    7B    8A 7A 6A      ...
//! ```

use serde::Serialize;
use std::fmt;

/// Number of slots on the wheel.
pub const WHEEL_SIZE: u8 = 12;

/// Canonicalize a loosely formatted key label.
///
/// Trims surrounding whitespace and expands a trailing `min`/`maj` into
/// `minor`/`major`. The substitution is applied to the suffix only, so no
/// space is inserted (`"A#min"` becomes `"A#minor"`). Applying it twice gives
/// the same result as applying it once.
///
/// # Examples
///
/// ```
/// use mixmatch::keys::normalize_key;
///
/// assert_eq!(normalize_key(" A min "), "A minor");
/// assert_eq!(normalize_key("C maj"), "C major");
/// assert_eq!(normalize_key("A#min"), "A#minor");
/// assert_eq!(normalize_key("Am"), "Am");
/// ```
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();

    match expand_suffix(key, "min", "minor").or_else(|| expand_suffix(key, "maj", "major")) {
        Some(expanded) => expanded,
        None => key.to_string(),
    }
}

/// Replace an ASCII-case-insensitive `short` suffix with `long`.
fn expand_suffix(key: &str, short: &str, long: &str) -> Option<String> {
    let split = key.len().checked_sub(short.len())?;
    if !key.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = key.split_at(split);
    tail.eq_ignore_ascii_case(short)
        .then(|| format!("{head}{long}"))
}

/// Wheel track: `A` holds the minor keys, `B` the major keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Minor,
    Major,
}

impl Mode {
    /// Camelot track letter.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Minor => 'A',
            Self::Major => 'B',
        }
    }

    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Minor => Self::Major,
            Self::Major => Self::Minor,
        }
    }
}

/// A position on the Camelot wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CamelotPosition {
    /// Slot in `1..=12`.
    pub number: u8,
    pub mode: Mode,
}

// Camelot slot by root pitch class (0 = C, 1 = C#/Db, ... 11 = B).
const MAJOR_SLOTS: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
const MINOR_SLOTS: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

impl CamelotPosition {
    /// Build a position, rejecting slots outside `1..=12`.
    #[must_use]
    pub fn new(number: u8, mode: Mode) -> Option<Self> {
        (1..=WHEEL_SIZE)
            .contains(&number)
            .then_some(Self { number, mode })
    }

    /// Map a key label to its wheel position.
    ///
    /// The label is normalized first. Returns `None` when the label cannot be
    /// placed on the wheel (empty, garbled, or an unknown root); callers treat
    /// that as "unknown" rather than as an error.
    ///
    /// ```
    /// use mixmatch::keys::{CamelotPosition, Mode};
    ///
    /// let am = CamelotPosition::from_key("A minor").unwrap();
    /// assert_eq!((am.number, am.mode), (8, Mode::Minor));
    /// assert_eq!(CamelotPosition::from_key("8B").unwrap().to_string(), "8B");
    /// assert!(CamelotPosition::from_key("X#m").is_none());
    /// ```
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        let key = normalize_key(key);
        if key.is_empty() {
            return None;
        }
        parse_wheel_code(&key).or_else(|| parse_note_name(&key))
    }

    /// Position sharing this slot on the other track.
    #[must_use]
    pub const fn relative(self) -> Self {
        Self {
            number: self.number,
            mode: self.mode.flipped(),
        }
    }

    /// Move `steps` slots clockwise (negative = counter-clockwise), same track.
    #[must_use]
    pub fn rotate(self, steps: i8) -> Self {
        let size = i16::from(WHEEL_SIZE);
        let zero_based = (i16::from(self.number) - 1 + i16::from(steps)).rem_euclid(size);
        Self {
            // rem_euclid keeps this in 0..12
            number: u8::try_from(zero_based + 1).unwrap_or(1),
            mode: self.mode,
        }
    }

    /// The classic safe-mix set: the key itself, its neighbours on the same
    /// track, and its relative.
    #[must_use]
    pub fn compatible_keys(self) -> [Self; 4] {
        [self, self.rotate(-1), self.rotate(1), self.relative()]
    }

    /// Describe a transition into `to`, or `None` when `to` is outside the
    /// safe-mix set.
    #[must_use]
    pub fn transition_to(self, to: Self) -> Option<KeyTransition> {
        if self == to {
            Some(KeyTransition::PerfectMatch)
        } else if self.relative() == to {
            Some(KeyTransition::MajorMinorSwitch)
        } else if self.mode == to.mode && distance(self.number, to.number) == 1 {
            Some(KeyTransition::SmoothTransition)
        } else {
            None
        }
    }
}

impl fmt::Display for CamelotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

/// Kind of move between two keys in the safe-mix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    PerfectMatch,
    SmoothTransition,
    MajorMinorSwitch,
}

impl fmt::Display for KeyTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PerfectMatch => "Perfect Match",
            Self::SmoothTransition => "Smooth Transition",
            Self::MajorMinorSwitch => "Major/Minor Switch",
        };
        f.write_str(label)
    }
}

/// Circular distance between two wheel slots, in `0..=6`.
///
/// Slots 12 and 1 are one step apart.
///
/// ```
/// use mixmatch::keys::distance;
///
/// assert_eq!(distance(1, 12), 1);
/// assert_eq!(distance(3, 9), 6);
/// ```
#[must_use]
pub const fn distance(a: u8, b: u8) -> u8 {
    let diff = a.abs_diff(b) % WHEEL_SIZE;
    if diff > WHEEL_SIZE - diff {
        WHEEL_SIZE - diff
    } else {
        diff
    }
}

/// Camelot (`8A`, `12b`) and Open Key (`8m`, `1d`) codes.
fn parse_wheel_code(key: &str) -> Option<CamelotPosition> {
    let digits_end = key.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (digits, suffix) = key.split_at(digits_end);
    let number: u8 = digits.parse().ok()?;

    let (mode, open_key) = match suffix.trim() {
        "A" | "a" => (Mode::Minor, false),
        "B" | "b" => (Mode::Major, false),
        "m" => (Mode::Minor, true),
        "d" => (Mode::Major, true),
        _ => return None,
    };

    let position = CamelotPosition::new(number, mode)?;
    // Open Key numbering runs seven slots behind Camelot.
    Some(if open_key { position.rotate(7) } else { position })
}

/// Note names such as `Am`, `C#`, `Bb minor`, `F♯ major`.
fn parse_note_name(key: &str) -> Option<CamelotPosition> {
    let mut chars = key.chars();

    let natural: u8 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (pitch, rest) = if let Some(rest) = rest.strip_prefix(|c| c == '#' || c == '♯') {
        ((natural + 1) % 12, rest)
    } else if let Some(rest) = rest.strip_prefix(|c| c == 'b' || c == '♭') {
        ((natural + 11) % 12, rest)
    } else {
        (natural, rest)
    };

    let mode = parse_mode(rest.trim())?;
    let slots = match mode {
        Mode::Minor => &MINOR_SLOTS,
        Mode::Major => &MAJOR_SLOTS,
    };

    CamelotPosition::new(slots[usize::from(pitch)], mode)
}

fn is_word(token: &str, long: &str, short: &str) -> bool {
    token.eq_ignore_ascii_case(long) || token.eq_ignore_ascii_case(short)
}

fn parse_mode(token: &str) -> Option<Mode> {
    match token {
        "" | "M" => Some(Mode::Major),
        "m" => Some(Mode::Minor),
        _ if is_word(token, "minor", "min") => Some(Mode::Minor),
        _ if is_word(token, "major", "maj") => Some(Mode::Major),
        _ => None,
    }
}
