//! Track matching for DJs: rank a catalog by how well each track mixes with
//! a source track, by tempo and by musical key.
//!
//! Core modules:
//! - [`keys`] - Key label normalization and the Camelot wheel
//! - [`tempo`] - Tempo compatibility with half/double-time folding
//! - [`harmonic`] - Key compatibility from a fixed relation table
//! - [`matching`] - Gated, parallel ranking over a candidate pool
//!
//! ### Supporting Modules
//!
//! - [`catalog`] - Track model and the catalog collaborator trait
//! - [`features`] - Per-user feature gating with flag cache and overrides
//! - [`db`] - SQLite store backing both collaborators
//! - [`config`] - Data directory and runtime settings
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use mixmatch::catalog::Track;
//! use mixmatch::db::SqliteStore;
//! use mixmatch::features::{Feature, FeatureService};
//! use mixmatch::matching::{CancelToken, MatchingConfig, MatchingService};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! store.import_tracks("dj", &[
//!     Track { id: "a".into(), bpm: 128.0, musical_key: "Am".into(), ..Track::default() },
//!     Track { id: "b".into(), bpm: 64.0, musical_key: "C".into(), ..Track::default() },
//! ])?;
//!
//! let features = FeatureService::new(Arc::clone(&store));
//! features.set_override("dj", Feature::TempoMatching, true, None, None)?;
//! features.set_override("dj", Feature::KeyMatching, true, None, None)?;
//!
//! let matcher = MatchingService::new(store, features, MatchingConfig::default())?;
//! for result in matcher.find_compatible_tracks("dj", "a", 10, &CancelToken::new())? {
//!     println!("{} {:.2} ({})", result.track.id, result.overall_score, result.key_relation);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Scoring
//!
//! ### Tempo
//! - The target tempo is compared as-is, doubled and halved; the closest wins
//! - Score falls linearly from 1.0 at 0% deviation to 0.0 at 20%
//! - Unknown (zero) tempos score 0
//!
//! ### Key
//! - Keys are placed on the 12-position Camelot wheel
//! - Same key 1.0, relative 0.9, neighbour 0.85, energy shift 0.7,
//!   two steps 0.6, tritone 0.4, anything else 0.3
//! - Unreadable keys get a neutral 0.5
//!
//! With both features enabled the overall score is the mean of the two.
//!
//! ## Error Handling
//!
//! Collaborators and the application layer use `anyhow::Result`. The
//! matcher returns [`matching::MatchError`] so callers can tell invalid
//! arguments and cancellation apart from upstream failures.

pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod features;
pub mod harmonic;
pub mod keys;
pub mod matching;
pub mod tempo;
