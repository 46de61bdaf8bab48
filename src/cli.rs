//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `mixmatch` binary.
//!
//! ## Commands
//!
//! - `init-db`: Create the catalog database and seed feature flags
//! - `import`: Load tracks from a JSON file
//! - `list`: Show the user's tracks
//! - `match`: Rank tracks against a track from the catalog
//! - `bpm`: Find tracks near a tempo
//! - `key`: Find tracks in compatible keys
//! - `wheel`: Show where a key sits on the Camelot wheel
//! - `feature`: Inspect and change feature gating
//!
//! ## Examples
//!
//! ```bash
//! mixmatch init-db --enable-features
//! mixmatch import ~/crates/summer-set.json
//! mixmatch match track-042 --limit 5
//! mixmatch bpm 124 --tolerance 4 --json
//! mixmatch key "F# minor"
//! ```

use crate::features::Feature;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "mixmatch")]
#[command(about = "mixmatch: find tracks that mix well by tempo and key")]
#[command(version)]
pub struct Args {
    /// Catalog owner whose tracks and features are used
    #[arg(long, global = true, env = "MIXMATCH_USER", default_value = "local")]
    pub user: String,

    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    /// Abort matching after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the catalog database
    ///
    /// Creates the database at the configured location (see MIXMATCH_DB)
    /// and writes the default feature flags. Matching features start
    /// disabled unless --enable-features is given.
    InitDb {
        /// Delete and recreate an existing database
        #[arg(long)]
        force: bool,

        /// Enable tempo and key matching for every user
        #[arg(long)]
        enable_features: bool,
    },

    /// Import tracks from a JSON file
    ///
    /// The file holds an array of objects with `id`, `title`, `artist`,
    /// `bpm` and `musicalKey`. Existing ids are updated in place.
    Import {
        /// Path to the JSON file
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// List the user's tracks
    List,

    /// Rank tracks that mix well with a catalogued track
    ///
    /// Combines tempo and key compatibility, depending on which features
    /// are enabled for the user.
    Match {
        /// Id of the source track
        #[arg(value_hint = clap::ValueHint::Other)]
        track_id: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Find tracks near a tempo (half and double time included)
    Bpm {
        /// Target tempo in beats per minute
        bpm: f64,

        /// Allowed deviation in percent
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Find tracks in keys compatible with a target key
    Key {
        /// Target key, e.g. "Am", "F# minor", "8A"
        key: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a key's Camelot position and its safe transitions
    Wheel {
        /// Key to look up
        key: String,
    },

    /// Inspect and change feature gating
    Feature {
        #[command(subcommand)]
        action: FeatureAction,
    },

    /// Generate shell completions
    ///
    /// Usage: mixmatch completion bash > ~/.local/share/bash-completion/completions/mixmatch
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List track ids for completion (hidden command)
    #[command(hide = true)]
    CompleteTracks,
}

/// Feature management actions
#[derive(Subcommand, Debug)]
pub enum FeatureAction {
    /// Show every feature and whether it is on for the user
    List,

    /// Turn a feature on for the user
    Enable {
        /// `bpm` or `key`
        feature: Feature,

        /// Why the override exists
        #[arg(long)]
        reason: Option<String>,

        /// Drop the override after this many hours
        #[arg(long, value_name = "HOURS")]
        expires_in: Option<u64>,
    },

    /// Turn a feature off for the user
    Disable {
        /// `bpm` or `key`
        feature: Feature,

        /// Why the override exists
        #[arg(long)]
        reason: Option<String>,

        /// Drop the override after this many hours
        #[arg(long, value_name = "HOURS")]
        expires_in: Option<u64>,
    },

    /// Remove the user's override so the global flag applies again
    Clear {
        /// `bpm` or `key`
        feature: Feature,
    },

    /// Change a feature's global flag
    Flag {
        /// `bpm` or `key`
        feature: Feature,

        /// Master switch for everyone
        #[arg(long)]
        global: Option<bool>,

        /// Value for users without an override
        #[arg(long)]
        default: Option<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_match_with_globals() {
        let args = Args::try_parse_from([
            "mixmatch", "match", "t1", "--limit", "3", "--user", "dj", "--json",
        ])
        .unwrap();
        assert_eq!(args.user, "dj");
        assert!(args.json);
        assert!(matches!(
            args.command,
            Command::Match { ref track_id, limit: Some(3) } if track_id == "t1"
        ));
    }

    #[test]
    fn test_parse_feature_names() {
        let args = Args::try_parse_from(["mixmatch", "feature", "enable", "bpm"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Feature {
                action: FeatureAction::Enable {
                    feature: Feature::TempoMatching,
                    ..
                }
            }
        ));
        assert!(Args::try_parse_from(["mixmatch", "feature", "enable", "loudness"]).is_err());
    }

    #[test]
    fn test_negative_limit_rejected() {
        assert!(Args::try_parse_from(["mixmatch", "key", "Am", "--limit", "-1"]).is_err());
    }
}
