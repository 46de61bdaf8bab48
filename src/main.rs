//! # mixmatch
//!
//! Command-line front end for the matching library: manages the SQLite
//! catalog and feature flags, and prints ranked matches as a table or JSON.
//!
//! ## Usage
//!
//! ```bash
//! mixmatch init-db --enable-features
//! mixmatch import tracks.json
//! mixmatch match track-042
//! mixmatch key "A minor" --json
//! RUST_LOG=mixmatch=debug mixmatch bpm 128
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use mixmatch::catalog::Track;
use mixmatch::cli::{self, Command, FeatureAction};
use mixmatch::completion;
use mixmatch::config::{self, RuntimeConfig};
use mixmatch::db::SqliteStore;
use mixmatch::features::{expires_in_hours, Feature, FeatureFlag, FeatureService, FeatureStore};
use mixmatch::keys::CamelotPosition;
use mixmatch::matching::{CancelToken, MatchResult, MatchingService};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

type Matcher = MatchingService<Arc<SqliteStore>, FeatureService<Arc<SqliteStore>>>;

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug mixmatch match t1` - Enable debug logging
/// - `RUST_LOG=mixmatch::tempo=trace mixmatch bpm 128` - Per-pair scoring detail
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let settings = RuntimeConfig::load()?;
    let cancel = args.timeout.map_or_else(CancelToken::new, |secs| {
        CancelToken::with_timeout(Duration::from_secs(secs))
    });

    match args.command {
        Command::InitDb {
            force,
            enable_features,
        } => {
            let db_path = config::get_db_path()?;
            info!("Initializing catalog database at {}", db_path.display());
            let store = SqliteStore::init(&db_path, force)?;
            let features = FeatureService::new(store);
            features.seed_defaults()?;
            if enable_features {
                for feature in Feature::ALL {
                    features.set_flag(&FeatureFlag {
                        default_enabled: true,
                        ..feature.default_flag()
                    })?;
                }
            }
            println!("Created catalog at {}", db_path.display());
        }
        Command::Import { file } => {
            let store = open_store()?;
            let tracks = read_tracks(&file)?;
            let count = store.import_tracks(&args.user, &tracks)?;
            println!("Imported {count} tracks for '{}'", args.user);
        }
        Command::List => {
            let tracks = open_store()?.list_tracks(&args.user)?;
            if args.json {
                print_json(&tracks)?;
            } else {
                print_tracks(&tracks);
            }
        }
        Command::Match { track_id, limit } => {
            let matcher = build_matcher(&settings)?;
            let limit = limit.unwrap_or(matcher.config().default_limit);
            let results = matcher.find_compatible_tracks(&args.user, &track_id, limit, &cancel)?;
            print_results(&results, args.json)?;
        }
        Command::Bpm {
            bpm,
            tolerance,
            limit,
        } => {
            let matcher = build_matcher(&settings)?;
            let tolerance = tolerance.unwrap_or(matcher.config().default_tolerance_pct);
            let limit = limit.unwrap_or(matcher.config().default_limit);
            let results = matcher.find_bpm_compatible(&args.user, bpm, tolerance, limit, &cancel)?;
            print_results(&results, args.json)?;
        }
        Command::Key { key, limit } => {
            let matcher = build_matcher(&settings)?;
            let limit = limit.unwrap_or(matcher.config().default_limit);
            let results = matcher.find_key_compatible(&args.user, &key, limit, &cancel)?;
            print_results(&results, args.json)?;
        }
        Command::Wheel { key } => {
            print_wheel(&key, args.json)?;
        }
        Command::Feature { action } => {
            let store = open_store()?;
            let features = FeatureService::with_cache_ttl(store, settings.feature_cache_ttl());
            run_feature_action(&features, &args.user, action, args.json)?;
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            let shell = completion::shell_to_completion_shell(&shell);
            completion::generate_completions(shell, &mut cmd);
        }
        Command::CompleteTracks => {
            completion::print_track_completions(&args.user)?;
        }
    }

    Ok(())
}

fn open_store() -> Result<Arc<SqliteStore>> {
    let db_path = config::get_db_path()?;
    if !db_path.exists() {
        anyhow::bail!(
            "No catalog database at {}. Run `mixmatch init-db` first.",
            db_path.display()
        );
    }
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

fn build_matcher(settings: &RuntimeConfig) -> Result<Matcher> {
    let store = open_store()?;
    let gate = FeatureService::with_cache_ttl(Arc::clone(&store), settings.feature_cache_ttl());
    MatchingService::new(store, gate, settings.matching.clone())
}

fn read_tracks(path: &Path) -> Result<Vec<Track>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tracks: Vec<Track> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of tracks", path.display()))?;
    debug!("Read {} tracks from {}", tracks.len(), path.display());
    Ok(tracks)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tracks(tracks: &[Track]) {
    if tracks.is_empty() {
        println!("No tracks in catalog. Use `mixmatch import <file>` to add some.");
        return;
    }

    println!("{:<16} {:<24} {:<28} {:>7} {:>6}", "ID", "Artist", "Title", "BPM", "Key");
    println!("{}", "-".repeat(85));
    for track in tracks {
        let camelot = CamelotPosition::from_key(&track.musical_key)
            .map_or_else(|| "?".to_string(), |p| p.to_string());
        println!(
            "{:<16} {:<24} {:<28} {:>7.1} {:>6}",
            truncate(&track.id, 16),
            truncate(&track.artist, 24),
            truncate(&track.title, 28),
            track.bpm,
            camelot
        );
    }
    println!("\nTotal: {} tracks", tracks.len());
}

fn print_results(results: &[MatchResult], json: bool) -> Result<()> {
    if json {
        return print_json(results);
    }
    if results.is_empty() {
        println!("No compatible tracks found.");
        return Ok(());
    }

    println!(
        "{:>4} {:<16} {:<32} {:>6} {:>6} {:>6} {:<13} {:>6}",
        "#", "ID", "Track", "BPM", "Tempo", "Key", "Relation", "Score"
    );
    println!("{}", "-".repeat(96));
    for (rank, result) in results.iter().enumerate() {
        let label = format!("{} - {}", result.track.artist, result.track.title);
        println!(
            "{:>4} {:<16} {:<32} {:>6.1} {:>6} {:>6} {:<13} {:>6.3}",
            rank + 1,
            truncate(&result.track.id, 16),
            truncate(&label, 32),
            result.track.bpm,
            format_score(result.bpm_compatibility),
            format_score(result.key_compatibility),
            result.key_relation,
            result.overall_score
        );
    }
    Ok(())
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"))
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[derive(Serialize)]
struct WheelEntry {
    code: String,
    transition: String,
}

fn print_wheel(key: &str, json: bool) -> Result<()> {
    let position = CamelotPosition::from_key(key)
        .with_context(|| format!("'{key}' is not a recognised key"))?;

    let entries: Vec<WheelEntry> = position
        .compatible_keys()
        .into_iter()
        .filter_map(|target| {
            position.transition_to(target).map(|transition| WheelEntry {
                code: target.to_string(),
                transition: transition.to_string(),
            })
        })
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "key": key,
            "position": position.to_string(),
            "relative": position.relative().to_string(),
            "compatible": entries,
        }));
    }

    println!("{key} is {position} (relative {})", position.relative());
    for entry in entries {
        println!("  {:<4} {}", entry.code, entry.transition);
    }
    Ok(())
}

fn run_feature_action(
    features: &FeatureService<Arc<SqliteStore>>,
    user_id: &str,
    action: FeatureAction,
    json: bool,
) -> Result<()> {
    match action {
        FeatureAction::List => {
            let effective = features.user_features(user_id)?;
            if json {
                let rows: Vec<_> = effective
                    .iter()
                    .map(|(flag, enabled)| serde_json::json!({ "flag": flag, "enabled": enabled }))
                    .collect();
                return print_json(&rows);
            }

            println!(
                "{:<14} {:<14} {:>7} {:>7} {:>8}",
                "Feature", "Name", "Global", "Default", "For you"
            );
            for (flag, enabled) in &effective {
                println!(
                    "{:<14} {:<14} {:>7} {:>7} {:>8}",
                    flag.feature.key(),
                    flag.name,
                    flag.global_enabled,
                    flag.default_enabled,
                    enabled
                );
            }
            for entry in features.store().list_overrides(user_id)? {
                let reason = entry.reason.as_deref().unwrap_or("no reason given");
                println!("override: {} = {} ({reason})", entry.feature, entry.enabled);
            }
        }
        FeatureAction::Enable {
            feature,
            reason,
            expires_in,
        } => {
            features.set_override(user_id, feature, true, reason, expiry(expires_in)?)?;
            println!("{feature} enabled for '{user_id}'");
        }
        FeatureAction::Disable {
            feature,
            reason,
            expires_in,
        } => {
            features.set_override(user_id, feature, false, reason, expiry(expires_in)?)?;
            println!("{feature} disabled for '{user_id}'");
        }
        FeatureAction::Clear { feature } => {
            features.remove_override(user_id, feature)?;
            println!("{feature} override cleared for '{user_id}'");
        }
        FeatureAction::Flag {
            feature,
            global,
            default,
        } => {
            let mut flag = features
                .store()
                .get_flag(feature)?
                .unwrap_or_else(|| feature.default_flag());
            if let Some(global) = global {
                flag.global_enabled = global;
            }
            if let Some(default) = default {
                flag.default_enabled = default;
            }
            features.set_flag(&flag)?;
            println!(
                "{feature}: global {}, default {}",
                flag.global_enabled, flag.default_enabled
            );
        }
    }
    Ok(())
}

fn expiry(hours: Option<u64>) -> Result<Option<SystemTime>> {
    hours.map(expires_in_hours).transpose()
}
