//! # Shell Completion Module
//!
//! Static completion scripts come from clap; track ids for `match` are
//! listed at completion time by the hidden `complete-tracks` command.
//!
//! ## Usage
//!
//! ```bash
//! mixmatch completion bash > ~/.local/share/bash-completion/completions/mixmatch
//! mixmatch completion zsh > ~/.config/zsh/completions/_mixmatch
//! ```

use crate::catalog::Catalog;
use crate::config;
use crate::db::SqliteStore;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Track ids of `user_id`, sorted and deduplicated.
pub fn track_completions<C: Catalog>(catalog: &C, user_id: &str) -> Result<Vec<String>> {
    let mut ids: Vec<String> = catalog
        .list_candidate_tracks(user_id)?
        .into_iter()
        .map(|track| track.id)
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Quote a completion candidate when the shell would split it.
#[must_use]
pub fn quote_for_shell(candidate: &str) -> String {
    if candidate.contains(char::is_whitespace) {
        format!("\"{}\"", candidate.replace('"', "\\\""))
    } else {
        candidate.to_string()
    }
}

/// Print track ids from the default database for shell completion.
///
/// Completion must never break the user's shell, so a missing or unreadable
/// database prints nothing.
pub fn print_track_completions(user_id: &str) -> Result<()> {
    let Ok(db_path) = config::get_db_path() else {
        return Ok(());
    };
    if !db_path.exists() {
        return Ok(());
    }

    let Ok(store) = SqliteStore::open(&db_path) else {
        return Ok(());
    };
    let completions = track_completions(&store, user_id).unwrap_or_default();

    for completion in completions {
        println!("{}", quote_for_shell(&completion));
    }

    Ok(())
}
