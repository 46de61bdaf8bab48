//! Track catalog collaborator.
//!
//! The matcher never owns tracks. It asks a [`Catalog`] for a source track and
//! for the pool of candidates visible to a user, and treats both as read-only
//! snapshots.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Read-only projection of a catalogued track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Beats per minute, `0.0` when unknown.
    #[serde(default)]
    pub bpm: f64,
    /// Free-text key label, possibly empty or unparseable.
    #[serde(default)]
    pub musical_key: String,
}

/// Source of tracks for matching.
///
/// Implementations must be shareable across threads; lookups may block on
/// I/O and report failures through `anyhow`.
pub trait Catalog: Send + Sync {
    /// Look up a single track owned by `user_id`. `Ok(None)` when it does not exist.
    fn get_track(&self, user_id: &str, track_id: &str) -> Result<Option<Track>>;

    /// Snapshot of every track `user_id` may match against, in a stable order.
    fn list_candidate_tracks(&self, user_id: &str) -> Result<Vec<Track>>;
}

impl<C: Catalog + ?Sized> Catalog for std::sync::Arc<C> {
    fn get_track(&self, user_id: &str, track_id: &str) -> Result<Option<Track>> {
        (**self).get_track(user_id, track_id)
    }

    fn list_candidate_tracks(&self, user_id: &str) -> Result<Vec<Track>> {
        (**self).list_candidate_tracks(user_id)
    }
}
