//! SQLite-backed catalog and feature store.
//!
//! One database file holds the user's tracks plus the feature flags and
//! per-user overrides. [`SqliteStore`] implements both [`Catalog`] and
//! [`FeatureStore`], so the CLI can wire a matcher from a single path.

use crate::catalog::{Catalog, Track};
use crate::features::{Feature, FeatureFlag, FeatureOverride, FeatureStore};
use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        position    INTEGER PRIMARY KEY AUTOINCREMENT,
        id          TEXT    NOT NULL,
        user_id     TEXT    NOT NULL,
        title       TEXT    NOT NULL DEFAULT '',
        artist      TEXT    NOT NULL DEFAULT '',
        bpm         REAL    NOT NULL DEFAULT 0,
        musical_key TEXT    NOT NULL DEFAULT '',
        UNIQUE(user_id, id)
    );
    CREATE INDEX IF NOT EXISTS idx_tracks_user ON tracks(user_id);

    CREATE TABLE IF NOT EXISTS feature_flags (
        key             TEXT    PRIMARY KEY,
        name            TEXT    NOT NULL,
        description     TEXT    NOT NULL DEFAULT '',
        global_enabled  INTEGER NOT NULL,
        default_enabled INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS feature_overrides (
        user_id     TEXT    NOT NULL,
        feature_key TEXT    NOT NULL,
        enabled     INTEGER NOT NULL,
        reason      TEXT,
        expires_at  INTEGER,
        PRIMARY KEY (user_id, feature_key)
    );
";

/// Thread-safe handle to the catalog database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database at {}", path.display()))?;
        debug!("Opened catalog database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create any missing tables. Safe to call repeatedly.
    pub fn init_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(SCHEMA)
            .context("Failed to create catalog schema")
    }

    /// Create a fresh database file, removing an existing one only when `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<Self> {
        if path.exists() {
            if !force {
                anyhow::bail!(
                    "Database already exists at {}. Use --force to recreate it.",
                    path.display()
                );
            }
            info!("Removing existing database at {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Self::open(path)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace one track owned by `user_id`.
    pub fn insert_track(&self, user_id: &str, track: &Track) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tracks (id, user_id, title, artist, bpm, musical_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, id) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    bpm = excluded.bpm,
                    musical_key = excluded.musical_key",
                params![track.id, user_id, track.title, track.artist, track.bpm, track.musical_key],
            )
            .with_context(|| format!("Failed to insert track '{}'", track.id))?;
        Ok(())
    }

    /// Insert many tracks in one transaction. Returns how many were written.
    pub fn import_tracks(&self, user_id: &str, tracks: &[Track]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO tracks (id, user_id, title, artist, bpm, musical_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, id) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    bpm = excluded.bpm,
                    musical_key = excluded.musical_key",
            )?;

            for track in tracks {
                stmt.execute(params![
                    track.id,
                    user_id,
                    track.title,
                    track.artist,
                    track.bpm,
                    track.musical_key
                ])
                .with_context(|| format!("Failed to import track {track:?}"))?;
            }
        }

        tx.commit().context("Committing track import failed")?;
        info!("Imported {} tracks for '{user_id}'", tracks.len());
        Ok(tracks.len())
    }

    /// All tracks owned by `user_id`, in insertion order.
    pub fn list_tracks(&self, user_id: &str) -> Result<Vec<Track>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, artist, bpm, musical_key FROM tracks
                 WHERE user_id = ?1 ORDER BY position",
            )
            .context("Invalid SQL statement when SELECTing tracks")?;

        let rows = stmt
            .query_map([user_id], track_from_row)
            .context("Cannot query tracks")?;

        let mut tracks = Vec::new();
        for track in rows {
            tracks.push(track.context("Failed to read track row")?);
        }
        Ok(tracks)
    }
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        bpm: row.get(3)?,
        musical_key: row.get(4)?,
    })
}

fn flag_from_row(row: &Row<'_>) -> rusqlite::Result<Option<FeatureFlag>> {
    let key: String = row.get(0)?;
    // Rows for features this build does not know about are skipped.
    let Ok(feature) = key.parse::<Feature>() else {
        return Ok(None);
    };
    Ok(Some(FeatureFlag {
        feature,
        name: row.get(1)?,
        description: row.get(2)?,
        global_enabled: row.get(3)?,
        default_enabled: row.get(4)?,
    }))
}

fn override_from_row(row: &Row<'_>) -> rusqlite::Result<Option<FeatureOverride>> {
    let key: String = row.get(1)?;
    let Ok(feature) = key.parse::<Feature>() else {
        return Ok(None);
    };
    let expires_at: Option<i64> = row.get(4)?;
    Ok(Some(FeatureOverride {
        user_id: row.get(0)?,
        feature,
        enabled: row.get(2)?,
        reason: row.get(3)?,
        expires_at: expires_at.map(from_unix_secs),
    }))
}

fn to_unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

fn from_unix_secs(secs: i64) -> SystemTime {
    let magnitude = Duration::from_secs(secs.unsigned_abs());
    if secs >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

impl Catalog for SqliteStore {
    fn get_track(&self, user_id: &str, track_id: &str) -> Result<Option<Track>> {
        self.conn()
            .query_row(
                "SELECT id, title, artist, bpm, musical_key FROM tracks
                 WHERE user_id = ?1 AND id = ?2",
                [user_id, track_id],
                track_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query track '{track_id}'"))
    }

    fn list_candidate_tracks(&self, user_id: &str) -> Result<Vec<Track>> {
        self.list_tracks(user_id)
    }
}

impl FeatureStore for SqliteStore {
    fn get_flag(&self, feature: Feature) -> Result<Option<FeatureFlag>> {
        let flag = self
            .conn()
            .query_row(
                "SELECT key, name, description, global_enabled, default_enabled
                 FROM feature_flags WHERE key = ?1",
                [feature.key()],
                flag_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query feature flag {feature}"))?;
        Ok(flag.flatten())
    }

    fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, name, description, global_enabled, default_enabled
             FROM feature_flags ORDER BY key",
        )?;
        let rows = stmt.query_map([], flag_from_row)?;

        let mut flags = Vec::new();
        for flag in rows {
            flags.extend(flag.context("Failed to read feature flag row")?);
        }
        Ok(flags)
    }

    fn put_flag(&self, flag: &FeatureFlag) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO feature_flags (key, name, description, global_enabled, default_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    global_enabled = excluded.global_enabled,
                    default_enabled = excluded.default_enabled",
                params![
                    flag.feature.key(),
                    flag.name,
                    flag.description,
                    flag.global_enabled,
                    flag.default_enabled
                ],
            )
            .with_context(|| format!("Failed to store feature flag {}", flag.feature))?;
        Ok(())
    }

    fn get_override(&self, user_id: &str, feature: Feature) -> Result<Option<FeatureOverride>> {
        let found = self
            .conn()
            .query_row(
                "SELECT user_id, feature_key, enabled, reason, expires_at
                 FROM feature_overrides WHERE user_id = ?1 AND feature_key = ?2",
                [user_id, feature.key()],
                override_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query {feature} override for '{user_id}'"))?;
        Ok(found.flatten())
    }

    fn list_overrides(&self, user_id: &str) -> Result<Vec<FeatureOverride>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, feature_key, enabled, reason, expires_at
             FROM feature_overrides WHERE user_id = ?1 ORDER BY feature_key",
        )?;
        let rows = stmt.query_map([user_id], override_from_row)?;

        let mut overrides = Vec::new();
        for found in rows {
            overrides.extend(found.context("Failed to read feature override row")?);
        }
        Ok(overrides)
    }

    fn put_override(&self, feature_override: &FeatureOverride) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO feature_overrides (user_id, feature_key, enabled, reason, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, feature_key) DO UPDATE SET
                    enabled = excluded.enabled,
                    reason = excluded.reason,
                    expires_at = excluded.expires_at",
                params![
                    feature_override.user_id,
                    feature_override.feature.key(),
                    feature_override.enabled,
                    feature_override.reason,
                    feature_override.expires_at.map(to_unix_secs)
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to store {} override for '{}'",
                    feature_override.feature, feature_override.user_id
                )
            })?;
        Ok(())
    }

    fn delete_override(&self, user_id: &str, feature: Feature) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM feature_overrides WHERE user_id = ?1 AND feature_key = ?2",
                [user_id, feature.key()],
            )
            .with_context(|| format!("Failed to delete {feature} override for '{user_id}'"))?;
        Ok(())
    }
}
