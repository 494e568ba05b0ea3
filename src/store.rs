//! SQLite relational store for the dataset.
//!
//! Owns the schema and every query the pipeline issues. Functions take a
//! borrowed [`Connection`] (or [`Transaction`] through deref) so callers
//! control transaction boundaries.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    ArtistRecord, AudioFeatures, CanonicalTrack, LyricScore, LyricsCandidate, SkipReason,
    TrackStatus,
};

/// Rows per transaction for bulk inserts.
pub const WRITE_BATCH_SIZE: usize = 10_000;

const TRACK_COLUMNS: &str = "id, name, popularity, duration_ms, explicit, primary_artist_id, release_year,
     danceability, energy, key, loudness, mode, speechiness, acousticness,
     instrumentalness, liveness, valence, tempo, time_signature";

fn track_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT NOT NULL,
            name TEXT,
            popularity INTEGER,
            duration_ms INTEGER,
            explicit INTEGER,
            primary_artist_id TEXT NOT NULL,
            release_year INTEGER,
            danceability REAL,
            energy REAL,
            key INTEGER,
            loudness REAL,
            mode INTEGER,
            speechiness REAL,
            acousticness REAL,
            instrumentalness REAL,
            liveness REAL,
            valence REAL,
            tempo REAL,
            time_signature INTEGER,
            PRIMARY KEY (id, primary_artist_id),
            FOREIGN KEY (primary_artist_id) REFERENCES artists(id)
        );"
    )
}

/// Which of the two track tables to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTable {
    /// Every normalized catalog track
    Tracks,
    /// One canonical track per near-duplicate group
    Filtered,
}

impl TrackTable {
    fn name(self) -> &'static str {
        match self {
            TrackTable::Tracks => "tracks",
            TrackTable::Filtered => "tracks_filtered",
        }
    }
}

// ============================================================================
// Connection / Schema
// ============================================================================

/// Open an existing database. A missing file is a setup failure.
pub fn open_existing(path: &Path) -> Result<Connection> {
    if !path.exists() {
        bail!(
            "database '{}' does not exist (run `init-db` first)",
            path.display()
        );
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

/// Create the database file (and parent directories) if needed and ensure
/// every table exists.
pub fn create_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to create database {}", path.display()))?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Create all tables if absent. Idempotent.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS artists (
            id TEXT NOT NULL,
            followers REAL,
            name TEXT,
            popularity INTEGER,
            PRIMARY KEY (id)
        );

        CREATE TABLE IF NOT EXISTS genres (
            name TEXT NOT NULL,
            PRIMARY KEY (name)
        );

        CREATE TABLE IF NOT EXISTS artist_genres (
            artist_id TEXT NOT NULL,
            genre_name TEXT NOT NULL,
            PRIMARY KEY (artist_id, genre_name),
            FOREIGN KEY (artist_id) REFERENCES artists(id),
            FOREIGN KEY (genre_name) REFERENCES genres(name)
        );

        CREATE TABLE IF NOT EXISTS track_status (
            song_id TEXT NOT NULL,
            song_valid INTEGER,
            lyrics_skipped INTEGER NOT NULL DEFAULT 0,
            lyrics_stored INTEGER NOT NULL DEFAULT 0,
            skip_reason TEXT,
            generation INTEGER,
            PRIMARY KEY (song_id)
        );

        CREATE TABLE IF NOT EXISTS lyric_scores (
            song_id TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            diversity REAL NOT NULL,
            repetition REAL NOT NULL,
            PRIMARY KEY (song_id)
        );",
    )?;
    conn.execute_batch(&track_table_sql(TrackTable::Tracks.name()))?;
    conn.execute_batch(&track_table_sql(TrackTable::Filtered.name()))?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_tracks_artist_year ON tracks (primary_artist_id, release_year);",
    )?;
    Ok(())
}

// ============================================================================
// Catalog Inserts
// ============================================================================

/// Insert a track. Fails on duplicate (id, primary_artist_id).
pub fn insert_track(conn: &Connection, table: TrackTable, track: &CanonicalTrack) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} ({TRACK_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        table.name()
    );
    let f = &track.audio_features;
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params![
        track.track_id,
        track.name,
        track.popularity,
        track.duration_ms,
        track.explicit,
        track.primary_artist_id,
        track.release_year,
        f.danceability,
        f.energy,
        f.key,
        f.loudness,
        f.mode,
        f.speechiness,
        f.acousticness,
        f.instrumentalness,
        f.liveness,
        f.valence,
        f.tempo,
        f.time_signature,
    ])?;
    Ok(())
}

/// Insert an artist, its missing genres and the artist-genre links.
/// Returns the number of genres that did not exist before.
pub fn insert_artist(conn: &Connection, artist: &ArtistRecord) -> Result<usize> {
    conn.prepare_cached("INSERT INTO artists (id, followers, name, popularity) VALUES (?1, ?2, ?3, ?4)")?
        .execute(params![
            artist.artist_id,
            artist.followers,
            artist.name,
            artist.popularity
        ])?;

    let mut new_genres = 0;
    for genre in &artist.genres {
        new_genres += conn
            .prepare_cached("INSERT OR IGNORE INTO genres (name) VALUES (?1)")?
            .execute([genre])?;
        conn.prepare_cached(
            "INSERT OR IGNORE INTO artist_genres (artist_id, genre_name) VALUES (?1, ?2)",
        )?
        .execute(params![artist.artist_id, genre])?;
    }
    Ok(new_genres)
}

fn row_to_track(row: &Row<'_>) -> rusqlite::Result<CanonicalTrack> {
    Ok(CanonicalTrack {
        track_id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        popularity: row.get(2)?,
        duration_ms: row.get(3)?,
        explicit: row.get(4)?,
        primary_artist_id: row.get(5)?,
        release_year: row.get(6)?,
        audio_features: AudioFeatures {
            danceability: row.get(7)?,
            energy: row.get(8)?,
            key: row.get(9)?,
            loudness: row.get(10)?,
            mode: row.get(11)?,
            speechiness: row.get(12)?,
            acousticness: row.get(13)?,
            instrumentalness: row.get(14)?,
            liveness: row.get(15)?,
            valence: row.get(16)?,
            tempo: row.get(17)?,
            time_signature: row.get(18)?,
        },
    })
}

/// Tracks released in or after `cutoff_year`, ordered by artist then id.
pub fn tracks_since(conn: &Connection, cutoff_year: i32) -> Result<Vec<CanonicalTrack>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks
         WHERE release_year >= ?1
         ORDER BY primary_artist_id, id"
    ))?;
    let tracks = stmt
        .query_map([cutoff_year], row_to_track)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tracks)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// Track Status
// ============================================================================

/// Create a status row for every filtered track that has none yet.
///
/// `song_valid` is 1 when a provider search is possible: non-blank track
/// name and a known artist with a non-blank name. Returns rows created.
pub fn init_track_status(conn: &Connection) -> Result<usize> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO track_status (song_id, song_valid, lyrics_skipped, lyrics_stored)
         SELECT t.id,
                CASE WHEN TRIM(COALESCE(t.name, '')) <> ''
                      AND TRIM(COALESCE(a.name, '')) <> '' THEN 1 ELSE 0 END,
                0, 0
         FROM tracks_filtered t
         LEFT JOIN artists a ON a.id = t.primary_artist_id
         ORDER BY t.rowid",
        [],
    )?;
    Ok(created)
}

fn row_to_status(row: &Row<'_>) -> rusqlite::Result<TrackStatus> {
    let reason: Option<String> = row.get(4)?;
    Ok(TrackStatus {
        song_id: row.get(0)?,
        song_valid: row.get(1)?,
        lyrics_skipped: row.get(2)?,
        lyrics_stored: row.get(3)?,
        skip_reason: reason.as_deref().and_then(SkipReason::from_db_key),
        generation: row.get(5)?,
    })
}

pub fn get_track_status(conn: &Connection, song_id: &str) -> Result<Option<TrackStatus>> {
    let status = conn
        .query_row(
            "SELECT song_id, song_valid, lyrics_skipped, lyrics_stored, skip_reason, generation
             FROM track_status WHERE song_id = ?1",
            [song_id],
            row_to_status,
        )
        .optional()?;
    Ok(status)
}

/// Insert or replace a status row verbatim.
pub fn put_track_status(conn: &Connection, status: &TrackStatus) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO track_status
            (song_id, song_valid, lyrics_skipped, lyrics_stored, skip_reason, generation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            status.song_id,
            status.song_valid,
            status.lyrics_skipped,
            status.lyrics_stored,
            status.skip_reason.map(SkipReason::as_db_key),
            status.generation,
        ],
    )?;
    Ok(())
}

/// The acquisition working set: valid, never skipped, never stored.
pub fn select_working_set(conn: &Connection, limit: Option<usize>) -> Result<Vec<LyricsCandidate>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT ts.song_id, t.name, a.name
         FROM track_status ts
         JOIN tracks_filtered t ON t.id = ts.song_id
         JOIN artists a ON a.id = t.primary_artist_id
         WHERE ts.song_valid = 1
           AND ts.lyrics_skipped = 0
           AND ts.lyrics_stored = 0
         ORDER BY ts.rowid
         LIMIT ?1",
    )?;
    let candidates = stmt
        .query_map([limit], |row| {
            Ok(LyricsCandidate {
                song_id: row.get(0)?,
                title: row.get(1)?,
                artist: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(candidates)
}

/// Commit the STORED transition for one track in its own transaction.
pub fn mark_stored(conn: &mut Connection, song_id: &str, generation: i64) -> Result<()> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE track_status
         SET lyrics_stored = 1, lyrics_skipped = 0, skip_reason = NULL, generation = ?2
         WHERE song_id = ?1",
        params![song_id, generation],
    )?;
    if updated != 1 {
        bail!("no status row for track {song_id}");
    }
    tx.commit()?;
    Ok(())
}

/// Commit a permanent skip for one track in its own transaction.
pub fn mark_skipped(
    conn: &mut Connection,
    song_id: &str,
    reason: SkipReason,
    generation: i64,
) -> Result<()> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE track_status
         SET lyrics_skipped = 1, skip_reason = ?2, generation = ?3
         WHERE song_id = ?1",
        params![song_id, reason.as_db_key(), generation],
    )?;
    if updated != 1 {
        bail!("no status row for track {song_id}");
    }
    tx.commit()?;
    Ok(())
}

/// Reset a track to PENDING (reconcile repair).
pub fn reset_to_pending(conn: &Connection, song_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE track_status
         SET lyrics_stored = 0, lyrics_skipped = 0, skip_reason = NULL, generation = NULL
         WHERE song_id = ?1",
        [song_id],
    )?;
    Ok(())
}

/// Ids of every track whose status says lyrics are stored.
pub fn stored_song_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT song_id FROM track_status WHERE lyrics_stored = 1 ORDER BY rowid")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Ids of every track skipped because its lyrics file could not be written.
pub fn storage_failed_song_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT song_id FROM track_status
         WHERE lyrics_skipped = 1 AND skip_reason = ?1
         ORDER BY rowid",
    )?;
    let ids = stmt
        .query_map([SkipReason::StorageFailed.as_db_key()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

// ============================================================================
// Lyric Scores
// ============================================================================

/// Stored tracks without a score row (left-join exclusion).
pub fn select_unscored(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT ts.song_id
         FROM track_status ts
         LEFT JOIN lyric_scores ls ON ls.song_id = ts.song_id
         WHERE ts.lyrics_stored = 1
           AND ls.song_id IS NULL
         ORDER BY ts.rowid",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn insert_lyric_score(conn: &Connection, score: &LyricScore) -> Result<()> {
    conn.execute(
        "INSERT INTO lyric_scores (song_id, word_count, diversity, repetition)
         VALUES (?1, ?2, ?3, ?4)",
        params![score.song_id, score.word_count, score.diversity, score.repetition],
    )?;
    Ok(())
}

pub fn get_lyric_score(conn: &Connection, song_id: &str) -> Result<Option<LyricScore>> {
    let score = conn
        .query_row(
            "SELECT song_id, word_count, diversity, repetition FROM lyric_scores WHERE song_id = ?1",
            [song_id],
            |row| {
                Ok(LyricScore {
                    song_id: row.get(0)?,
                    word_count: row.get(1)?,
                    diversity: row.get(2)?,
                    repetition: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(score)
}

// ============================================================================
// Test fixtures
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
