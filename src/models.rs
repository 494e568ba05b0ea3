//! Core data models for the lyrics dataset pipeline.
//!
//! This module contains the catalog records produced by the row normalizer,
//! the per-track acquisition status and the lyric score rows.

use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Catalog Models
// ============================================================================

/// Spotify audio features carried through from the tracks catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub key: i32, // pitch class, -1 when unknown
    pub loudness: f64,
    pub mode: i32, // 0=minor, 1=major
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub time_signature: i32,
}

/// A normalized track row. Only one artist survives normalization: the first
/// id of the raw `id_artists` list.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalTrack {
    pub track_id: String,
    pub name: String,
    pub popularity: i64,
    pub duration_ms: i64,
    pub explicit: bool,
    pub primary_artist_id: String,
    pub release_year: i32,
    pub audio_features: AudioFeatures,
}

/// A normalized artist row (genres are split off into [`ArtistRecord::genres`]).
#[derive(Clone, Debug, PartialEq)]
pub struct ArtistRecord {
    pub artist_id: String,
    pub followers: Option<f64>,
    pub name: String,
    pub popularity: i64,
    pub genres: BTreeSet<String>,
}

// ============================================================================
// Acquisition Models
// ============================================================================

/// Why a track was permanently skipped during lyrics acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Provider request failed (not found, network, auth, ...)
    FetchFailed,
    /// Provider returned text that did not pass the validity filter
    Invalid,
    /// Lyrics file could not be written; cleared by `reconcile --repair`
    StorageFailed,
}

impl SkipReason {
    pub fn as_db_key(self) -> &'static str {
        match self {
            SkipReason::FetchFailed => "fetch_failed",
            SkipReason::Invalid => "invalid",
            SkipReason::StorageFailed => "storage_failed",
        }
    }

    pub fn from_db_key(value: &str) -> Option<Self> {
        match value {
            "fetch_failed" => Some(SkipReason::FetchFailed),
            "invalid" => Some(SkipReason::Invalid),
            "storage_failed" => Some(SkipReason::StorageFailed),
            _ => None,
        }
    }
}

/// Acquisition state of a single track, derived from its status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    FetchFailed,
    Invalid,
    StorageFailed,
    Stored,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrackState::Pending => "PENDING",
            TrackState::FetchFailed => "FETCH_FAILED",
            TrackState::Invalid => "INVALID",
            TrackState::StorageFailed => "STORAGE_FAILED",
            TrackState::Stored => "STORED",
        };
        f.write_str(label)
    }
}

/// Durable per-track acquisition checkpoint (one row in `track_status`).
#[derive(Clone, Debug, PartialEq)]
pub struct TrackStatus {
    pub song_id: String,
    /// `None` until `init-status` has evaluated the track.
    pub song_valid: Option<bool>,
    pub lyrics_skipped: bool,
    pub lyrics_stored: bool,
    pub skip_reason: Option<SkipReason>,
    pub generation: Option<i64>,
}

impl TrackStatus {
    /// Fresh status for a canonical track that has not been attempted yet.
    pub fn pending(song_id: impl Into<String>, song_valid: bool) -> Self {
        Self {
            song_id: song_id.into(),
            song_valid: Some(song_valid),
            lyrics_skipped: false,
            lyrics_stored: false,
            skip_reason: None,
            generation: None,
        }
    }

    pub fn state(&self) -> TrackState {
        if self.lyrics_stored {
            TrackState::Stored
        } else if self.lyrics_skipped {
            match self.skip_reason {
                Some(SkipReason::Invalid) => TrackState::Invalid,
                Some(SkipReason::StorageFailed) => TrackState::StorageFailed,
                _ => TrackState::FetchFailed,
            }
        } else {
            TrackState::Pending
        }
    }

    /// Whether the track belongs to the acquisition working set.
    pub fn in_working_set(&self) -> bool {
        self.song_valid == Some(true) && !self.lyrics_skipped && !self.lyrics_stored
    }
}

/// Working-set entry: everything the provider search needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricsCandidate {
    pub song_id: String,
    pub title: String,
    pub artist: String,
}

// ============================================================================
// Lyric Scores
// ============================================================================

/// Text metrics of one lyrics text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LyricMetrics {
    pub word_count: usize,
    /// distinct tokens / word_count, in (0, 1]
    pub diversity: f64,
    /// repeated extra occurrences / word_count, in [0, 1)
    pub repetition: f64,
}

/// A `lyric_scores` row.
#[derive(Clone, Debug, PartialEq)]
pub struct LyricScore {
    pub song_id: String,
    pub word_count: i64,
    pub diversity: f64,
    pub repetition: f64,
}

impl LyricScore {
    pub fn new(song_id: impl Into<String>, metrics: LyricMetrics) -> Self {
        Self {
            song_id: song_id.into(),
            word_count: metrics.word_count as i64,
            diversity: metrics.diversity,
            repetition: metrics.repetition,
        }
    }
}
