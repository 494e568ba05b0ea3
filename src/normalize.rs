//! Row normalization for the Spotify catalog.
//!
//! Turns raw CSV rows into [`CanonicalTrack`] and [`ArtistRecord`] values.
//! Every function here is a pure transform: a malformed row yields a
//! [`RowError`] and the caller decides whether to log and continue.

use std::collections::BTreeSet;
use std::str::FromStr;

use thiserror::Error;

use crate::models::{ArtistRecord, AudioFeatures, CanonicalTrack};

// ============================================================================
// ROW LAYOUT
// ============================================================================

/// Field count of a tracks.csv row.
pub const TRACK_ROW_ARITY: usize = 20;

/// Field count of an artists.csv row.
pub const ARTIST_ROW_ARITY: usize = 5;

mod track_col {
    pub const ID: usize = 0;
    pub const NAME: usize = 1;
    pub const POPULARITY: usize = 2;
    pub const DURATION_MS: usize = 3;
    pub const EXPLICIT: usize = 4;
    // 5 = artist names, dropped
    pub const ID_ARTISTS: usize = 6;
    pub const RELEASE_DATE: usize = 7;
    pub const DANCEABILITY: usize = 8;
    pub const ENERGY: usize = 9;
    pub const KEY: usize = 10;
    pub const LOUDNESS: usize = 11;
    pub const MODE: usize = 12;
    pub const SPEECHINESS: usize = 13;
    pub const ACOUSTICNESS: usize = 14;
    pub const INSTRUMENTALNESS: usize = 15;
    pub const LIVENESS: usize = 16;
    pub const VALENCE: usize = 17;
    pub const TEMPO: usize = 18;
    pub const TIME_SIGNATURE: usize = 19;
}

mod artist_col {
    pub const ID: usize = 0;
    pub const FOLLOWERS: usize = 1;
    pub const GENRES: usize = 2;
    pub const NAME: usize = 3;
    pub const POPULARITY: usize = 4;
}

// ============================================================================
// ERRORS
// ============================================================================

/// Reason a catalog row was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row is empty")]
    Empty,
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("field '{field}' has unparsable value '{value}'")]
    Field { field: &'static str, value: String },
    #[error("artist id list '{0}' is empty")]
    MissingArtist(String),
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

fn check_arity<S: AsRef<str>>(row: &[S], expected: usize) -> Result<(), RowError> {
    if row.is_empty() {
        return Err(RowError::Empty);
    }
    if row.len() != expected {
        return Err(RowError::Arity {
            expected,
            found: row.len(),
        });
    }
    Ok(())
}

fn parse_field<T: FromStr>(row: &[impl AsRef<str>], idx: usize, field: &'static str) -> Result<T, RowError> {
    let raw = row[idx].as_ref().trim();
    raw.parse::<T>().map_err(|_| RowError::Field {
        field,
        value: raw.to_string(),
    })
}

/// Integer columns are sometimes exported as floats ("4.0").
fn parse_int_field(row: &[impl AsRef<str>], idx: usize, field: &'static str) -> Result<i64, RowError> {
    let raw = row[idx].as_ref().trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(RowError::Field {
            field,
            value: raw.to_string(),
        }),
    }
}

fn parse_bool_field(row: &[impl AsRef<str>], idx: usize, field: &'static str) -> Result<bool, RowError> {
    let raw = row[idx].as_ref().trim();
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(RowError::Field {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Extract the year from a release date ("1922-02-22", "1922-02", "1922").
fn parse_release_year(raw: &str) -> Result<i32, RowError> {
    let raw = raw.trim();
    let prefix: String = raw.chars().take(4).collect();
    if prefix.len() != 4 || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(RowError::Field {
            field: "release_date",
            value: raw.to_string(),
        });
    }
    prefix.parse::<i32>().map_err(|_| RowError::Field {
        field: "release_date",
        value: raw.to_string(),
    })
}

// ============================================================================
// LIST LITERALS
// ============================================================================

/// Parse a list-like literal as exported in the Spotify CSVs.
///
/// Accepts `['a', 'b']`, `["it's", 'b']`, `[]` and bare `a, b`. Items are
/// trimmed and stripped of their quotes; empty items are dropped. Commas
/// inside quotes do not split.
pub fn parse_list_literal(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in inner.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => quote = Some(c),
                ',' => {
                    push_item(&mut items, &current);
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    push_item(&mut items, &current);

    items
}

fn push_item(items: &mut Vec<String>, raw: &str) {
    let item = raw.trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
}

// ============================================================================
// ROW NORMALIZATION
// ============================================================================

/// Normalize a tracks.csv row.
///
/// Takes the first artist id of `id_artists` as the primary artist, keeps the
/// 4-digit year of `release_date` and drops the artist-name list.
pub fn normalize_track<S: AsRef<str>>(row: &[S]) -> Result<CanonicalTrack, RowError> {
    use track_col as c;
    check_arity(row, TRACK_ROW_ARITY)?;

    let artist_ids_raw = row[c::ID_ARTISTS].as_ref();
    let primary_artist_id = parse_list_literal(artist_ids_raw)
        .into_iter()
        .next()
        .ok_or_else(|| RowError::MissingArtist(artist_ids_raw.to_string()))?;

    let track_id = row[c::ID].as_ref().trim().to_string();
    if track_id.is_empty() {
        return Err(RowError::Field {
            field: "id",
            value: String::new(),
        });
    }

    Ok(CanonicalTrack {
        track_id,
        name: row[c::NAME].as_ref().to_string(),
        popularity: parse_int_field(row, c::POPULARITY, "popularity")?,
        duration_ms: parse_int_field(row, c::DURATION_MS, "duration_ms")?,
        explicit: parse_bool_field(row, c::EXPLICIT, "explicit")?,
        primary_artist_id,
        release_year: parse_release_year(row[c::RELEASE_DATE].as_ref())?,
        audio_features: AudioFeatures {
            danceability: parse_field(row, c::DANCEABILITY, "danceability")?,
            energy: parse_field(row, c::ENERGY, "energy")?,
            key: parse_int_field(row, c::KEY, "key")? as i32,
            loudness: parse_field(row, c::LOUDNESS, "loudness")?,
            mode: parse_int_field(row, c::MODE, "mode")? as i32,
            speechiness: parse_field(row, c::SPEECHINESS, "speechiness")?,
            acousticness: parse_field(row, c::ACOUSTICNESS, "acousticness")?,
            instrumentalness: parse_field(row, c::INSTRUMENTALNESS, "instrumentalness")?,
            liveness: parse_field(row, c::LIVENESS, "liveness")?,
            valence: parse_field(row, c::VALENCE, "valence")?,
            tempo: parse_field(row, c::TEMPO, "tempo")?,
            time_signature: parse_int_field(row, c::TIME_SIGNATURE, "time_signature")? as i32,
        },
    })
}

/// Normalize an artists.csv row, splitting the genre list into a set.
pub fn normalize_artist<S: AsRef<str>>(row: &[S]) -> Result<ArtistRecord, RowError> {
    use artist_col as c;
    check_arity(row, ARTIST_ROW_ARITY)?;

    let artist_id = row[c::ID].as_ref().trim().to_string();
    if artist_id.is_empty() {
        return Err(RowError::Field {
            field: "id",
            value: String::new(),
        });
    }

    let followers = if row[c::FOLLOWERS].as_ref().trim().is_empty() {
        None
    } else {
        Some(parse_field::<f64>(row, c::FOLLOWERS, "followers")?)
    };

    let genres: BTreeSet<String> = parse_list_literal(row[c::GENRES].as_ref())
        .into_iter()
        .collect();

    Ok(ArtistRecord {
        artist_id,
        followers,
        name: row[c::NAME].as_ref().to_string(),
        popularity: parse_int_field(row, c::POPULARITY, "popularity")?,
        genres,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn track_row() -> Vec<String> {
        [
            "35iwgR4jXetI318WEWsa1Q",
            "Carve",
            "6",
            "126903",
            "0",
            "['Uli', 'Guest']",
            "['45tIt06XoI0Iio4LBEVpls', '0DheY5irMjBUeLybbCUEZ2']",
            "1922-02-22",
            "0.645",
            "0.445",
            "0",
            "-13.338",
            "1",
            "0.451",
            "0.674",
            "0.744",
            "0.151",
            "0.127",
            "104.851",
            "3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_normalize_track_basic() {
        let track = normalize_track(&track_row()).unwrap();
        assert_eq!(track.track_id, "35iwgR4jXetI318WEWsa1Q");
        assert_eq!(track.name, "Carve");
        assert_eq!(track.primary_artist_id, "45tIt06XoI0Iio4LBEVpls");
        assert_eq!(track.release_year, 1922);
        assert!(!track.explicit);
        assert_eq!(track.audio_features.key, 0);
        assert_eq!(track.audio_features.time_signature, 3);
        assert!((track.audio_features.tempo - 104.851).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_track_year_only_release_date() {
        let mut row = track_row();
        row[7] = "1999".to_string();
        assert_eq!(normalize_track(&row).unwrap().release_year, 1999);
    }

    #[test]
    fn test_normalize_track_rejects_wrong_arity() {
        let mut row = track_row();
        row.pop();
        assert_eq!(
            normalize_track(&row),
            Err(RowError::Arity {
                expected: 20,
                found: 19
            })
        );
        let empty: Vec<String> = Vec::new();
        assert_eq!(normalize_track(&empty), Err(RowError::Empty));
    }

    #[test]
    fn test_normalize_track_rejects_empty_artist_list() {
        let mut row = track_row();
        row[6] = "[]".to_string();
        assert!(matches!(normalize_track(&row), Err(RowError::MissingArtist(_))));
    }

    #[test]
    fn test_normalize_track_rejects_bad_number() {
        let mut row = track_row();
        row[2] = "popular".to_string();
        assert!(matches!(
            normalize_track(&row),
            Err(RowError::Field { field: "popularity", .. })
        ));
        let mut row = track_row();
        row[7] = "22-02".to_string();
        assert!(matches!(
            normalize_track(&row),
            Err(RowError::Field { field: "release_date", .. })
        ));
    }

    #[test]
    fn test_normalize_artist_genres() {
        let row = [
            "0DheY5irMjBUeLybbCUEZ2",
            "91.0",
            "['dance pop', \"children's music\", 'pop', 'pop', '']",
            "Uli",
            "4",
        ];
        let artist = normalize_artist(&row).unwrap();
        assert_eq!(artist.artist_id, "0DheY5irMjBUeLybbCUEZ2");
        assert_eq!(artist.followers, Some(91.0));
        assert_eq!(artist.name, "Uli");
        assert_eq!(artist.popularity, 4);
        let genres: Vec<&str> = artist.genres.iter().map(|s| s.as_str()).collect();
        assert_eq!(genres, vec!["children's music", "dance pop", "pop"]);
    }

    #[test]
    fn test_normalize_artist_empty_followers_and_genres() {
        let row = ["id1", "", "[]", "Nobody", "0"];
        let artist = normalize_artist(&row).unwrap();
        assert_eq!(artist.followers, None);
        assert!(artist.genres.is_empty());
    }

    #[test]
    fn test_normalize_artist_rejects_wrong_arity() {
        let row = ["id1", "1.0", "[]", "Name"];
        assert_eq!(
            normalize_artist(&row),
            Err(RowError::Arity {
                expected: 5,
                found: 4
            })
        );
    }

    #[test]
    fn test_parse_list_literal() {
        assert_eq!(parse_list_literal("['a', 'b']"), vec!["a", "b"]);
        assert_eq!(parse_list_literal("[\"it's\", 'x, y']"), vec!["it's", "x, y"]);
        assert_eq!(parse_list_literal("[]"), Vec::<String>::new());
        assert_eq!(parse_list_literal("  [ ' padded ' ] "), vec!["padded"]);
        assert_eq!(parse_list_literal("a, b"), vec!["a", "b"]);
    }
}
