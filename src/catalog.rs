//! Spotify catalog import (tracks.csv / artists.csv).
//!
//! Rows are read with the `csv` crate, normalized, and inserted inside a
//! savepoint each, batched into transactions of [`WRITE_BATCH_SIZE`] rows.
//! A bad row (malformed CSV record, wrong arity, duplicate key) is rolled
//! back, logged and skipped; the import continues.

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::normalize::{normalize_artist, normalize_track};
use crate::progress::{create_spinner, format_duration, log_progress};
use crate::store::{self, TrackTable, WRITE_BATCH_SIZE};
use crate::summary::RunSummary;

/// Which catalog file is being imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Tracks,
    Artists,
}

impl CatalogKind {
    pub fn phase(self) -> &'static str {
        match self {
            CatalogKind::Tracks => "import-tracks",
            CatalogKind::Artists => "import-artists",
        }
    }
}

/// Iterate over the data rows of a catalog CSV (the header row is skipped).
/// Each item is either the row's fields or the CSV error for that record.
pub fn read_rows<R: Read>(reader: R) -> impl Iterator<Item = Result<Vec<String>, csv::Error>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
        .into_records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
}

/// Normalize and insert one row.
fn import_row(conn: &Connection, kind: CatalogKind, row: &[String]) -> Result<()> {
    match kind {
        CatalogKind::Tracks => {
            let track = normalize_track(row)?;
            store::insert_track(conn, TrackTable::Tracks, &track)
                .with_context(|| format!("insert track '{}'", track.name))?;
        }
        CatalogKind::Artists => {
            let artist = normalize_artist(row)?;
            let new_genres = store::insert_artist(conn, &artist)
                .with_context(|| format!("insert artist '{}'", artist.name))?;
            if new_genres > 0 {
                tracing::debug!("Inserted {} new genres for artist {}", new_genres, artist.artist_id);
            }
        }
    }
    Ok(())
}

/// Import every row from `reader` into the catalog tables.
pub fn import_catalog<R: Read>(conn: &mut Connection, kind: CatalogKind, reader: R) -> Result<RunSummary> {
    let start = Instant::now();
    let phase = kind.phase();
    let spinner = create_spinner(&format!("{phase}: importing rows"));

    let mut summary = RunSummary::new(phase);
    let mut rows = read_rows(reader).enumerate().peekable();

    while rows.peek().is_some() {
        let mut tx = conn.transaction()?;
        for (line, record) in rows.by_ref().take(WRITE_BATCH_SIZE) {
            summary.total += 1;
            let row = match record {
                Ok(row) => row,
                Err(err) => {
                    warn!("Skipping malformed CSV record {}: {}", line + 1, err);
                    summary.record_skip(format!("record:{}", line + 1));
                    continue;
                }
            };
            let row_id = row.first().cloned().unwrap_or_else(|| format!("record:{}", line + 1));

            let sp = tx.savepoint()?;
            match import_row(&sp, kind, &row) {
                Ok(()) => {
                    sp.commit()?;
                    summary.succeeded += 1;
                }
                Err(err) => {
                    // dropping the savepoint rolls the row back
                    drop(sp);
                    warn!("Skipping row with id {}: {:#}", row_id, err);
                    summary.record_skip(row_id);
                }
            }
            spinner.inc(1);
            log_progress(phase, summary.total, None, 100_000);
        }
        tx.commit()?;
    }

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    spinner.finish_with_message(format!(
        "{phase}: {} rows imported in {}",
        summary.succeeded,
        format_duration(start.elapsed())
    ));
    if summary.skipped > 0 {
        warn!("Skipped {} of {} rows", summary.skipped, summary.total);
    }
    info!("Completed {phase}");
    Ok(summary)
}

/// Open `csv_path` and import it.
pub fn import_catalog_file(conn: &mut Connection, kind: CatalogKind, csv_path: &Path) -> Result<RunSummary> {
    info!("Reading {} from {}", kind.phase(), csv_path.display());
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open catalog file {}", csv_path.display()))?;
    import_catalog(conn, kind, std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::memory_db;
    use crate::store::count_rows;

    const TRACKS_CSV: &str = "\
id,name,popularity,duration_ms,explicit,artists,id_artists,release_date,danceability,energy,key,loudness,mode,speechiness,acousticness,instrumentalness,liveness,valence,tempo,time_signature
t1,Song,50,200000,0,['Uli'],['a1'],2001-05-01,0.5,0.5,1,-5.0,1,0.05,0.1,0.0,0.1,0.5,120.0,4
t2,\"Song, Again\",60,210000,1,\"['Uli', 'X']\",\"['a1', 'a2']\",2003,0.5,0.5,1,-5.0,1,0.05,0.1,0.0,0.1,0.5,120.0,4
t3,Short,1,2,3
t1,Song,50,200000,0,['Uli'],['a1'],2001-05-01,0.5,0.5,1,-5.0,1,0.05,0.1,0.0,0.1,0.5,120.0,4
t4,Bad,x,200000,0,['Uli'],['a1'],2001,0.5,0.5,1,-5.0,1,0.05,0.1,0.0,0.1,0.5,120.0,4
";

    #[test]
    fn test_read_rows_skips_header() {
        let rows: Vec<_> = read_rows("a,b\n1,2\n3,4\n".as_bytes())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn test_import_tracks_skips_bad_rows_and_continues() {
        let mut conn = memory_db();
        let summary = import_catalog(&mut conn, CatalogKind::Tracks, TRACKS_CSV.as_bytes()).unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.skipped_ids, vec!["t3", "t1", "t4"]);
        assert_eq!(count_rows(&conn, "tracks").unwrap(), 2);
    }

    #[test]
    fn test_import_artists_with_genres() {
        let csv = "id,followers,genres,name,popularity\n\
                   a1,10.0,\"['pop', 'dance pop']\",Uli,4\n\
                   a2,,[],Nobody,0\n\
                   a1,10.0,['pop'],Duplicate,4\n";
        let mut conn = memory_db();
        let summary = import_catalog(&mut conn, CatalogKind::Artists, csv.as_bytes()).unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped_ids, vec!["a1"]);
        assert_eq!(count_rows(&conn, "artists").unwrap(), 2);
        assert_eq!(count_rows(&conn, "genres").unwrap(), 2);
        // The rolled-back duplicate must not leave links behind
        assert_eq!(count_rows(&conn, "artist_genres").unwrap(), 2);
    }
}
