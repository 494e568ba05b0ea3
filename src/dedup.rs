//! Per-artist track deduplication.
//!
//! Near-duplicate titles ("Song", "Song (feat. X)", "Song - Remix") are
//! grouped by exact, case-sensitive substring containment and the most
//! popular member of each group becomes the canonical track.
//!
//! Scan order matters for containment grouping, so it is fixed: tracks are
//! stably sorted by title length in characters, ties broken by track id.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::models::CanonicalTrack;
use crate::progress::{create_progress_bar, format_duration};
use crate::store::{self, TrackTable, WRITE_BATCH_SIZE};
use crate::summary::RunSummary;

/// One group of near-duplicate titles and its representative.
#[derive(Clone, Debug, PartialEq)]
pub struct DedupGroup {
    pub canonical: CanonicalTrack,
    /// Ids of every member, canonical included, in scan order.
    pub member_ids: Vec<String>,
}

fn names_overlap(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Sort tracks into the fixed scan order (title length, then id).
pub fn scan_order(tracks: &mut [CanonicalTrack]) {
    tracks.sort_by(|a, b| {
        a.name
            .chars()
            .count()
            .cmp(&b.name.chars().count())
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
}

/// Group an already ordered track list.
///
/// For each track `i` not yet subsumed, every later unsubsumed track `j`
/// whose title contains or is contained in `i`'s title joins the group; the
/// best pick moves to `j` only on strictly higher popularity, so ties keep
/// the earliest index. Titles are compared against `i` only, never against
/// the current best pick.
pub fn group_ordered(tracks: &[CanonicalTrack]) -> Vec<DedupGroup> {
    let mut subsumed = vec![false; tracks.len()];
    let mut groups = Vec::new();

    for i in 0..tracks.len() {
        if subsumed[i] {
            continue;
        }
        subsumed[i] = true;
        let mut best = i;
        let mut member_ids = vec![tracks[i].track_id.clone()];

        for j in (i + 1)..tracks.len() {
            if subsumed[j] || !names_overlap(&tracks[i].name, &tracks[j].name) {
                continue;
            }
            subsumed[j] = true;
            member_ids.push(tracks[j].track_id.clone());
            if tracks[j].popularity > tracks[best].popularity {
                best = j;
            }
        }

        groups.push(DedupGroup {
            canonical: tracks[best].clone(),
            member_ids,
        });
    }

    groups
}

/// Deduplicate one artist's tracks: fix the scan order, then group.
pub fn dedupe_artist_tracks(mut tracks: Vec<CanonicalTrack>) -> Vec<DedupGroup> {
    scan_order(&mut tracks);
    group_ordered(&tracks)
}

/// Split tracks by primary artist, keeping artists in id order.
pub fn group_by_artist(tracks: Vec<CanonicalTrack>) -> BTreeMap<String, Vec<CanonicalTrack>> {
    let mut by_artist: BTreeMap<String, Vec<CanonicalTrack>> = BTreeMap::new();
    for track in tracks {
        by_artist
            .entry(track.primary_artist_id.clone())
            .or_default()
            .push(track);
    }
    by_artist
}

/// Run the `filter-tracks` phase: dedupe every artist's tracks released in
/// or after `cutoff_year` and write the representatives to `tracks_filtered`.
pub fn run_filter_tracks(conn: &mut Connection, cutoff_year: i32) -> Result<RunSummary> {
    let start = Instant::now();
    let mut summary = RunSummary::new("filter-tracks");

    let tracks = store::tracks_since(conn, cutoff_year)?;
    let input_count = tracks.len();
    info!("Read {} tracks released in or after {}", input_count, cutoff_year);

    let by_artist = group_by_artist(tracks);
    let pb = create_progress_bar(by_artist.len() as u64, "Deduplicating artists");
    let canonical: Vec<CanonicalTrack> = by_artist
        .into_values()
        .flat_map(|artist_tracks| {
            pb.inc(1);
            dedupe_artist_tracks(artist_tracks)
        })
        .map(|group| group.canonical)
        .collect();
    pb.finish_with_message(format!(
        "Selected {} canonical tracks from {}",
        canonical.len(),
        input_count
    ));

    let pb = create_progress_bar(canonical.len() as u64, "Writing tracks_filtered");
    for chunk in canonical.chunks(WRITE_BATCH_SIZE) {
        let mut tx = conn.transaction()?;
        for track in chunk {
            summary.total += 1;
            let sp = tx.savepoint()?;
            match store::insert_track(&sp, TrackTable::Filtered, track) {
                Ok(()) => {
                    sp.commit()?;
                    summary.succeeded += 1;
                }
                Err(err) => {
                    drop(sp);
                    warn!("Skipping filtered track {}: {:#}", track.track_id, err);
                    summary.record_skip(track.track_id.clone());
                }
            }
            pb.inc(1);
        }
        tx.commit()?;
    }
    pb.finish_with_message(format!("Wrote {} filtered tracks", summary.succeeded));

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    info!(
        "filter-tracks: {} -> {} tracks in {}",
        input_count,
        summary.succeeded,
        format_duration(start.elapsed())
    );
    Ok(summary)
}
