//! Lyric metrics scoring.
//!
//! Word count, lexical diversity and repetition of stored lyrics, plus the
//! `score-lyrics` phase that fills `lyric_scores` for every stored track
//! that has no score yet.

use std::time::Instant;

use anyhow::{Context, Result};
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::lyrics_files::LyricsFileStore;
use crate::models::{LyricMetrics, LyricScore};
use crate::progress::{create_progress_bar, format_duration, log_progress};
use crate::store;
use crate::summary::RunSummary;

const PHASE: &str = "score-lyrics";

// ============================================================================
// Metrics
// ============================================================================

/// Lowercased tokens with commas, parentheses and newlines treated as spaces.
fn tokenize(text: &str) -> Vec<String> {
    text.replace([',', '(', ')', '\n'], " ")
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Score one lyrics text. `None` when there are no tokens.
///
/// `diversity` is distinct tokens over word count. `repetition` sums the
/// extra occurrences (count - 1) of every token seen more than once, over
/// word count: "a a a" scores 2/3.
pub fn score(text: &str) -> Option<LyricMetrics> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }

    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for token in &tokens {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let word_count = tokens.len();
    let extra: usize = counts.values().filter(|&&n| n > 1).map(|n| n - 1).sum();
    Some(LyricMetrics {
        word_count,
        diversity: counts.len() as f64 / word_count as f64,
        repetition: extra as f64 / word_count as f64,
    })
}

// ============================================================================
// Phase
// ============================================================================

fn score_one(conn: &Connection, files: &LyricsFileStore, song_id: &str) -> Result<()> {
    let text = files.read(song_id)?;
    let metrics = score(&text).context("lyrics file has no words")?;
    store::insert_lyric_score(conn, &LyricScore::new(song_id, metrics))
        .context("insert lyric score")?;
    Ok(())
}

/// Score every stored track without a `lyric_scores` row. Per-track failures
/// (missing or unreadable file, empty text, insert failure) are logged and
/// collected in the summary's skipped ids.
pub fn run_score_lyrics(conn: &Connection, files: &LyricsFileStore, progress_interval: u64) -> Result<RunSummary> {
    let start = Instant::now();
    let mut summary = RunSummary::new(PHASE);

    let song_ids = store::select_unscored(conn)?;
    let total = song_ids.len() as u64;
    info!("Scoring lyrics for {} songs", total);

    let pb = create_progress_bar(total, "Scoring lyrics");
    for song_id in &song_ids {
        summary.total += 1;
        match score_one(conn, files, song_id) {
            Ok(()) => summary.succeeded += 1,
            Err(err) => {
                warn!("Skipping lyrics for song {}: {:#}", song_id, err);
                summary.record_skip(song_id.clone());
            }
        }
        pb.inc(1);
        log_progress(PHASE, summary.total, Some(total), progress_interval);
    }
    pb.finish_and_clear();

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    info!(
        "score-lyrics: scored {} of {} songs in {}",
        summary.succeeded,
        total,
        format_duration(start.elapsed())
    );
    Ok(summary)
}
