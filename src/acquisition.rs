//! Lyrics acquisition loop.
//!
//! Every track in the working set moves from PENDING to exactly one of
//! FETCH_FAILED, INVALID, STORAGE_FAILED or STORED, and that transition is committed before
//! the next track is attempted. The working-set query excludes resolved
//! tracks, so an interrupted run resumes where it stopped.
//!
//! The status flag is the source of truth. The lyrics file is written (and
//! synced) before `lyrics_stored` commits; a pending track whose file already
//! exists lost its status commit and is adopted without a provider call.
//! A file store failure is a permanent skip too (`storage_failed`), cleared
//! by `reconcile --repair`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::lyrics_files::{LyricsFileError, LyricsFileStore, WriteOutcome};
use crate::models::{LyricsCandidate, SkipReason, TrackState};
use crate::progress::{create_progress_bar, format_duration, log_progress};
use crate::provider::{LyricsProvider, ProviderError};
use crate::store;
use crate::summary::RunSummary;
use crate::validity::{clean, InvalidReason, ValidityFilter};

const PHASE: &str = "fetch-lyrics";

/// Cooperative cancellation flag, checked between tracks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Dataset generation recorded with every terminal state.
    pub generation: i64,
    /// Log a progress line every this many tracks.
    pub progress_interval: u64,
    /// Only attempt the first `limit` working-set tracks.
    pub limit: Option<usize>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            generation: 1,
            progress_interval: 100,
            limit: None,
        }
    }
}

/// What happened to one track.
#[derive(Debug)]
enum TrackOutcome {
    Stored,
    /// File already on disk, status committed without a provider call.
    Adopted,
    FetchFailed(ProviderError),
    Invalid(InvalidReason),
    StorageFailed(LyricsFileError),
}

impl TrackOutcome {
    fn state(&self) -> TrackState {
        match self {
            TrackOutcome::Stored | TrackOutcome::Adopted => TrackState::Stored,
            TrackOutcome::FetchFailed(_) => TrackState::FetchFailed,
            TrackOutcome::Invalid(_) => TrackState::Invalid,
            TrackOutcome::StorageFailed(_) => TrackState::StorageFailed,
        }
    }
}

#[derive(Debug, Default)]
struct OutcomeCounts {
    stored: u64,
    adopted: u64,
    fetch_failed: u64,
    invalid: u64,
    storage_failed: u64,
}

/// Drives one track to a terminal state. Database errors propagate; every
/// other failure is an outcome.
fn process_track(
    conn: &mut Connection,
    candidate: &LyricsCandidate,
    provider: &dyn LyricsProvider,
    filter: &ValidityFilter<'_>,
    files: &LyricsFileStore,
    generation: i64,
) -> Result<TrackOutcome> {
    let id = candidate.song_id.as_str();

    match files.exists(id) {
        Ok(true) => {
            store::mark_stored(conn, id, generation)?;
            return Ok(TrackOutcome::Adopted);
        }
        Ok(false) => {}
        Err(e) => {
            store::mark_skipped(conn, id, SkipReason::StorageFailed, generation)?;
            return Ok(TrackOutcome::StorageFailed(e));
        }
    }

    let text = match provider.search(&candidate.title, &candidate.artist) {
        Ok(text) => text,
        Err(e) => {
            store::mark_skipped(conn, id, SkipReason::FetchFailed, generation)?;
            return Ok(TrackOutcome::FetchFailed(e));
        }
    };

    let checked = filter.check(&text).map(|()| clean(&text)).and_then(|cleaned| {
        if cleaned.is_empty() {
            Err(InvalidReason::Empty)
        } else {
            Ok(cleaned)
        }
    });
    let cleaned = match checked {
        Ok(cleaned) => cleaned,
        Err(reason) => {
            store::mark_skipped(conn, id, SkipReason::Invalid, generation)?;
            return Ok(TrackOutcome::Invalid(reason));
        }
    };

    match files.write_once(id, &cleaned) {
        Ok(WriteOutcome::Written) => {}
        Ok(WriteOutcome::AlreadyPresent) => debug!("Lyrics file for {} appeared concurrently, keeping it", id),
        Err(e) => {
            store::mark_skipped(conn, id, SkipReason::StorageFailed, generation)?;
            return Ok(TrackOutcome::StorageFailed(e));
        }
    }
    store::mark_stored(conn, id, generation)?;
    Ok(TrackOutcome::Stored)
}

/// Run the acquisition loop over the current working set.
pub fn run_acquisition(
    conn: &mut Connection,
    provider: &dyn LyricsProvider,
    filter: &ValidityFilter<'_>,
    files: &LyricsFileStore,
    cancel: &CancellationToken,
    config: &AcquisitionConfig,
) -> Result<RunSummary> {
    let start = Instant::now();
    let mut summary = RunSummary::new(PHASE);
    let mut counts = OutcomeCounts::default();

    let candidates = store::select_working_set(conn, config.limit)?;
    let total = candidates.len() as u64;
    info!(
        "Working set: {} tracks (target language '{}', generation {})",
        total,
        filter.target_language(),
        config.generation
    );

    let pb = create_progress_bar(total, "Fetching lyrics");
    for candidate in &candidates {
        if cancel.is_cancelled() {
            summary.interrupted = true;
            warn!(
                "Cancellation requested, stopping before track {} ({} of {} done)",
                candidate.song_id, summary.total, total
            );
            break;
        }

        summary.total += 1;
        let outcome = process_track(conn, candidate, provider, filter, files, config.generation)?;
        let state = outcome.state();
        match outcome {
            TrackOutcome::Stored => {
                counts.stored += 1;
                summary.succeeded += 1;
            }
            TrackOutcome::Adopted => {
                counts.adopted += 1;
                summary.succeeded += 1;
                info!("Adopted existing lyrics file for {}", candidate.song_id);
            }
            TrackOutcome::FetchFailed(e) => {
                counts.fetch_failed += 1;
                warn!(
                    "{} '{}' by {}: {} -> {}",
                    candidate.song_id, candidate.title, candidate.artist, e, state
                );
                summary.record_skip(candidate.song_id.clone());
            }
            TrackOutcome::Invalid(reason) => {
                counts.invalid += 1;
                warn!(
                    "{} '{}' by {}: {} -> {}",
                    candidate.song_id, candidate.title, candidate.artist, reason, state
                );
                summary.record_skip(candidate.song_id.clone());
            }
            TrackOutcome::StorageFailed(e) => {
                counts.storage_failed += 1;
                warn!("{}: {} -> {}", candidate.song_id, e, state);
                summary.record_skip(candidate.song_id.clone());
            }
        }

        pb.inc(1);
        log_progress(PHASE, summary.total, Some(total), config.progress_interval);
    }
    pb.finish_and_clear();

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    info!(
        "fetch-lyrics: {} stored, {} adopted, {} fetch failed, {} invalid, {} storage errors in {}",
        counts.stored,
        counts.adopted,
        counts.fetch_failed,
        counts.invalid,
        counts.storage_failed,
        format_duration(start.elapsed())
    );
    Ok(summary)
}

// ============================================================================
// Reconcile
// ============================================================================

/// Disagreements between status flags and the lyrics file store.
#[derive(Debug, Default, PartialEq)]
pub struct ReconcileReport {
    /// `lyrics_stored = 1` but no file on disk.
    pub stored_without_file: Vec<String>,
    /// File on disk for a tracked song whose flag is not set.
    pub files_without_flag: Vec<String>,
    /// Files whose id has no status row at all.
    pub unknown_files: Vec<String>,
    /// Skipped because the lyrics file could not be written.
    pub storage_failed: Vec<String>,
    pub repaired: usize,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.stored_without_file.is_empty()
            && self.files_without_flag.is_empty()
            && self.storage_failed.is_empty()
    }

    fn needs_repair(&self) -> impl Iterator<Item = &String> {
        self.stored_without_file
            .iter()
            .chain(&self.files_without_flag)
            .chain(&self.storage_failed)
    }

    pub fn summary(&self, elapsed_secs: f64) -> RunSummary {
        let mut summary = RunSummary::new("reconcile");
        summary.total = self.needs_repair().count() as u64;
        summary.succeeded = self.repaired as u64;
        if self.repaired == 0 {
            for id in self.needs_repair() {
                summary.record_skip(id.clone());
            }
        }
        summary.elapsed_secs = elapsed_secs;
        summary
    }
}

/// Compare status flags with the file store. With `repair`, orphaned flags
/// and storage-failed skips go back to PENDING and orphaned files of tracked
/// songs are adopted.
pub fn reconcile(
    conn: &mut Connection,
    files: &LyricsFileStore,
    repair: bool,
    generation: i64,
) -> Result<ReconcileReport> {
    let stored: BTreeSet<String> = store::stored_song_ids(conn)?.into_iter().collect();
    let on_disk: BTreeSet<String> = files.list_ids()?.into_iter().collect();

    let mut report = ReconcileReport {
        stored_without_file: stored.difference(&on_disk).cloned().collect(),
        storage_failed: store::storage_failed_song_ids(conn)?,
        ..Default::default()
    };
    // a file on disk makes the track adoptable instead
    report.storage_failed.retain(|id| !on_disk.contains(id));
    for id in on_disk.difference(&stored) {
        if store::get_track_status(conn, id)?.is_some() {
            report.files_without_flag.push(id.clone());
        } else {
            report.unknown_files.push(id.clone());
        }
    }

    info!(
        "reconcile: {} stored flags without file, {} files without flag, {} files for unknown tracks, {} storage failures",
        report.stored_without_file.len(),
        report.files_without_flag.len(),
        report.unknown_files.len(),
        report.storage_failed.len()
    );

    if repair {
        let tx = conn.transaction()?;
        for id in report.stored_without_file.iter().chain(&report.storage_failed) {
            store::reset_to_pending(&tx, id)?;
        }
        tx.commit()?;
        for id in &report.files_without_flag {
            store::mark_stored(conn, id, generation)?;
        }
        report.repaired = report.needs_repair().count();
        info!("reconcile: repaired {} tracks", report.repaired);
    } else if !report.is_consistent() {
        warn!("reconcile: store is inconsistent, rerun with --repair to fix");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{LanguageDetector, LanguageError};
    use crate::store::fixtures::{memory_db, seed_working_set};
    use std::cell::RefCell;
    use std::collections::HashMap;

    const LYRICS: &str = "[Verse]\nI keep on walking\nDown the empty road";

    /// Answers searches from a title-keyed script and records every call.
    struct ScriptedProvider {
        responses: HashMap<String, Result<String, ProviderError>>,
        calls: RefCell<Vec<String>>,
        cancel_on_call: Option<(usize, CancellationToken)>,
    }

    impl ScriptedProvider {
        fn new(script: &[(&str, Result<&str, ProviderError>)]) -> Self {
            let responses = script
                .iter()
                .map(|(title, r)| (title.to_string(), r.clone().map(str::to_string)))
                .collect();
            Self {
                responses,
                calls: RefCell::new(Vec::new()),
                cancel_on_call: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl LyricsProvider for ScriptedProvider {
        fn search(&self, title: &str, _artist: &str) -> Result<String, ProviderError> {
            self.calls.borrow_mut().push(title.to_string());
            if let Some((n, token)) = &self.cancel_on_call {
                if self.calls.borrow().len() == *n {
                    token.cancel();
                }
            }
            self.responses
                .get(title)
                .cloned()
                .unwrap_or(Err(ProviderError::NotFound))
        }
    }

    /// "es" for texts containing "hola", otherwise "en".
    struct KeywordDetector;

    impl LanguageDetector for KeywordDetector {
        fn detect(&self, text: &str) -> Result<String, LanguageError> {
            Ok(if text.contains("hola") { "es" } else { "en" }.to_string())
        }
    }

    struct Env {
        _dir: tempfile::TempDir,
        conn: Connection,
        files: LyricsFileStore,
    }

    fn env(tracks: &[(&str, &str)]) -> Env {
        let dir = tempfile::tempdir().unwrap();
        let files = LyricsFileStore::open(dir.path().join("lyrics")).unwrap();
        let conn = memory_db();
        seed_working_set(&conn, tracks);
        Env { _dir: dir, conn, files }
    }

    fn run(env: &mut Env, provider: &ScriptedProvider, cancel: &CancellationToken) -> RunSummary {
        let detector = KeywordDetector;
        let filter = ValidityFilter::new(&detector, "en");
        run_acquisition(
            &mut env.conn,
            provider,
            &filter,
            &env.files,
            cancel,
            &AcquisitionConfig::default(),
        )
        .unwrap()
    }

    fn state(env: &Env, id: &str) -> TrackState {
        store::get_track_status(&env.conn, id).unwrap().unwrap().state()
    }

    #[test]
    fn test_full_run_resolves_every_track() {
        let mut env = env(&[("t1", "One"), ("t2", "Two"), ("t3", "Three"), ("t4", "Four")]);
        let provider = ScriptedProvider::new(&[
            ("One", Ok(LYRICS)),
            ("Two", Err(ProviderError::Network("timeout".to_string()))),
            ("Three", Ok("hola hola que tal")),
            // "Four" is not scripted: not found
        ]);

        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped_ids, vec!["t2", "t3", "t4"]);
        assert!(!summary.interrupted);

        assert_eq!(state(&env, "t1"), TrackState::Stored);
        assert_eq!(state(&env, "t2"), TrackState::FetchFailed);
        assert_eq!(state(&env, "t3"), TrackState::Invalid);
        assert_eq!(state(&env, "t4"), TrackState::FetchFailed);
        for id in ["t1", "t2", "t3", "t4"] {
            let s = store::get_track_status(&env.conn, id).unwrap().unwrap();
            assert!(s.lyrics_stored ^ s.lyrics_skipped, "{id} not resolved exactly once");
            assert_eq!(s.generation, Some(1));
        }

        assert_eq!(env.files.read("t1").unwrap(), "I keep on walking\nDown the empty road");
        assert!(!env.files.exists("t3").unwrap());
        assert!(store::select_working_set(&env.conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_rerun_never_calls_provider_for_resolved_tracks() {
        let mut env = env(&[("t1", "One"), ("t2", "Two")]);
        let provider = ScriptedProvider::new(&[("One", Ok(LYRICS))]);
        run(&mut env, &provider, &CancellationToken::new());
        let before = store::get_track_status(&env.conn, "t1").unwrap();

        let provider = ScriptedProvider::new(&[("One", Ok("changed")), ("Two", Ok(LYRICS))]);
        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(summary.total, 0);
        assert!(provider.calls().is_empty());
        assert_eq!(store::get_track_status(&env.conn, "t1").unwrap(), before);
    }

    #[test]
    fn test_cancellation_between_tracks() {
        let mut env = env(&[("t1", "One"), ("t2", "Two"), ("t3", "Three"), ("t4", "Four")]);
        let cancel = CancellationToken::new();
        let mut provider = ScriptedProvider::new(&[
            ("One", Ok(LYRICS)),
            ("Two", Ok(LYRICS)),
            ("Three", Ok(LYRICS)),
            ("Four", Ok(LYRICS)),
        ]);
        provider.cancel_on_call = Some((2, cancel.clone()));

        let summary = run(&mut env, &provider, &cancel);
        assert!(summary.interrupted);
        assert_eq!(summary.total, 2);
        assert_eq!(provider.calls(), vec!["One", "Two"]);

        // the in-flight track when the signal arrived is fully committed
        assert_eq!(state(&env, "t2"), TrackState::Stored);
        assert!(env.files.exists("t2").unwrap());
        for id in ["t3", "t4"] {
            assert_eq!(state(&env, id), TrackState::Pending);
            assert!(!env.files.exists(id).unwrap());
        }

        let provider = ScriptedProvider::new(&[("Three", Ok(LYRICS)), ("Four", Ok(LYRICS))]);
        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(provider.calls(), vec!["Three", "Four"]);
        assert_eq!(summary.succeeded, 2);
    }

    #[test]
    fn test_existing_file_is_adopted_without_provider_call() {
        let mut env = env(&[("t1", "One")]);
        env.files.write_once("t1", "already here").unwrap();
        let provider = ScriptedProvider::new(&[("One", Ok(LYRICS))]);

        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(summary.succeeded, 1);
        assert!(provider.calls().is_empty());
        assert_eq!(state(&env, "t1"), TrackState::Stored);
        assert_eq!(env.files.read("t1").unwrap(), "already here");
    }

    #[test]
    fn test_marker_only_text_is_invalid() {
        let mut env = env(&[("t1", "One")]);
        let provider = ScriptedProvider::new(&[("One", Ok("[Instrumental]"))]);
        run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(state(&env, "t1"), TrackState::Invalid);
    }

    #[test]
    fn test_limit_bounds_the_run() {
        let mut env = env(&[("t1", "One"), ("t2", "Two"), ("t3", "Three")]);
        let provider = ScriptedProvider::new(&[("One", Ok(LYRICS)), ("Two", Ok(LYRICS))]);
        let detector = KeywordDetector;
        let filter = ValidityFilter::new(&detector, "en");
        let config = AcquisitionConfig {
            limit: Some(2),
            ..Default::default()
        };
        let summary = run_acquisition(
            &mut env.conn,
            &provider,
            &filter,
            &env.files,
            &CancellationToken::new(),
            &config,
        )
        .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(state(&env, "t3"), TrackState::Pending);
    }

    #[test]
    fn test_storage_failure_is_a_permanent_skip() {
        let mut env = env(&[("t1", "One"), ("t2", "Two")]);
        // a directory where the temp file goes makes the write fail
        let blocker = env.files.root().join("t1.txt.tmp");
        std::fs::create_dir(&blocker).unwrap();
        let provider = ScriptedProvider::new(&[("One", Ok(LYRICS)), ("Two", Ok(LYRICS))]);

        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped_ids, vec!["t1"]);
        let status = store::get_track_status(&env.conn, "t1").unwrap().unwrap();
        assert!(status.lyrics_skipped && !status.lyrics_stored);
        assert_eq!(status.state(), TrackState::StorageFailed);
        assert!(!env.files.exists("t1").unwrap());

        for _ in 0..2 {
            let provider = ScriptedProvider::new(&[("One", Ok(LYRICS))]);
            let summary = run(&mut env, &provider, &CancellationToken::new());
            assert_eq!(summary.total, 0);
            assert!(provider.calls().is_empty());
        }

        let report = reconcile(&mut env.conn, &env.files, false, 1).unwrap();
        assert_eq!(report.storage_failed, vec!["t1"]);
        assert!(!report.is_consistent());

        std::fs::remove_dir(&blocker).unwrap();
        let report = reconcile(&mut env.conn, &env.files, true, 1).unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(state(&env, "t1"), TrackState::Pending);

        let provider = ScriptedProvider::new(&[("One", Ok(LYRICS))]);
        let summary = run(&mut env, &provider, &CancellationToken::new());
        assert_eq!(provider.calls(), vec!["One"]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(state(&env, "t1"), TrackState::Stored);
    }

    #[test]
    fn test_reconcile_reports_and_repairs() {
        let mut env = env(&[("t1", "One"), ("t2", "Two"), ("t3", "Three")]);
        store::mark_stored(&mut env.conn, "t1", 1).unwrap();
        env.files.write_once("t2", "lost status commit").unwrap();
        env.files.write_once("stray", "no status row").unwrap();

        let report = reconcile(&mut env.conn, &env.files, false, 1).unwrap();
        assert_eq!(report.stored_without_file, vec!["t1"]);
        assert_eq!(report.files_without_flag, vec!["t2"]);
        assert_eq!(report.unknown_files, vec!["stray"]);
        assert_eq!(report.repaired, 0);
        assert_eq!(state(&env, "t1"), TrackState::Stored);

        let report = reconcile(&mut env.conn, &env.files, true, 2).unwrap();
        assert_eq!(report.repaired, 2);
        assert_eq!(state(&env, "t1"), TrackState::Pending);
        assert_eq!(state(&env, "t2"), TrackState::Stored);

        let report = reconcile(&mut env.conn, &env.files, false, 2).unwrap();
        assert!(report.is_consistent());
    }

    #[test]
    fn test_cancellation_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
