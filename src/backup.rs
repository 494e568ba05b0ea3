//! Database snapshots.
//!
//! `dump-db` copies the live database with SQLite's online backup API into
//! `<dumps>/<db>@<YYYY-mm-dd_HH-MM-SS>.sqlite3`; `load-dump` restores the
//! newest snapshot of a database back into place.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use tracing::{debug, info};

use crate::safety::{validate_dump_output, validate_restore_target, DUMP_EXTENSION};
use crate::store;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn dump_file_name(db_name: &str, at: NaiveDateTime) -> String {
    format!("{db_name}@{}.{DUMP_EXTENSION}", at.format(TIMESTAMP_FORMAT))
}

/// Timestamp of a snapshot file name, if it is a snapshot of `db_name`.
pub fn parse_dump_timestamp(db_name: &str, file_name: &str) -> Option<NaiveDateTime> {
    let stamp = file_name
        .strip_prefix(db_name)?
        .strip_prefix('@')?
        .strip_suffix(DUMP_EXTENSION)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Snapshot the database at `db_path` into `dumps_dir`.
pub fn dump_db(db_path: &Path, db_name: &str, dumps_dir: &Path, at: NaiveDateTime) -> Result<PathBuf> {
    std::fs::create_dir_all(dumps_dir)
        .with_context(|| format!("Failed to create dumps directory {}", dumps_dir.display()))?;
    let output = dumps_dir.join(dump_file_name(db_name, at));
    validate_dump_output(&output, db_path)?;

    let conn = store::open_existing(db_path)?;
    conn.backup(DatabaseName::Main, &output, None)
        .with_context(|| format!("Failed to back up {} to {}", db_path.display(), output.display()))?;
    info!("Dumped {} to {}", db_path.display(), output.display());
    Ok(output)
}

/// Newest snapshot of `db_name` in `dumps_dir`, if any.
pub fn latest_dump(dumps_dir: &Path, db_name: &str) -> Result<Option<PathBuf>> {
    if !dumps_dir.is_dir() {
        return Ok(None);
    }
    let mut newest: Option<(NaiveDateTime, PathBuf)> = None;
    let entries = std::fs::read_dir(dumps_dir)
        .with_context(|| format!("Failed to list {}", dumps_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(stamp) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| parse_dump_timestamp(db_name, n))
        else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| stamp > *best) {
            newest = Some((stamp, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Restore the newest snapshot of `db_name` into `target`.
pub fn load_latest_dump(dumps_dir: &Path, db_name: &str, target: &Path, force: bool) -> Result<PathBuf> {
    let Some(dump) = latest_dump(dumps_dir, db_name)? else {
        bail!("no snapshot of '{}' found in {}", db_name, dumps_dir.display());
    };
    validate_restore_target(target, &dump, force)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(target)
        .with_context(|| format!("Failed to open restore target {}", target.display()))?;
    conn.restore(
        DatabaseName::Main,
        &dump,
        Some(|p: Progress| debug!("restore: {} of {} pages left", p.remaining, p.pagecount)),
    )
    .with_context(|| format!("Failed to restore {} into {}", dump.display(), target.display()))?;
    info!("Restored {} into {}", dump.display(), target.display());
    Ok(dump)
}
