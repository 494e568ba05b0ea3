//! Safety checks before writing snapshots or restoring databases.
//!
//! These checks keep a dump from clobbering the live database, keep a
//! restore from overwriting data the user did not ask to replace, and stop a
//! snapshot from being restored onto itself.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// File extension of database snapshots.
pub const DUMP_EXTENSION: &str = "sqlite3";

/// File extension of live databases.
pub const DATABASE_EXTENSION: &str = "db";

fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || resolved(a) == resolved(b)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Validates that a snapshot can be written to `output`.
///
/// Checks:
/// - Output must carry the snapshot extension
/// - Output cannot be the live database
/// - Output must not exist yet (snapshots are never overwritten)
pub fn validate_dump_output(output: &Path, database: &Path) -> Result<()> {
    if !has_extension(output, DUMP_EXTENSION) {
        bail!(
            "Safety check failed: snapshot '{}' must have the .{} extension",
            output.display(),
            DUMP_EXTENSION
        );
    }
    if same_file(output, database) {
        bail!(
            "Safety check failed: snapshot '{}' cannot be the database itself",
            output.display()
        );
    }
    if output.exists() {
        bail!(
            "Safety check failed: snapshot '{}' already exists",
            output.display()
        );
    }
    Ok(())
}

/// Validates that `dump` can be restored into `target`.
///
/// Checks:
/// - Dump must carry the snapshot extension, target the database extension
/// - Dump and target cannot be the same file
/// - An existing target is only replaced with `force`
pub fn validate_restore_target(target: &Path, dump: &Path, force: bool) -> Result<()> {
    if !has_extension(dump, DUMP_EXTENSION) {
        bail!(
            "Safety check failed: '{}' is not a .{} snapshot",
            dump.display(),
            DUMP_EXTENSION
        );
    }
    if !has_extension(target, DATABASE_EXTENSION) {
        bail!(
            "Safety check failed: restore target '{}' must have the .{} extension",
            target.display(),
            DATABASE_EXTENSION
        );
    }
    if same_file(target, dump) {
        bail!(
            "Safety check failed: cannot restore '{}' onto itself",
            dump.display()
        );
    }
    if target.exists() && !force {
        bail!(
            "Safety check failed: database '{}' already exists (use --force to replace it)",
            target.display()
        );
    }
    Ok(())
}
