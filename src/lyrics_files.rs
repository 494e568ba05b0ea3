//! Lyrics file store: one UTF-8 text file per track id under a root directory.
//!
//! Files are written once. A write goes to a temporary sibling, is synced,
//! then renamed into place, so a crash never leaves a truncated lyrics file
//! under its final name.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

const EXTENSION: &str = "txt";
const TEMP_EXTENSION: &str = "txt.tmp";

#[derive(Debug, Error)]
pub enum LyricsFileError {
    #[error("track id '{0}' cannot be used as a file name")]
    InvalidId(String),
    #[error("lyrics file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LyricsFileError {
    fn io(path: &Path, source: io::Error) -> Self {
        LyricsFileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of [`LyricsFileStore::write_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A file already existed and was left untouched.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct LyricsFileStore {
    root: PathBuf,
}

fn validate_id(song_id: &str) -> Result<(), LyricsFileError> {
    let bad = song_id.is_empty()
        || song_id.contains('/')
        || song_id.contains('\\')
        || song_id.contains("..")
        || song_id.contains('\0');
    if bad {
        return Err(LyricsFileError::InvalidId(song_id.to_string()));
    }
    Ok(())
}

impl LyricsFileStore {
    /// Open the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LyricsFileError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LyricsFileError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, song_id: &str) -> Result<PathBuf, LyricsFileError> {
        validate_id(song_id)?;
        Ok(self.root.join(format!("{song_id}.{EXTENSION}")))
    }

    pub fn exists(&self, song_id: &str) -> Result<bool, LyricsFileError> {
        Ok(self.path_for(song_id)?.is_file())
    }

    /// Read a stored lyrics file. Missing files and non-UTF-8 content are errors.
    pub fn read(&self, song_id: &str) -> Result<String, LyricsFileError> {
        let path = self.path_for(song_id)?;
        fs::read_to_string(&path).map_err(|e| LyricsFileError::io(&path, e))
    }

    /// Write `text` for `song_id` unless a file is already present.
    pub fn write_once(&self, song_id: &str, text: &str) -> Result<WriteOutcome, LyricsFileError> {
        let path = self.path_for(song_id)?;
        if path.exists() {
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let tmp = self.root.join(format!("{song_id}.{TEMP_EXTENSION}"));
        let write_tmp = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp);
            return Err(LyricsFileError::io(&tmp, e));
        }
        fs::rename(&tmp, &path).map_err(|e| LyricsFileError::io(&path, e))?;
        Ok(WriteOutcome::Written)
    }

    /// Ids of every stored lyrics file, sorted. Temporary files are ignored.
    pub fn list_ids(&self) -> Result<Vec<String>, LyricsFileError> {
        let entries = fs::read_dir(&self.root).map_err(|e| LyricsFileError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| LyricsFileError::io(&self.root, e))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LyricsFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LyricsFileStore::open(dir.path().join("lyrics")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_once_then_read() {
        let (_dir, store) = store();
        assert!(!store.exists("t1").unwrap());
        assert_eq!(store.write_once("t1", "hello\nworld").unwrap(), WriteOutcome::Written);
        assert!(store.exists("t1").unwrap());
        assert_eq!(store.read("t1").unwrap(), "hello\nworld");
    }

    #[test]
    fn test_second_write_is_ignored() {
        let (_dir, store) = store();
        store.write_once("t1", "first").unwrap();
        assert_eq!(store.write_once("t1", "second").unwrap(), WriteOutcome::AlreadyPresent);
        assert_eq!(store.read("t1").unwrap(), "first");
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (_dir, store) = store();
        for id in ["", "../etc", "a/b", "a\\b"] {
            assert!(matches!(store.path_for(id), Err(LyricsFileError::InvalidId(_))), "{id}");
        }
    }

    #[test]
    fn test_read_missing_is_io_error() {
        let (_dir, store) = store();
        assert!(matches!(store.read("nope"), Err(LyricsFileError::Io { .. })));
    }

    #[test]
    fn test_list_ids_skips_temp_files() {
        let (_dir, store) = store();
        store.write_once("b", "x").unwrap();
        store.write_once("a", "y").unwrap();
        fs::write(store.root().join("c.txt.tmp"), "partial").unwrap();
        fs::write(store.root().join("notes.md"), "other").unwrap();
        assert_eq!(store.list_ids().unwrap(), vec!["a", "b"]);
    }
}
