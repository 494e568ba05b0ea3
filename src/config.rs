//! Data-directory layout.
//!
//! Everything the pipeline reads or writes lives under one data directory:
//!
//! ```text
//! <data>/databases/binaries/<db>.db
//! <data>/databases/dumps/<db>@<timestamp>.sqlite3
//! <data>/datasets/spotify/{tracks,artists}.csv
//! <data>/lyrics/<song_id>.txt
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::catalog::CatalogKind;
use crate::safety::DATABASE_EXTENSION;

pub const DEFAULT_DB_NAME: &str = "spotify_ds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub db_name: String,
}

impl PipelineConfig {
    /// Build the layout for `data_dir`. The directory must exist.
    pub fn from_data_dir(data_dir: impl Into<PathBuf>, db_name: &str) -> Result<Self> {
        let data_dir = data_dir.into();
        if !data_dir.is_dir() {
            bail!("data directory '{}' does not exist", data_dir.display());
        }
        if db_name.is_empty() || db_name.contains(['/', '\\', '@']) {
            bail!("invalid database name '{}'", db_name);
        }
        Ok(Self {
            data_dir,
            db_name: db_name.to_string(),
        })
    }

    pub fn binaries_dir(&self) -> PathBuf {
        self.data_dir.join("databases").join("binaries")
    }

    pub fn dumps_dir(&self) -> PathBuf {
        self.data_dir.join("databases").join("dumps")
    }

    pub fn database_path(&self) -> PathBuf {
        self.binaries_dir()
            .join(format!("{}.{DATABASE_EXTENSION}", self.db_name))
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("datasets").join("spotify")
    }

    /// Default CSV location for a catalog import.
    pub fn catalog_csv(&self, kind: CatalogKind) -> PathBuf {
        let file = match kind {
            CatalogKind::Tracks => "tracks.csv",
            CatalogKind::Artists => "artists.csv",
        };
        self.catalog_dir().join(file)
    }

    pub fn lyrics_dir(&self) -> PathBuf {
        self.data_dir.join("lyrics")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
