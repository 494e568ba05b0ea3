//! Lyrics dataset pipeline - shared modules for the `lyrics-dataset` binary.

pub mod acquisition;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod language;
pub mod lyrics_files;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod provider;
pub mod safety;
pub mod scoring;
pub mod store;
pub mod summary;
pub mod validity;
