//! End-of-run summaries.
//!
//! Every phase reports how many items it saw, how many succeeded and which
//! were skipped. The summary is logged and optionally written as JSON.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

/// Skipped ids listed in the log line; the JSON file always carries all of them.
const MAX_LOGGED_IDS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub phase: String,
    pub total: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub skipped_ids: Vec<String>,
    pub interrupted: bool,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            ..Default::default()
        }
    }

    pub fn record_skip(&mut self, id: impl Into<String>) {
        self.skipped += 1;
        self.skipped_ids.push(id.into());
    }

    /// Emit the summary through `tracing`.
    pub fn log(&self) {
        if self.interrupted {
            warn!(
                "[{}] interrupted after {} items ({} ok, {} skipped)",
                self.phase, self.total, self.succeeded, self.skipped
            );
        }
        info!(
            "[{}] skipped {} out of {} ({} ok) in {:.1}s",
            self.phase, self.skipped, self.total, self.succeeded, self.elapsed_secs
        );
        if !self.skipped_ids.is_empty() {
            let shown: Vec<&str> = self
                .skipped_ids
                .iter()
                .take(MAX_LOGGED_IDS)
                .map(String::as_str)
                .collect();
            let more = self.skipped_ids.len().saturating_sub(MAX_LOGGED_IDS);
            if more > 0 {
                info!("[{}] skipped ids: {:?} (+{} more)", self.phase, shown, more);
            } else {
                info!("[{}] skipped ids: {:?}", self.phase, shown);
            }
        }
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
        Ok(())
    }
}
