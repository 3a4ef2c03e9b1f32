// File archival - processed feed documents move to the history directory so
// the next run does not see them again.

use crate::batch::Archiver;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Relocates a feed document from the feed directory into history.
#[derive(Debug, Clone)]
pub struct FileArchiver {
    feed_dir: PathBuf,
    history_dir: PathBuf,
}

impl FileArchiver {
    pub fn new(feed_dir: impl Into<PathBuf>, history_dir: impl Into<PathBuf>) -> Self {
        FileArchiver {
            feed_dir: feed_dir.into(),
            history_dir: history_dir.into(),
        }
    }
}

impl Archiver for FileArchiver {
    fn archive(&self, source_id: &str) -> Result<()> {
        fs::create_dir_all(&self.history_dir).with_context(|| {
            format!(
                "Failed to create history directory {}",
                self.history_dir.display()
            )
        })?;

        let from = self.feed_dir.join(source_id);
        let to = self.history_dir.join(source_id);
        fs::rename(&from, &to)
            .with_context(|| format!("Failed to archive {} to {}", from.display(), to.display()))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
