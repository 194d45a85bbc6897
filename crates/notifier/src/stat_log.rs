use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only statistics log split by month: `<dir>/statistics-YYYY-MM.log`.
///
/// The file for the current month stays open; the first write in a new month
/// closes it and opens the next one.
pub struct StatLog {
    dir: PathBuf,
    current: Option<(String, File)>,
}

impl StatLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    pub fn path_for(dir: &Path, month: &str) -> PathBuf {
        dir.join(format!("statistics-{}.log", month))
    }

    pub async fn append(&mut self, at: DateTime<Utc>, text: &str) -> std::io::Result<()> {
        let month = at.format("%Y-%m").to_string();

        let stale = self
            .current
            .as_ref()
            .is_none_or(|(open_month, _)| *open_month != month);
        if stale {
            if let Some((old_month, mut old)) = self.current.take() {
                old.flush().await?;
                tracing::debug!(month = %old_month, "Closed stat log");
            }
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = Self::path_for(&self.dir, &month);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            tracing::info!(path = %path.display(), "Opened stat log");
            self.current = Some((month, file));
        }

        if let Some((_, file)) = self.current.as_mut() {
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
