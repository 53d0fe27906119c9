use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use tracing::debug;

use crate::ImageJob;

/// Writes generated images below a single directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the storage directory if it is missing.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Writes `data` for `job` and returns the file name relative to the root.
    pub async fn store(&self, job: &ImageJob, style: &str, data: &[u8]) -> std::io::Result<String> {
        let file_name = image_file_name(job, style, &Local::now());
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Stored image");
        Ok(file_name)
    }
}

/// `{recording}_{index}_{generation}_{style}_{timestamp}.png`, with characters
/// that are awkward in file names replaced by `-`.
pub fn image_file_name<Tz: TimeZone>(job: &ImageJob, style: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let timestamp = at.format("%Y-%m-%dT%H:%M:%S%.6f");
    let name = format!(
        "{}_{}_{}_{}_{}.png",
        job.recording_id, job.index, job.generation_id, style, timestamp
    );
    name.replace([':', ' ', '/', '\\'], "-")
}
