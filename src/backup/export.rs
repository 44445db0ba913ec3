//! Downloadable export files

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;

/// A named JSON document ready to be written out for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl ExportFile {
    /// Write the export into `dir` on the blocking pool
    pub async fn write_into(&self, dir: &Path) -> Result<PathBuf> {
        let export = self.clone();
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || export.write_blocking(&dir))
            .await
            .map_err(|e| anyhow!("Export task failed: {}", e))?
    }

    /// Write the export into `dir`, replacing a file of the same name
    fn write_blocking(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory: {:?}", dir))?;

        let path = dir.join(&self.file_name);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create temp file for export")?;
        tmp.write_all(&self.contents)
            .context("Failed to write export file")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist export file: {:?}", path))?;

        info!(path = %path.display(), size = self.contents.len(), "Wrote export file");
        Ok(path)
    }

    #[cfg(test)]
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.contents)
    }
}
