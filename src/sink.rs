//! Metric record sinks

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{MonitorError, Result};
use crate::metric::MetricRecord;

/// Append-only destination for metric records.
///
/// Appends may arrive concurrently from independent probes.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn append(&self, record: MetricRecord) -> Result<()>;
}

/// JSON Lines file sink, one record per line
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) the file in append mode
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path).await?;
        debug!("Opened metrics file {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record stored in `path`; a missing file holds none
    pub async fn read_all(path: &Path) -> Result<Vec<MetricRecord>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let mut records = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                ),
            }
        }

        Ok(records)
    }

    /// Delete every stored record for `endpoint_name`, returning how many went.
    ///
    /// The file is rewritten in place, so other sinks appending to the same
    /// path keep writing to it. Records they append while the rewrite runs
    /// can be lost.
    pub async fn purge_endpoint(&self, endpoint_name: &str) -> Result<usize> {
        let mut file = self.file.lock().await;
        file.flush().await?;

        let raw = tokio::fs::read_to_string(&self.path).await?;
        let mut kept = String::with_capacity(raw.len());
        let mut removed = 0;
        for line in raw.lines() {
            let matches = serde_json::from_str::<MetricRecord>(line)
                .map(|r| r.endpoint_name == endpoint_name)
                .unwrap_or(false);
            if matches {
                removed += 1;
            } else if !line.trim().is_empty() {
                kept.push_str(line);
                kept.push('\n');
            }
        }

        let mut rewrite = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        rewrite.write_all(kept.as_bytes()).await?;
        rewrite.flush().await?;

        info!("Purged {} records for endpoint {}", removed, endpoint_name);
        Ok(removed)
    }
}

#[async_trait]
impl MetricsSink for JsonLinesSink {
    async fn append(&self, record: MetricRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| MonitorError::Sink(format!("{}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| MonitorError::Sink(format!("{}: {}", self.path.display(), e)))?;

        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}
