//! Run ledger - persists finalized run records
//!
//! `JsonlLedger` appends one JSON object per record to
//! `{output_dir}/performance.jsonl`. A locked file (permission denied) is
//! retried a bounded number of times; when the ledger gives up the record is
//! printed to the console instead so a long benchmark never dies on it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::record::RunRecord;

pub const LEDGER_FILE: &str = "performance.jsonl";

/// Error type for ledger operations
#[derive(Debug)]
pub enum LedgerError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
    /// Still locked after every retry
    Locked { attempts: u32 },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Io(e) => write!(f, "IO error: {}", e),
            LedgerError::Serialize(e) => write!(f, "Serialization error: {}", e),
            LedgerError::Locked { attempts } => {
                write!(f, "ledger still locked after {} attempts", attempts)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Io(e)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialize(e)
    }
}

/// Retry policy for a locked ledger file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 5000,
        }
    }
}

/// Destination for finalized run records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn persist(&self, record: &RunRecord) -> Result<(), LedgerError>;
}

pub struct JsonlLedger {
    path: PathBuf,
    config: LedgerConfig,
}

impl JsonlLedger {
    /// Ledger at `{output_dir}/performance.jsonl`
    pub fn new(output_dir: impl AsRef<Path>, config: LedgerConfig) -> Self {
        Self {
            path: output_dir.as_ref().join(LEDGER_FILE),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }

    /// Read every record back; a missing ledger is empty
    pub async fn load_all(&self) -> Result<Vec<RunRecord>, LedgerError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(LedgerError::from))
            .collect()
    }

    /// Run `write` until it succeeds, retrying only while the file is locked.
    ///
    /// Gives up after `max_retries` retries, or at once on any other error,
    /// and prints `line` to the console when it does.
    async fn write_with_retries<F, Fut>(&self, line: &str, mut write: F) -> Result<(), LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match write().await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied
                    && attempt <= self.config.max_retries =>
                {
                    warn!(attempt, max = self.config.max_retries, "ledger locked, retrying");
                    println!(
                        "[LEDGER] {} is locked, retrying in {:.1}s ({}/{})",
                        self.path.display(),
                        delay.as_secs_f64(),
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let error = if e.kind() == std::io::ErrorKind::PermissionDenied {
                        LedgerError::Locked { attempts: attempt }
                    } else {
                        LedgerError::Io(e)
                    };
                    warn!(error = %error, "giving up on ledger, record printed to console");
                    println!("[LEDGER] Could not save record: {}", error);
                    println!("[LEDGER] {}", line);
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl RecordSink for JsonlLedger {
    async fn persist(&self, record: &RunRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)?;
        self.write_with_retries(&line, || self.append(&line)).await?;
        debug!(path = %self.path.display(), trace_id = %record.trace_id, "record persisted");
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<RunRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RunRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn persist(&self, record: &RunRecord) -> Result<(), LedgerError> {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
        Ok(())
    }
}
