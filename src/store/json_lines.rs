use crate::error::PersistenceError;
use crate::records::{Reading, SensorId, Timestamp};
use crate::store::ReadingStore;
use crate::BoxFuture;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Append-only reading store backed by a JSON-lines file
///
/// Every reading is written as one JSON object per line. Appends are
/// serialized through an async mutex that also tracks the latest
/// `captured_at` per sensor, so the per-sensor ordering check survives
/// restarts: the index is rebuilt from the file when the store is opened.
#[derive(Debug, Clone)]
pub struct JsonLinesReadingStore {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    /// Latest captured_at per sensor; held while writing
    last_captured: Mutex<HashMap<SensorId, Timestamp>>,
}

impl JsonLinesReadingStore {
    /// Open (or lazily create) the store at `path`
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::IoError` if an existing file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let mut last_captured = HashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                for reading in parse_lines(&contents, &path) {
                    let entry = last_captured
                        .entry(reading.sensor_id)
                        .or_insert(reading.captured_at);
                    if reading.captured_at > *entry {
                        *entry = reading.captured_at;
                    }
                }
                info!(
                    "Opened reading store {} with {} known sensors",
                    path.display(),
                    last_captured.len()
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Reading store {} will be created on first append", path.display());
            }
            Err(e) => return Err(PersistenceError::IoError(e)),
        }

        Ok(Self {
            inner: Arc::new(FileInner {
                path,
                last_captured: Mutex::new(last_captured),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl FileInner {
    async fn append(&self, reading: Reading) -> Result<(), PersistenceError> {
        let mut last_captured = self.last_captured.lock().await;

        if let Some(last) = last_captured.get(&reading.sensor_id) {
            if reading.captured_at < *last {
                return Err(PersistenceError::OutOfOrder {
                    sensor_id: reading.sensor_id,
                    captured_at: reading.captured_at.to_rfc3339(),
                });
            }
        }

        let mut line = serde_json::to_string(&reading)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        let length = file.metadata().await?.len();
        if length > 0 && !ends_with_newline(&mut file, length).await? {
            warn!(
                "Terminating partial record at the end of {}",
                self.path.display()
            );
            line.insert(0, '\n');
        }

        if let Err(e) = write_line(&mut file, &line).await {
            if let Err(truncate) = file.set_len(length).await {
                warn!(
                    "Failed to roll back partial write to {}: {}",
                    self.path.display(),
                    truncate
                );
            }
            return Err(PersistenceError::WriteFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            )));
        }

        last_captured.insert(reading.sensor_id, reading.captured_at);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Reading>, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(parse_lines(&contents, &self.path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(PersistenceError::ReadFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn query(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Reading>, PersistenceError> {
        let mut readings: Vec<Reading> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| sensor_id.map_or(true, |id| r.sensor_id == id))
            .filter(|r| r.captured_at >= start && r.captured_at <= end)
            .collect();
        readings.sort_by_key(|r| r.captured_at);
        Ok(readings)
    }

    async fn prune_before(&self, cutoff: Timestamp) -> Result<usize, PersistenceError> {
        // Block appends while the file is rewritten
        let _guard = self.last_captured.lock().await;

        let readings = self.read_all().await?;
        let total = readings.len();

        let mut contents = String::new();
        for reading in readings.iter().filter(|r| r.captured_at >= cutoff) {
            contents.push_str(&serde_json::to_string(reading)?);
            contents.push('\n');
        }
        let kept = contents.lines().count();
        if kept == total {
            return Ok(0);
        }

        let staging = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        debug!(
            "Pruned {} readings before {} from {}",
            total - kept,
            cutoff,
            self.path.display()
        );
        Ok(total - kept)
    }
}

async fn ends_with_newline(file: &mut File, length: u64) -> std::io::Result<bool> {
    file.seek(SeekFrom::Start(length - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

async fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Parse every well-formed line; malformed lines are logged and skipped
fn parse_lines(contents: &str, path: &Path) -> Vec<Reading> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<Reading>(line) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(
                    "Skipping malformed reading at {}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                );
                None
            }
        })
        .collect()
}

impl ReadingStore for JsonLinesReadingStore {
    fn append(&self, reading: Reading) -> BoxFuture<Result<(), PersistenceError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.append(reading).await })
    }

    fn query(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> BoxFuture<Result<Vec<Reading>, PersistenceError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.query(sensor_id, start, end).await })
    }

    fn prune_before(&self, cutoff: Timestamp) -> BoxFuture<Result<usize, PersistenceError>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.prune_before(cutoff).await })
    }
}
