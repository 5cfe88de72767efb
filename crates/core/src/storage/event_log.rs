use crate::events::{Event, EventLog};
use crate::types::WorkflowId;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Buffered events are flushed once a run accumulates this many
const FLUSH_THRESHOLD: usize = 100;

/// Event log implementation using gzip-compressed JSONL (JSON Lines) files
pub struct JsonlEventLog {
    base_path: PathBuf,
    // Per-run buffers, flushed on the run's terminal event
    buffers: RwLock<HashMap<WorkflowId, Vec<Event>>>,
    // Held across every read-append-write of the log files
    file_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffers: RwLock::new(HashMap::new()),
            file_lock: Mutex::new(()),
        })
    }

    /// Get the path to the event log file for a run on a given day
    /// Format: <base>/YYYY/MM/DD/<workflow_id>.jsonl.gz
    fn event_log_path(&self, workflow_id: &WorkflowId, date: NaiveDate) -> PathBuf {
        self.base_path
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(log_file_name(workflow_id))
    }

    /// Flush buffered events of one run to disk
    async fn flush(&self, workflow_id: &WorkflowId) -> Result<()> {
        let _files = self.file_lock.lock().await;
        self.flush_locked(workflow_id).await
    }

    /// Caller must hold `file_lock`
    async fn flush_locked(&self, workflow_id: &WorkflowId) -> Result<()> {
        let pending = {
            let mut buffers = self.buffers.write().await;
            match buffers.remove(workflow_id) {
                Some(events) if !events.is_empty() => events,
                _ => return Ok(()),
            }
        };

        // Group events by date
        let mut events_by_date: BTreeMap<NaiveDate, Vec<Event>> = BTreeMap::new();
        for event in pending {
            events_by_date
                .entry(event.timestamp.date_naive())
                .or_default()
                .push(event);
        }

        for (date, events) in events_by_date {
            let path = self.event_log_path(workflow_id, date);

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create event log directory")?;
            }

            let existing = path.clone();
            let mut all_events = tokio::task::spawn_blocking(move || {
                if existing.exists() {
                    read_jsonl_gz(&existing)
                } else {
                    Ok(Vec::new())
                }
            })
            .await
            .context("Event log reader panicked")??;
            all_events.extend(events);

            write_jsonl_gz(&path, &all_events).await?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let workflow_id = event.workflow_id.clone();
        let terminal = event.is_terminal();

        let buffered = {
            let mut buffers = self.buffers.write().await;
            let buffer = buffers.entry(workflow_id.clone()).or_default();
            buffer.push(event);
            buffer.len()
        };

        if terminal || buffered > FLUSH_THRESHOLD {
            self.flush(&workflow_id).await?;
        }

        Ok(())
    }

    async fn get_run_events(&self, workflow_id: &WorkflowId) -> Result<Vec<Event>> {
        let _files = self.file_lock.lock().await;
        self.flush_locked(workflow_id).await?;

        let base_path = self.base_path.clone();
        let workflow_id = workflow_id.clone();
        tokio::task::spawn_blocking(move || read_run_events(&base_path, &workflow_id))
            .await
            .context("Event log reader panicked")?
    }
}

/// Read every log file of a run, oldest event first
fn read_run_events(base_path: &Path, workflow_id: &WorkflowId) -> Result<Vec<Event>> {
    let mut all_events = Vec::new();
    for file in log_files(base_path, workflow_id)? {
        all_events.extend(
            read_jsonl_gz(&file)?
                .into_iter()
                .filter(|e| &e.workflow_id == workflow_id),
        );
    }

    all_events.sort_by_key(|e| e.timestamp);

    Ok(all_events)
}

/// Get all event log files for a run
fn log_files(base_path: &Path, workflow_id: &WorkflowId) -> Result<Vec<PathBuf>> {
    let filename = log_file_name(workflow_id);
    let mut files = Vec::new();

    // Walk year/month/day directories
    for year in subdirectories(base_path)? {
        for month in subdirectories(&year)? {
            for day in subdirectories(&month)? {
                let log_file = day.join(&filename);
                if log_file.exists() {
                    files.push(log_file);
                }
            }
        }
    }

    Ok(files)
}

/// Workflow ids are caller supplied, so keep them to one path segment.
/// Anything outside `[A-Za-z0-9._-]` is percent-encoded, which keeps
/// distinct ids on distinct files.
fn log_file_name(workflow_id: &WorkflowId) -> String {
    let mut name = String::with_capacity(workflow_id.0.len() + 9);
    for byte in workflow_id.0.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".jsonl.gz");
    name
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).context("Failed to read event log directory")? {
        let path = entry.context("Failed to read directory entry")?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }

    Ok(dirs)
}

fn read_jsonl_gz(path: &Path) -> Result<Vec<Event>> {
    use flate2::read::GzDecoder;
    use std::io::BufRead;

    let file = std::fs::File::open(path).context("Failed to open event log")?;
    let reader = std::io::BufReader::new(GzDecoder::new(file));

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from event log")?;
        if line.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
        events.push(event);
    }

    Ok(events)
}

async fn write_jsonl_gz(path: &Path, events: &[Event]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for event in events {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        encoder
            .write_all(json.as_bytes())
            .context("Failed to write event")?;
        encoder.write_all(b"\n").context("Failed to write newline")?;
    }

    let compressed = encoder.finish().context("Failed to finish compression")?;

    tokio::fs::write(path, compressed)
        .await
        .context("Failed to write event log file")?;

    Ok(())
}
