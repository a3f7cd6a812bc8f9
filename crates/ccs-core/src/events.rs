//! ---
//! ccs_section: "03-persistence-logging"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Structured event stream for decisions, faults, and transitions."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ccs_telemetry::frames::GroupId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Error type for the event log file backend.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kinds of records carried on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DecisionEmitted,
    RuleActivated,
    CountChanged,
    DeadlineMiss,
    TransportFault,
    CommandWriteFailed,
    PredictorLoaded,
    PredictorLoadFailed,
    ModeChanged,
    DegradedEntered,
    DegradedRecovered,
    SafeHoldForced,
    ShutdownCommand,
}

/// One structured event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sequence number assigned at publication.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub reason: String,
}

#[derive(Debug)]
struct SinkInner {
    next_sequence: u64,
    /// Records awaiting the drain worker.
    pending: VecDeque<EventRecord>,
    /// Most recent records retained for operator reads.
    recent: VecDeque<EventRecord>,
    dropped: u64,
}

/// Bounded, append-only event stream. Publication never blocks: when the
/// pending buffer is full the oldest record is dropped and counted. The
/// drain worker appends to the on-disk log on its own task and never feeds
/// back into the scheduler.
#[derive(Debug)]
pub struct EventSink {
    inner: Mutex<SinkInner>,
    notify: Notify,
    capacity: usize,
}

impl EventSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SinkInner {
                next_sequence: 0,
                pending: VecDeque::with_capacity(capacity),
                recent: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Publish a record. Constant-time, lock-bounded, never blocks on I/O.
    pub fn publish(&self, tick: u64, kind: EventKind, group: Option<GroupId>, reason: String) {
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let record = EventRecord {
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            tick,
            kind,
            group,
            reason,
        };
        if inner.pending.len() == self.capacity {
            inner.pending.pop_front();
            inner.dropped += 1;
        }
        inner.pending.push_back(record.clone());
        if inner.recent.len() == self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(record);
        drop(inner);
        self.notify.notify_one();
    }

    /// Most recent records, oldest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let inner = self.inner.lock();
        inner
            .recent
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Records lost to back-pressure since start-up.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    fn drain_pending(&self) -> Vec<EventRecord> {
        let mut inner = self.inner.lock();
        inner.pending.drain(..).collect()
    }

    /// Spawn the drain worker appending records to `path`. The handle stops
    /// once `shutdown` is notified and the buffer is flushed.
    pub fn spawn_writer(self: Arc<Self>, path: PathBuf, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let sink = self;
        tokio::spawn(async move {
            let mut writer = match EventLogWriter::open(&path) {
                Ok(writer) => writer,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "event log unavailable; records stay in memory");
                    return;
                }
            };
            loop {
                let batch = sink.drain_pending();
                for record in &batch {
                    if let Err(err) = writer.append(record) {
                        warn!(error = %err, "failed appending event record");
                    }
                }
                tokio::select! {
                    _ = sink.notify.notified() => {}
                    _ = shutdown.notified() => {
                        let rest = sink.drain_pending();
                        for record in &rest {
                            if let Err(err) = writer.append(record) {
                                warn!(error = %err, "failed appending event record");
                            }
                        }
                        debug!("event log writer stopped");
                        return;
                    }
                }
            }
        })
    }
}

/// Header stored as the first line of the on-disk event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
}

/// Append-only JSONL writer for event records.
pub struct EventLogWriter {
    writer: BufWriter<File>,
}

impl EventLogWriter {
    /// Open the log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self, EventLogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let exists = path.exists() && fs::metadata(path)?.len() > 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if !exists {
            let header = EventLogHeader {
                version: 1,
                created_at: Utc::now(),
            };
            let line = serde_json::to_string(&header)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(Self { writer })
    }

    /// Append one record and flush.
    pub fn append(&mut self, record: &EventRecord) -> Result<(), EventLogError> {
        let line = serde_json::to_string(record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Replay a log file in order, skipping the header line.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize, EventLogError>
where
    F: FnMut(EventRecord) -> Result<(), EventLogError>,
{
    use std::io::{BufRead, BufReader};
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0usize;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EventRecord = serde_json::from_str(&line)?;
        handler(record)?;
        count += 1;
    }
    Ok(count)
}
