use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::SyncError;
use crate::messages::{ChangeEvent, DerivedFactTrigger, OutboundMessage};

/// Destination for change events and derived-fact triggers.
pub trait MessageSink: Send + Sync {
    /// Publish one change event.
    fn publish_change(&self, event: &ChangeEvent) -> Result<(), SyncError>;
    /// Enqueue one derived-fact trigger.
    fn publish_trigger(&self, trigger: &DerivedFactTrigger) -> Result<(), SyncError>;
}

/// In-memory sink that keeps messages until drained.
#[derive(Debug, Default)]
pub struct MessageOutbox {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl MessageOutbox {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: OutboundMessage) -> Result<(), SyncError> {
        self.messages
            .lock()
            .map_err(|_| SyncError::Message("outbox lock poisoned".into()))?
            .push(message);
        Ok(())
    }

    /// Remove and return every queued message, in publish order.
    pub fn drain(&self) -> Result<Vec<OutboundMessage>, SyncError> {
        let mut guard = self
            .messages
            .lock()
            .map_err(|_| SyncError::Message("outbox lock poisoned".into()))?;
        Ok(std::mem::take(&mut *guard))
    }

    /// Copy of the queued messages.
    pub fn snapshot(&self) -> Result<Vec<OutboundMessage>, SyncError> {
        self.messages
            .lock()
            .map_err(|_| SyncError::Message("outbox lock poisoned".into()))
            .map(|guard| guard.clone())
    }
}

impl MessageSink for MessageOutbox {
    fn publish_change(&self, event: &ChangeEvent) -> Result<(), SyncError> {
        self.push(OutboundMessage::Change(event.clone()))
    }

    fn publish_trigger(&self, trigger: &DerivedFactTrigger) -> Result<(), SyncError> {
        self.push(OutboundMessage::Trigger(trigger.clone()))
    }
}

/// Append-only JSON-lines file sink, one [`OutboundMessage`] per line.
#[derive(Debug)]
pub struct JsonLinesOutbox {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesOutbox {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, SyncError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the outbox file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, message: &OutboundMessage) -> Result<(), SyncError> {
        let line = serde_json::to_string(message)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SyncError::Message("outbox writer lock poisoned".into()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl MessageSink for JsonLinesOutbox {
    fn publish_change(&self, event: &ChangeEvent) -> Result<(), SyncError> {
        self.append(&OutboundMessage::Change(event.clone()))
    }

    fn publish_trigger(&self, trigger: &DerivedFactTrigger) -> Result<(), SyncError> {
        self.append(&OutboundMessage::Trigger(trigger.clone()))
    }
}

/// Read every message from a JSON-lines outbox file. Blank lines are skipped.
pub fn read_outbox(path: &Path) -> Result<Vec<OutboundMessage>, SyncError> {
    let reader = BufReader::new(File::open(path)?);
    let mut messages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str(&line)?);
    }
    Ok(messages)
}
