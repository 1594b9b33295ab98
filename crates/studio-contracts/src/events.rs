//! Per-session JSONL log.
//!
//! Each line is one [`SessionEvent`] stamped by [`SessionLog::record`] with
//! the session id, a sequence number, the time and the phase the session is
//! in once the event has happened. Images appear only as summaries.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::StudioError;
use crate::images::EncodedImage;
use crate::session::{EditTicket, Phase};

/// Fields the log writes itself; details never replace them.
const STAMPED_FIELDS: &[&str] = &["type", "session_id", "seq", "ts", "phase", "generation"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStarted,
    ImageUploaded,
    PromptSet,
    EditRequested,
    EditSucceeded,
    EditEmpty,
    EditFailed,
    EditIgnored,
    ActionRejected,
    SessionReset,
    ImageDownloaded,
    SessionFinished,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::ImageUploaded => "image_uploaded",
            Self::PromptSet => "prompt_set",
            Self::EditRequested => "edit_requested",
            Self::EditSucceeded => "edit_succeeded",
            Self::EditEmpty => "edit_empty",
            Self::EditFailed => "edit_failed",
            Self::EditIgnored => "edit_ignored",
            Self::ActionRejected => "action_rejected",
            Self::SessionReset => "session_reset",
            Self::ImageDownloaded => "image_downloaded",
            Self::SessionFinished => "session_finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    kind: EventKind,
    ticket: Option<EditTicket>,
    details: Map<String, Value>,
}

impl SessionEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            ticket: None,
            details: Map::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Ties the event to one edit; written as `generation`.
    pub fn ticket(mut self, ticket: EditTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn image(self, key: &str, image: &EncodedImage) -> Self {
        self.detail(key, image_summary(image))
    }
}

/// Media type, size and fingerprint; never the payload.
pub fn image_summary(image: &EncodedImage) -> Value {
    json!({
        "media_type": image.media_type(),
        "bytes": image.byte_len(),
        "fingerprint": image.fingerprint(),
    })
}

#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
            next_seq: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Appends `event` as one compact line and returns what was written.
    /// The sequence number only advances when the write succeeds.
    pub fn record(&self, phase: Phase, event: SessionEvent) -> Result<Value, StudioError> {
        let mut next_seq = self
            .next_seq
            .lock()
            .map_err(|_| StudioError::io("session log lock poisoned"))?;

        let mut line = Map::new();
        line.insert("type".to_string(), Value::from(event.kind.as_str()));
        line.insert("session_id".to_string(), Value::from(self.session_id.as_str()));
        line.insert("seq".to_string(), Value::from(*next_seq));
        line.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        line.insert("phase".to_string(), Value::from(phase.as_str()));
        if let Some(ticket) = event.ticket {
            line.insert("generation".to_string(), Value::from(ticket.generation));
        }
        for (key, value) in event.details {
            if !STAMPED_FIELDS.contains(&key.as_str()) {
                line.insert(key, value);
            }
        }
        let line = Value::Object(line);

        let mut text = serde_json::to_string(&line)
            .map_err(|err| StudioError::io(format!("session log encode failed: {err}")))?;
        text.push('\n');
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(text.as_bytes()))
            .map_err(|err| {
                StudioError::io(format!("failed writing {}: {err}", self.path.display()))
            })?;

        *next_seq += 1;
        Ok(line)
    }
}
