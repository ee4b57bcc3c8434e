//! Append-only per-run log, readable while the run is still writing to it.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use ingest_core::RunId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Position in the run log, starting at 0.
    pub seq: usize,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct RunLog {
    run_id: RunId,
    lines: RwLock<Vec<LogLine>>,
}

impl RunLog {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            lines: RwLock::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Append a line and mirror it to `tracing`. Returns its sequence number.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) -> usize {
        let message = message.into();
        let run_id = self.run_id;
        match level {
            LogLevel::Debug => tracing::debug!(run_id, "{}", message),
            LogLevel::Info => tracing::info!(run_id, "{}", message),
            LogLevel::Warn => tracing::warn!(run_id, "{}", message),
            LogLevel::Error => tracing::error!(run_id, "{}", message),
        }

        let mut lines = self.lines.write().unwrap_or_else(PoisonError::into_inner);
        let mut timestamp = Utc::now();
        // Wall clocks can step backwards; readers rely on non-decreasing order.
        if let Some(last) = lines.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }
        let seq = lines.len();
        lines.push(LogLine {
            seq,
            timestamp,
            level,
            message,
        });
        seq
    }

    pub fn debug(&self, message: impl Into<String>) -> usize {
        self.append(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) -> usize {
        self.append(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> usize {
        self.append(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> usize {
        self.append(LogLevel::Error, message)
    }

    pub fn len(&self) -> usize {
        self.lines.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.since(0)
    }

    /// Lines from `offset` onwards; empty when the offset is past the end.
    pub fn since(&self, offset: usize) -> Vec<LogLine> {
        let lines = self.lines.read().unwrap_or_else(PoisonError::into_inner);
        lines.get(offset..).map(<[LogLine]>::to_vec).unwrap_or_default()
    }
}
