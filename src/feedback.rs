//! User-visible feedback for lifecycle and protocol operations.
//!
//! A successful mutation yields a confirmation, a failure yields an error
//! report naming the entity involved. Display is up to the host; the crate
//! ships a sink that writes to the log and one that keeps a bounded history.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of history entries to keep
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Feedback level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLevel {
    /// The operation went through
    Success,
    /// The operation failed
    Error,
}

impl FeedbackLevel {
    /// Get icon/prefix for this level
    pub fn icon(&self) -> &'static str {
        match self {
            FeedbackLevel::Success => "✓",
            FeedbackLevel::Error => "✗",
        }
    }
}

/// One confirmation or error report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub level: FeedbackLevel,
    /// Message content
    pub message: String,
    /// Entity the feedback is about (`story 42 "Login flow"`)
    pub context: String,
    pub at: DateTime<Utc>,
}

impl Feedback {
    pub fn success(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            level: FeedbackLevel::Success,
            message: message.into(),
            context: context.into(),
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            level: FeedbackLevel::Error,
            message: message.into(),
            context: context.into(),
            at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == FeedbackLevel::Error
    }

    /// One-line rendering for terminals.
    pub fn render(&self) -> String {
        format!("{} {}: {}", self.level.icon(), self.context, self.message)
    }
}

/// Receives feedback produced by the sync engine.
pub trait FeedbackSink: Send + Sync {
    fn report(&self, feedback: Feedback);
}

/// Sink writing feedback to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
    fn report(&self, feedback: Feedback) {
        match feedback.level {
            FeedbackLevel::Success => {
                tracing::info!("{}: {}", feedback.context, feedback.message)
            }
            FeedbackLevel::Error => {
                tracing::error!("{}: {}", feedback.context, feedback.message)
            }
        }
    }
}

/// Sink keeping the most recent feedback entries (newest first).
#[derive(Debug)]
pub struct FeedbackLog {
    history: Mutex<VecDeque<Feedback>>,
    limit: usize,
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl FeedbackLog {
    /// Create a log keeping at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Snapshot of the history, newest first.
    pub fn entries(&self) -> Vec<Feedback> {
        self.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Feedback> {
        self.lock().front().cloned()
    }

    pub fn errors(&self) -> Vec<Feedback> {
        self.lock().iter().filter(|f| f.is_error()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Feedback>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FeedbackSink for FeedbackLog {
    fn report(&self, feedback: Feedback) {
        let mut history = self.lock();
        history.push_front(feedback);
        while history.len() > self.limit {
            history.pop_back();
        }
    }
}
