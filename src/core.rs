//! Core domain types for tgdispatch
//!
//! This module defines the data structures that flow through the dispatch
//! pipeline: where a notification goes, what it carries, and how a delivery
//! attempt ended.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::Level;

/// A resolved chat target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDestination")]
pub struct Destination {
    id: String,
    thread_id: Option<i64>,
    name: Option<String>,
}

/// Wire shape of a destination; converted through [`Destination::new`].
#[derive(Deserialize)]
struct RawDestination {
    id: String,
    #[serde(default)]
    thread_id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

impl From<RawDestination> for Destination {
    fn from(raw: RawDestination) -> Self {
        Destination::new(raw.id, raw.thread_id, raw.name)
    }
}

impl Destination {
    /// Creates a destination. A thread id that is not positive means "no topic".
    pub fn new(id: impl Into<String>, thread_id: Option<i64>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.filter(|t| *t > 0),
            name,
        }
    }

    /// Creates an unnamed destination without a topic.
    pub fn chat(id: impl Into<String>) -> Self {
        Self::new(id, None, None)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn thread_id(&self) -> Option<i64> {
        self.thread_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The human label used in logs and broadcast results.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{} ({}#{})", self.label(), self.id, thread),
            None => write!(f, "{} ({})", self.label(), self.id),
        }
    }
}

/// A severity tag attached to a notification.
pub type Severity = Level;

/// The failure cause attached to a log record, flattened to printable lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureCause {
    /// One-line description of the failure.
    pub summary: String,
    /// Stack frames or cause-chain entries, outermost first.
    pub frames: Vec<String>,
}

/// A structured log event handed over by the logging framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    /// The logger (tracing target) that emitted the event.
    pub logger_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
    pub message: String,
    pub cause: Option<FailureCause>,
}

/// What a notification carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Event(LogRecord),
    Photo(PathBuf),
    Document(PathBuf),
}

/// The delivery channel a body maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Text,
    Photo,
    Document,
}

impl Body {
    pub fn kind(&self) -> RequestKind {
        match self {
            Body::Text(_) | Body::Event(_) => RequestKind::Text,
            Body::Photo(_) => RequestKind::Photo,
            Body::Document(_) => RequestKind::Document,
        }
    }
}

/// A single dispatch request. Created per call and consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub destination: Destination,
    pub body: Body,
    pub caption: Option<String>,
    pub severity: Option<Severity>,
    /// Message id to reply to. Only text and event bodies use it.
    pub reply_to: Option<i64>,
}

impl NotificationRequest {
    pub fn new(destination: Destination, body: Body) -> Self {
        Self {
            destination,
            body,
            caption: None,
            severity: None,
            reply_to: None,
        }
    }

    pub fn text(destination: Destination, text: impl Into<String>) -> Self {
        Self::new(destination, Body::Text(text.into()))
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.body.kind()
    }
}

/// Why a delivery attempt did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A media file was missing or unreadable; nothing was sent.
    PreconditionFailed,
    /// The remote API rejected the request or could not be reached.
    Transport,
    /// Dropped locally by the rate limiter.
    RateLimited,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::PreconditionFailed => "precondition failed",
            FailureKind::Transport => "transport failure",
            FailureKind::RateLimited => "rate-limited",
        };
        f.write_str(s)
    }
}

/// The result of one delivery attempt. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { kind: FailureKind, detail: String },
}

impl DeliveryOutcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Failed { detail, .. } => Some(detail),
        }
    }
}
