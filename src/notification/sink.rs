//! A `tracing` layer that forwards selected log events to the error group.
//!
//! The layer never performs network I/O on the thread that emitted the event.
//! Accepted events are converted to [`LogRecord`]s and offered to a bounded
//! queue; dedicated worker tasks drain the queue through the
//! [`NotificationDispatcher`]. When the queue is full the event is dropped.

use crate::config::Config;
use crate::core::{Body, Destination, FailureCause, LogRecord, NotificationRequest};
use crate::notification::dispatcher::NotificationDispatcher;
use crate::registry::{LookupError, ERROR_GROUP};
use crate::task_manager::TaskManager;
use anyhow::Result;
use async_channel::{Receiver, Sender, TrySendError};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{debug, info, warn, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Targets whose events are never forwarded: this crate's own diagnostics and
/// the HTTP stack underneath the transport.
const INTERNAL_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
];

/// Field names whose values are treated as stack traces.
const TRACE_FIELDS: &[&str] = &["backtrace", "stacktrace", "stack_trace"];

/// The set of levels that trigger a remote notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityFilter {
    levels: BTreeSet<Level>,
}

impl SeverityFilter {
    pub fn new(levels: impl IntoIterator<Item = Level>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            levels: config.logging.parse_levels()?,
        })
    }

    pub fn accepts(&self, level: &Level) -> bool {
        self.levels.contains(level)
    }
}

struct SinkShared {
    enabled: bool,
    started: AtomicBool,
    filter: SeverityFilter,
    exempt_targets: Vec<String>,
    tx: Sender<LogRecord>,
    dropped: AtomicU64,
}

impl SinkShared {
    fn is_exempt(&self, target: &str) -> bool {
        let matches = |prefix: &str| {
            target == prefix
                || target
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with("::"))
        };
        INTERNAL_TARGETS.iter().any(|p| matches(p))
            || self.exempt_targets.iter().any(|p| matches(p))
    }

    fn offer(&self, event: &Event<'_>) {
        if !self.enabled || !self.started.load(Ordering::Acquire) {
            return;
        }
        let metadata = event.metadata();
        if !self.filter.accepts(metadata.level()) || self.is_exempt(metadata.target()) {
            return;
        }

        let record = record_from_event(event);
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("log_events_dropped_total").increment(1);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// The layer installed into the `tracing` subscriber.
#[derive(Clone)]
pub struct LogEventSink {
    shared: Arc<SinkShared>,
}

/// Controls the workers behind a [`LogEventSink`].
pub struct SinkHandle {
    shared: Arc<SinkShared>,
    rx: Receiver<LogRecord>,
    workers: usize,
    drain_timeout: Duration,
}

impl LogEventSink {
    /// Creates the layer and the handle used to start and stop its workers.
    ///
    /// The layer stays inert until [`SinkHandle::start`] succeeds.
    pub fn new(config: &Config) -> Result<(Self, SinkHandle)> {
        let filter = SeverityFilter::from_config(config)?;
        let (tx, rx) = async_channel::bounded(config.logging.queue_size.max(1));
        let shared = Arc::new(SinkShared {
            enabled: config.is_logging_enabled(),
            started: AtomicBool::new(false),
            filter,
            exempt_targets: config.logging.exempt_targets.clone(),
            tx,
            dropped: AtomicU64::new(0),
        });

        let handle = SinkHandle {
            shared: shared.clone(),
            rx,
            workers: config.logging.workers.max(1),
            drain_timeout: Duration::from_millis(config.logging.shutdown_timeout_ms),
        };
        Ok((Self { shared }, handle))
    }
}

impl<S: Subscriber> Layer<S> for LogEventSink {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.shared.offer(event);
    }
}

impl SinkHandle {
    /// Spawns the delivery workers and opens the layer.
    ///
    /// Fails when no error group is registered; the layer then stays inert.
    pub fn start(
        &self,
        dispatcher: Arc<NotificationDispatcher>,
        tasks: &TaskManager,
    ) -> Result<(), LookupError> {
        if !self.shared.enabled {
            info!("Log forwarding disabled.");
            return Ok(());
        }
        if self.is_started() {
            debug!("Log forwarding already started.");
            return Ok(());
        }
        let destination = dispatcher.registry().resolve_by_name(ERROR_GROUP)?.clone();

        for id in 0..self.workers {
            let worker = SinkWorker {
                id,
                rx: self.rx.clone(),
                dispatcher: dispatcher.clone(),
                destination: destination.clone(),
                shared: self.shared.clone(),
            };
            tasks.spawn("log-sink-worker", worker.run());
        }

        self.shared.started.store(true, Ordering::Release);
        info!(
            workers = self.workers,
            destination = %destination,
            "Log forwarding started."
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Number of records waiting for a worker.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Number of records dropped because the queue was full, since the last report.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting events, lets the workers drain the queue for at most the
    /// configured timeout, then discards whatever is left.
    pub async fn shutdown(self, tasks: TaskManager) {
        self.shared.started.store(false, Ordering::Release);
        self.shared.tx.close();

        if !tasks.shutdown(self.drain_timeout).await {
            warn!(
                discarded = self.rx.len(),
                "Log queue not drained before the shutdown timeout."
            );
        }
        let dropped = self.shared.take_dropped();
        if dropped > 0 {
            warn!(dropped, "Log events were dropped because the queue was full.");
        }
    }

    #[cfg(test)]
    fn open_for_test(&self) {
        self.shared.started.store(true, Ordering::Release);
    }
}

struct SinkWorker {
    id: usize,
    rx: Receiver<LogRecord>,
    dispatcher: Arc<NotificationDispatcher>,
    destination: Destination,
    shared: Arc<SinkShared>,
}

impl SinkWorker {
    async fn run(self) {
        // FIFO per worker; `recv` fails once the queue is closed and empty.
        while let Ok(record) = self.rx.recv().await {
            let request = NotificationRequest::new(self.destination.clone(), Body::Event(record));
            self.dispatcher.dispatch(request).await;

            let dropped = self.shared.take_dropped();
            if dropped > 0 {
                warn!(worker = self.id, dropped, "Log events were dropped because the queue was full.");
            }
        }
        info!(worker = self.id, "Log sink worker finished.");
    }
}

/// Collects an event's fields into a [`LogRecord`].
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
    cause: Option<FailureCause>,
}

impl RecordVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        let name = field.name();
        if name == "message" {
            self.message = Some(value);
        } else if TRACE_FIELDS.contains(&name) {
            let cause = self.cause.get_or_insert_with(FailureCause::default);
            cause.frames.extend(
                value
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    fn into_record(self, level: Level, target: &str) -> LogRecord {
        let mut message = self.message.unwrap_or_default();
        for (name, value) in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&format!("{name}={value}"));
        }
        LogRecord {
            level,
            logger_name: target.to_string(),
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            message,
            cause: self.cause,
        }
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        let mut frames = Vec::new();
        let mut source = value.source();
        while let Some(err) = source {
            frames.push(format!("caused by: {err}"));
            source = err.source();
        }

        let cause = self.cause.get_or_insert_with(FailureCause::default);
        if cause.summary.is_empty() {
            cause.summary = value.to_string();
        }
        // Cause chain first, explicit backtrace lines after.
        frames.append(&mut cause.frames);
        cause.frames = frames;

        self.fields.push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn record_from_event(event: &Event<'_>) -> LogRecord {
    let mut visitor = RecordVisitor::default();
    event.record(&mut visitor);
    let metadata = event.metadata();
    visitor.into_record(*metadata.level(), metadata.target())
}
