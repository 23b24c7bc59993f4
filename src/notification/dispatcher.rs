//! The notification dispatcher orchestrates a single delivery: rate limiting,
//! formatting, transmission and outcome recording.

use crate::core::{Body, DeliveryOutcome, Destination, FailureKind, NotificationRequest};
use crate::formatting::MessageFormatter;
use crate::notification::telegram::DeliveryClient;
use crate::rate_limit::RateLimiter;
use crate::registry::{DestinationRegistry, LookupError, ERROR_GROUP, MAIN_GROUP, REPORT_GROUP};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Sends notifications to registered destinations.
///
/// Cheap to share behind an `Arc`; the only mutable state is the rate limiter.
pub struct NotificationDispatcher {
    registry: Arc<DestinationRegistry>,
    formatter: Box<dyn MessageFormatter>,
    limiter: Arc<RateLimiter>,
    client: DeliveryClient,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<DestinationRegistry>,
        formatter: Box<dyn MessageFormatter>,
        limiter: Arc<RateLimiter>,
        client: DeliveryClient,
    ) -> Self {
        Self {
            registry,
            formatter,
            limiter,
            client,
        }
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    /// Delivers one request and reports how it went.
    #[instrument(skip_all, fields(destination = %request.destination.label()))]
    pub async fn dispatch(&self, request: NotificationRequest) -> DeliveryOutcome {
        let destination = &request.destination;

        if !self.limiter.try_acquire() {
            let outcome = DeliveryOutcome::failed(
                FailureKind::RateLimited,
                format!(
                    "more than {} messages in {:?}",
                    self.limiter.capacity(),
                    self.limiter.window()
                ),
            );
            record(destination, &outcome);
            return outcome;
        }

        let caption = self.formatter.render_caption(request.caption.as_deref());
        let outcome = match &request.body {
            Body::Text(text) => {
                let payload = self.formatter.render_text(text, request.severity);
                self.client
                    .send_message(destination, &payload, request.reply_to)
                    .await
            }
            Body::Event(event) => {
                let payload = self.formatter.render_event(event);
                self.client
                    .send_message(destination, &payload, request.reply_to)
                    .await
            }
            Body::Photo(path) => {
                self.client
                    .send_photo(destination, path, caption.as_deref())
                    .await
            }
            Body::Document(path) => {
                self.client
                    .send_document(destination, path, caption.as_deref())
                    .await
            }
        };

        record(destination, &outcome);
        outcome
    }

    /// Delivers to the destination registered under `name`.
    pub async fn dispatch_by_name(
        &self,
        name: &str,
        body: Body,
    ) -> Result<DeliveryOutcome, LookupError> {
        let destination = self.registry.resolve_by_name(name)?.clone();
        Ok(self.dispatch(NotificationRequest::new(destination, body)).await)
    }

    /// Delivers to the destination registered with chat id `id`.
    pub async fn dispatch_by_id(&self, id: &str, body: Body) -> Result<DeliveryOutcome, LookupError> {
        let destination = self.registry.resolve_by_id(id)?.clone();
        Ok(self.dispatch(NotificationRequest::new(destination, body)).await)
    }

    /// Replies to message `reply_to` in the chat registered with id `id`.
    pub async fn send_reply(
        &self,
        id: &str,
        reply_to: i64,
        text: &str,
    ) -> Result<DeliveryOutcome, LookupError> {
        let destination = self.registry.resolve_by_id(id)?.clone();
        let request = NotificationRequest::text(destination, text).with_reply_to(reply_to);
        Ok(self.dispatch(request).await)
    }

    pub async fn send_to_main_group(&self, text: &str) -> Result<DeliveryOutcome, LookupError> {
        self.dispatch_by_name(MAIN_GROUP, Body::Text(text.to_string())).await
    }

    pub async fn send_to_report_group(&self, text: &str) -> Result<DeliveryOutcome, LookupError> {
        self.dispatch_by_name(REPORT_GROUP, Body::Text(text.to_string())).await
    }

    pub async fn send_to_error_group(&self, text: &str) -> Result<DeliveryOutcome, LookupError> {
        self.dispatch_by_name(ERROR_GROUP, Body::Text(text.to_string())).await
    }

    pub async fn send_photo_to_main_group(
        &self,
        path: impl Into<PathBuf>,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        self.send_media(MAIN_GROUP, Body::Photo(path.into()), caption).await
    }

    pub async fn send_document_to_main_group(
        &self,
        path: impl Into<PathBuf>,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        self.send_media(MAIN_GROUP, Body::Document(path.into()), caption).await
    }

    pub async fn send_document_to_error_group(
        &self,
        path: impl Into<PathBuf>,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        self.send_media(ERROR_GROUP, Body::Document(path.into()), caption).await
    }

    /// Sends a photo or document with an optional caption to a named group.
    pub async fn send_media(
        &self,
        name: &str,
        body: Body,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        let destination = self.registry.resolve_by_name(name)?.clone();
        let mut request = NotificationRequest::new(destination, body);
        request.caption = caption.map(str::to_string);
        Ok(self.dispatch(request).await)
    }

    /// Sends a photo or document with an optional caption to the chat
    /// registered with id `id`.
    pub async fn send_media_by_id(
        &self,
        id: &str,
        body: Body,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        let destination = self.registry.resolve_by_id(id)?.clone();
        let mut request = NotificationRequest::new(destination, body);
        request.caption = caption.map(str::to_string);
        Ok(self.dispatch(request).await)
    }

    pub async fn send_photo_by_id(
        &self,
        id: &str,
        path: impl Into<PathBuf>,
        caption: Option<&str>,
    ) -> Result<DeliveryOutcome, LookupError> {
        self.send_media_by_id(id, Body::Photo(path.into()), caption).await
    }

    /// Sends `message` to every registered destination.
    ///
    /// Always returns one `(label, outcome)` pair per destination; a failure for
    /// one destination does not affect the others.
    pub async fn broadcast_to_all_groups(&self, message: &str) -> Vec<(String, DeliveryOutcome)> {
        let mut results = Vec::with_capacity(self.registry.len());
        for destination in self.registry.all() {
            let request = NotificationRequest::text(destination.clone(), message);
            let outcome = self.dispatch(request).await;
            results.push((destination.label().to_string(), outcome));
        }
        results
    }

    /// Dispatches on a background task; the caller may ignore the handle.
    pub fn spawn_dispatch(self: &Arc<Self>, request: NotificationRequest) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(request).await })
    }
}

/// Records the outcome locally. These records stay on this crate's target, which
/// the log sink never forwards.
fn record(destination: &Destination, outcome: &DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Delivered => {
            metrics::counter!("notifications_sent_total").increment(1);
            debug!(destination = %destination, "Notification delivered");
        }
        DeliveryOutcome::Failed { kind, detail } => {
            let kind_label = match kind {
                FailureKind::PreconditionFailed => "precondition",
                FailureKind::Transport => "transport",
                FailureKind::RateLimited => "rate_limited",
            };
            metrics::counter!("notifications_failed_total", "reason" => kind_label).increment(1);
            warn!(
                destination = %destination.label(),
                reason = %kind,
                error = %detail,
                "Notification not delivered"
            );
        }
    }
}
