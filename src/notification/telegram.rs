//! A client for delivering notifications through the Telegram Bot API.

use crate::config::Config;
use crate::core::{DeliveryOutcome, Destination, FailureKind};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Parse mode matching the output of `HtmlFormatter`.
pub const PARSE_MODE_HTML: &str = "HTML";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request to the Bot API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bot API rejected the request (status {status}): {description}")]
    Api { status: u16, description: String },

    #[error("failed to read media file: {0}")]
    Io(#[from] std::io::Error),
}

/// A text message as sent to the remote API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    pub parse_mode: &'static str,
    pub disable_web_page_preview: bool,
    pub disable_notification: bool,
}

/// A photo or document upload as sent to the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMedia {
    pub chat_id: String,
    pub message_thread_id: Option<i64>,
    pub path: PathBuf,
    pub caption: Option<String>,
    pub parse_mode: &'static str,
    pub disable_notification: bool,
}

/// The remote chat platform. Implemented by [`BotApiTransport`] and by test stubs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
    async fn send_photo(&self, media: &OutgoingMedia) -> Result<(), TransportError>;
    async fn send_document(&self, media: &OutgoingMedia) -> Result<(), TransportError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Talks to `https://api.telegram.org/bot<token>/<method>`.
pub struct BotApiTransport {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl BotApiTransport {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = config
            .bot
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .context("bot.token is required to reach the Bot API")?;
        Ok(Self::new(
            &config.bot.api_url,
            token.trim(),
            Duration::from_secs(config.bot.request_timeout_seconds),
        )?)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    /// Maps a Bot API response onto success or a descriptive error.
    async fn check_response(
        method: &str,
        response: reqwest::Response,
    ) -> Result<(), TransportError> {
        let status = response.status();
        // Error URLs embed the token, so they are stripped before surfacing.
        let text = response.text().await.map_err(|e| e.without_url())?;
        let parsed = serde_json::from_str::<ApiResponse>(&text).ok();

        match parsed {
            Some(body) if status.is_success() && body.ok => {
                debug!(method, "Bot API call succeeded");
                Ok(())
            }
            Some(body) => {
                let description = body.description.unwrap_or_else(|| text.clone());
                debug!(method, status = %status, %description, "Bot API call failed");
                Err(TransportError::Api {
                    status: status.as_u16(),
                    description,
                })
            }
            None => {
                debug!(method, status = %status, body = %text, "Unexpected Bot API response");
                Err(TransportError::Api {
                    status: status.as_u16(),
                    description: text,
                })
            }
        }
    }

    async fn upload(
        &self,
        method: &str,
        field: &'static str,
        media: &OutgoingMedia,
    ) -> Result<(), TransportError> {
        let bytes = tokio::fs::read(&media.path).await?;
        let file_name = media
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.to_string());

        let mut form = Form::new()
            .text("chat_id", media.chat_id.clone())
            .text("parse_mode", media.parse_mode)
            .text("disable_notification", media.disable_notification.to_string())
            .part(field, Part::bytes(bytes).file_name(file_name));
        if let Some(thread) = media.message_thread_id {
            form = form.text("message_thread_id", thread.to_string());
        }
        if let Some(caption) = &media.caption {
            form = form.text("caption", caption.clone());
        }

        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Self::check_response(method, response).await
    }
}

#[async_trait]
impl Transport for BotApiTransport {
    #[instrument(skip_all, fields(chat_id = %message.chat_id))]
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(message)
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Self::check_response("sendMessage", response).await
    }

    #[instrument(skip_all, fields(chat_id = %media.chat_id))]
    async fn send_photo(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
        self.upload("sendPhoto", "photo", media).await
    }

    #[instrument(skip_all, fields(chat_id = %media.chat_id))]
    async fn send_document(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
        self.upload("sendDocument", "document", media).await
    }
}

/// Per-message flags applied to every outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub disable_web_page_preview: bool,
    pub disable_notification: bool,
}

impl DeliverySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            disable_web_page_preview: config.message.disable_web_page_preview,
            disable_notification: config.message.disable_notification,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            disable_web_page_preview: true,
            disable_notification: false,
        }
    }
}

/// Stateless façade over a [`Transport`].
///
/// Every call yields a [`DeliveryOutcome`]; transport errors are converted at
/// this boundary and never returned to the caller.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    settings: DeliverySettings,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, settings: DeliverySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub async fn send_text(&self, destination: &Destination, text: &str) -> DeliveryOutcome {
        self.send_message(destination, text, None).await
    }

    /// Sends `text` as a reply to an earlier message in the same chat.
    pub async fn send_reply(
        &self,
        destination: &Destination,
        text: &str,
        reply_to_message_id: i64,
    ) -> DeliveryOutcome {
        self.send_message(destination, text, Some(reply_to_message_id))
            .await
    }

    pub async fn send_message(
        &self,
        destination: &Destination,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> DeliveryOutcome {
        let message = OutgoingMessage {
            chat_id: destination.id().to_string(),
            message_thread_id: destination.thread_id(),
            text: text.to_string(),
            reply_to_message_id,
            parse_mode: PARSE_MODE_HTML,
            disable_web_page_preview: self.settings.disable_web_page_preview,
            disable_notification: self.settings.disable_notification,
        };
        into_outcome(self.transport.send_message(&message).await)
    }

    pub async fn send_photo(
        &self,
        destination: &Destination,
        path: &Path,
        caption: Option<&str>,
    ) -> DeliveryOutcome {
        let media = match self.media(destination, path, caption).await {
            Ok(media) => media,
            Err(outcome) => return outcome,
        };
        into_outcome(self.transport.send_photo(&media).await)
    }

    pub async fn send_document(
        &self,
        destination: &Destination,
        path: &Path,
        caption: Option<&str>,
    ) -> DeliveryOutcome {
        let media = match self.media(destination, path, caption).await {
            Ok(media) => media,
            Err(outcome) => return outcome,
        };
        into_outcome(self.transport.send_document(&media).await)
    }

    /// Builds the upload request once the file is known to be readable.
    async fn media(
        &self,
        destination: &Destination,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<OutgoingMedia, DeliveryOutcome> {
        check_readable(path)
            .await
            .map_err(|detail| DeliveryOutcome::failed(FailureKind::PreconditionFailed, detail))?;
        Ok(OutgoingMedia {
            chat_id: destination.id().to_string(),
            message_thread_id: destination.thread_id(),
            path: path.to_path_buf(),
            caption: caption.map(str::to_string),
            parse_mode: PARSE_MODE_HTML,
            disable_notification: self.settings.disable_notification,
        })
    }
}

async fn check_readable(path: &Path) -> Result<(), String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("{}: not a regular file", path.display()));
    }
    tokio::fs::File::open(path)
        .await
        .map(|_| ())
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn into_outcome(result: Result<(), TransportError>) -> DeliveryOutcome {
    match result {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(e) => DeliveryOutcome::failed(FailureKind::Transport, e.to_string()),
    }
}

#[cfg(test)]
mod delivery_client_tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Message(OutgoingMessage),
        Photo(OutgoingMedia),
        Document(OutgoingMedia),
    }

    // A fake transport that records requests and can be told to fail.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn result(&self) -> Result<(), TransportError> {
            if self.fail {
                Err(TransportError::Api {
                    status: 400,
                    description: "Bad Request: chat not found".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Message(message.clone()));
            self.result()
        }

        async fn send_photo(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Photo(media.clone()));
            self.result()
        }

        async fn send_document(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(Sent::Document(media.clone()));
            self.result()
        }
    }

    fn client(transport: Arc<RecordingTransport>) -> DeliveryClient {
        DeliveryClient::new(transport, DeliverySettings::default())
    }

    #[tokio::test]
    async fn test_text_send_carries_thread_id() {
        let transport = Arc::new(RecordingTransport::default());
        let destination = Destination::new("100", Some(7), None);

        let outcome = client(transport.clone())
            .send_text(&destination, "build failed")
            .await;

        assert!(outcome.is_success());
        match &transport.sent()[..] {
            [Sent::Message(message)] => {
                assert_eq!(message.chat_id, "100");
                assert_eq!(message.message_thread_id, Some(7));
                assert_eq!(message.text, "build failed");
                assert_eq!(message.parse_mode, "HTML");
            }
            other => panic!("unexpected requests: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_carries_message_id() {
        let transport = Arc::new(RecordingTransport::default());
        let destination = Destination::new("100", Some(7), None);

        let outcome = client(transport.clone())
            .send_reply(&destination, "retrying", 4242)
            .await;

        assert!(outcome.is_success());
        match &transport.sent()[..] {
            [Sent::Message(message)] => {
                assert_eq!(message.reply_to_message_id, Some(4242));
                assert_eq!(message.message_thread_id, Some(7));
            }
            other => panic!("unexpected requests: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_positive_thread_id_sends_without_topic() {
        for thread in [None, Some(0), Some(-3)] {
            let transport = Arc::new(RecordingTransport::default());
            let destination = Destination::new("100", thread, None);
            client(transport.clone()).send_text(&destination, "hi").await;
            match &transport.sent()[..] {
                [Sent::Message(message)] => assert_eq!(message.message_thread_id, None),
                other => panic!("unexpected requests: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failed_outcome() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let outcome = client(transport)
            .send_text(&Destination::chat("100"), "hi")
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transport));
        assert!(outcome.error_detail().unwrap().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let outcome = client(transport.clone())
            .send_photo(
                &Destination::chat("100"),
                Path::new("/definitely/not/here.png"),
                None,
            )
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PreconditionFailed));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_valid_document() {
        let transport = Arc::new(RecordingTransport::default());
        let dir = tempfile::tempdir().unwrap();
        let outcome = client(transport.clone())
            .send_document(&Destination::chat("100"), dir.path(), None)
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PreconditionFailed));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_document_send_with_caption_and_topic() {
        let transport = Arc::new(RecordingTransport::default());
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "report body").unwrap();

        let outcome = client(transport.clone())
            .send_document(&Destination::new("-5", Some(3), None), file.path(), Some("Q3"))
            .await;

        assert!(outcome.is_success());
        match &transport.sent()[..] {
            [Sent::Document(media)] => {
                assert_eq!(media.chat_id, "-5");
                assert_eq!(media.message_thread_id, Some(3));
                assert_eq!(media.caption.as_deref(), Some("Q3"));
                assert_eq!(media.path, file.path());
            }
            other => panic!("unexpected requests: {other:?}"),
        }
    }
}
