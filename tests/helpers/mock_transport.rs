//! A mock transport that records everything the dispatcher sends.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tgdispatch::notification::telegram::{
    OutgoingMedia, OutgoingMessage, Transport, TransportError,
};
use tokio::sync::Notify;

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Message(OutgoingMessage),
    Photo(OutgoingMedia),
    Document(OutgoingMedia),
}

#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Sent>>,
    failing_chats: HashSet<String>,
    delay: Option<Duration>,
    notify: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests to these chat ids fail with a 403 after being recorded.
    pub fn failing(chats: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing_chats: chats.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
    }

    /// Every request takes `delay` to complete.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` requests were recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    async fn record(&self, chat_id: &str, sent: Sent) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(sent);
        self.notify.notify_waiters();
        if self.failing_chats.contains(chat_id) {
            return Err(TransportError::Api {
                status: 403,
                description: "Forbidden: bot is not a member of the chat".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.record(&message.chat_id, Sent::Message(message.clone()))
            .await
    }

    async fn send_photo(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
        self.record(&media.chat_id, Sent::Photo(media.clone())).await
    }

    async fn send_document(&self, media: &OutgoingMedia) -> Result<(), TransportError> {
        self.record(&media.chat_id, Sent::Document(media.clone()))
            .await
    }
}
