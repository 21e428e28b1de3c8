//! In-memory email provider.
//!
//! Captures every message instead of sending it. Backs the `--dry-run` mode
//! of the CLI and the delivery tests.

use super::EmailProvider;
use crate::error::{MailMergeError, MailMergeResult};
use async_trait::async_trait;
use lettre::Address;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

/// A message captured by [`InMemoryProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: Address,
    pub to: Address,
    pub bytes: Vec<u8>,
}

impl SentMessage {
    /// Message bytes as text (lossy for raw binary attachments).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Provider that stores messages in memory.
#[derive(Default)]
pub struct InMemoryProvider {
    sent: Mutex<Vec<SentMessage>>,
    failing_recipients: HashSet<String>,
    failure_message: Option<String>,
}

impl InMemoryProvider {
    /// Create a provider that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that rejects every message with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Builder method to reject messages addressed to `address` only.
    pub fn with_failing_recipient(mut self, address: impl Into<String>) -> Self {
        self.failing_recipients.insert(address.into());
        self
    }

    /// All captured messages in arrival order.
    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Number of captured messages.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Check if a message was captured for `address`.
    pub async fn was_sent_to(&self, address: &str) -> bool {
        self.sent
            .lock()
            .await
            .iter()
            .any(|m| m.to.to_string() == address)
    }

    /// Captured message for `address`, if any.
    pub async fn message_for(&self, address: &str) -> Option<SentMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .find(|m| m.to.to_string() == address)
            .cloned()
    }
}

#[async_trait]
impl EmailProvider for InMemoryProvider {
    async fn send(&self, from: &Address, to: &Address, message: &[u8]) -> MailMergeResult<()> {
        if let Some(reason) = &self.failure_message {
            return Err(MailMergeError::Transport(reason.clone()));
        }
        if self.failing_recipients.contains(&to.to_string()) {
            return Err(MailMergeError::Transport(format!("recipient {} rejected", to)));
        }

        debug!(to = %to, size = message.len(), "Captured email in memory");
        self.sent.lock().await.push(SentMessage {
            from: from.clone(),
            to: to.clone(),
            bytes: message.to_vec(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn health_check(&self) -> MailMergeResult<()> {
        match &self.failure_message {
            Some(reason) => Err(MailMergeError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_captures_messages() {
        let provider = InMemoryProvider::new();
        provider
            .send(&addr("sender@example.com"), &addr("a@x.com"), b"hello")
            .await
            .unwrap();

        assert_eq!(provider.sent_count().await, 1);
        assert!(provider.was_sent_to("a@x.com").await);
        assert!(!provider.was_sent_to("b@x.com").await);
        assert_eq!(provider.message_for("a@x.com").await.unwrap().text(), "hello");
    }

    #[tokio::test]
    async fn test_failing_provider() {
        let provider = InMemoryProvider::failing("535 authentication failed");
        let err = provider
            .send(&addr("sender@example.com"), &addr("a@x.com"), b"hello")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("535 authentication failed"));
        assert!(provider.health_check().await.is_err());
        assert_eq!(provider.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_failing_recipient_only_affects_that_address() {
        let provider = InMemoryProvider::new().with_failing_recipient("b@x.com");
        let from = addr("sender@example.com");

        assert!(provider.send(&from, &addr("a@x.com"), b"1").await.is_ok());
        assert!(provider.send(&from, &addr("b@x.com"), b"2").await.is_err());
        assert_eq!(provider.sent_count().await, 1);
    }
}
