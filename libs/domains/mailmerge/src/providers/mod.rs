//! Email provider implementations.
//!
//! This module contains the `EmailProvider` trait, the seam between the
//! delivery scheduler and whatever actually moves bytes to a mail relay.

mod memory;
mod smtp;

pub use memory::{InMemoryProvider, SentMessage};
pub use smtp::{SmtpConfig, SmtpProvider, TlsMode};

use crate::error::MailMergeResult;
use async_trait::async_trait;
use lettre::Address;

/// Trait for email sending providers.
///
/// `send` transmits one already composed message to one recipient. Each
/// call stands alone: a failure never affects later calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send raw message bytes with the given envelope.
    async fn send(&self, from: &Address, to: &Address, message: &[u8]) -> MailMergeResult<()>;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;

    /// Check that the relay is reachable and accepts our credentials.
    async fn health_check(&self) -> MailMergeResult<()>;
}
