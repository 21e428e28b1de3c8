//! Error types for the mail-merge domain.

use serde::Serialize;
use thiserror::Error;

/// Result type for mail-merge operations.
pub type MailMergeResult<T> = Result<T, MailMergeError>;

/// Errors that can occur while preparing or delivering a batch.
///
/// Everything except [`MailMergeError::Configuration`] is scoped to a single
/// recipient and ends up in that recipient's `DeliveryOutcome`.
#[derive(Debug, Error)]
pub enum MailMergeError {
    /// Recipient address does not parse as a mailbox.
    #[error("Invalid recipient '{address}': {reason}")]
    InvalidRecipient { address: String, reason: String },

    /// Template execution failed for this recipient's fields.
    #[error("Template rendering error: {0}")]
    Render(String),

    /// An attachment file could not be read while composing the message.
    #[error("Could not read attachment '{file}': {source}")]
    AttachmentUnreadable {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Authentication or network failure reported by the transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The rate-limit wait was interrupted by shutdown.
    #[error("Delivery cancelled while waiting for a send permit")]
    Cancelled,

    /// Unusable template, data source, sender or limiter settings.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failure category recorded in a delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRecipient,
    Render,
    AttachmentUnreadable,
    Transport,
    Cancelled,
    /// The delivery task itself died (panic) before producing an outcome.
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidRecipient => write!(f, "invalid_recipient"),
            FailureKind::Render => write!(f, "render"),
            FailureKind::AttachmentUnreadable => write!(f, "attachment_unreadable"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

impl MailMergeError {
    /// Category used when this error is recorded against a recipient.
    pub fn kind(&self) -> FailureKind {
        match self {
            MailMergeError::InvalidRecipient { .. } => FailureKind::InvalidRecipient,
            MailMergeError::Render(_) => FailureKind::Render,
            MailMergeError::AttachmentUnreadable { .. } => FailureKind::AttachmentUnreadable,
            MailMergeError::Transport(_) => FailureKind::Transport,
            MailMergeError::Cancelled => FailureKind::Cancelled,
            // Configuration problems are caught before scheduling; if one
            // surfaces inside a task it is a bug, not a recipient problem.
            MailMergeError::Configuration(_) => FailureKind::Internal,
        }
    }

    /// Whether this error must abort the run before any delivery starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MailMergeError::Configuration(_))
    }
}

impl From<handlebars::RenderError> for MailMergeError {
    fn from(err: handlebars::RenderError) -> Self {
        MailMergeError::Render(err.to_string())
    }
}

impl From<csv::Error> for MailMergeError {
    fn from(err: csv::Error) -> Self {
        MailMergeError::Configuration(format!("could not read data file: {}", err))
    }
}

impl From<lettre::transport::smtp::Error> for MailMergeError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailMergeError::Transport(err.to_string())
    }
}
