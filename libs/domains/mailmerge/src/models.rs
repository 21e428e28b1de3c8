//! Data models for the mail-merge domain.

use crate::error::{FailureKind, MailMergeError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

// ============================================================================
// Batch input
// ============================================================================

/// One row of the data source: the addressee plus every column of the row.
///
/// The address is carried verbatim; it is validated when the message is
/// composed, not when the record is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRecord {
    /// Recipient address as it appeared in the address column.
    pub address: String,
    /// Placeholder values keyed by (trimmed) column header.
    pub fields: HashMap<String, String>,
}

impl RecipientRecord {
    /// Create a record from an address and its placeholder values.
    pub fn new(address: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            address: address.into(),
            fields,
        }
    }
}

/// Message headers.
///
/// Keys are case-sensitive and iteration is sorted by key, so serialization
/// order is stable across runs. Inserting an existing key replaces its value.
pub type HeaderSet = BTreeMap<String, String>;

/// A file attached to every message of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Path of the file read at composition time.
    pub file_name: PathBuf,
    /// MIME type written to the part's `Content-Type`.
    pub content_type: String,
    /// Identifier referenced from the HTML body as `cid:<content_id>`.
    pub content_id: String,
    /// Whether the bytes are base64-encoded. When false they are inserted raw.
    pub base64_encode: bool,
}

impl Attachment {
    /// Create a base64-encoded attachment.
    pub fn new(
        file_name: impl Into<PathBuf>,
        content_type: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content_id: content_id.into(),
            base64_encode: true,
        }
    }

    /// Builder method to toggle base64 encoding.
    pub fn with_base64(mut self, base64_encode: bool) -> Self {
        self.base64_encode = base64_encode;
        self
    }

    /// File name without directories, used in `Content-Disposition`.
    pub fn display_name(&self) -> String {
        self.file_name
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.to_string_lossy().into_owned())
    }

    /// Path the attachment is read from.
    pub fn path(&self) -> &Path {
        &self.file_name
    }
}

// ============================================================================
// Delivery state & outcome
// ============================================================================

/// Stage a delivery task is in. Tasks only ever move forward; a failure at
/// any stage ends the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    Pending,
    RateGated,
    Rendering,
    Composing,
    Sending,
    Done,
}

impl std::fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStage::Pending => write!(f, "pending"),
            DeliveryStage::RateGated => write!(f, "rate_gated"),
            DeliveryStage::Rendering => write!(f, "rendering"),
            DeliveryStage::Composing => write!(f, "composing"),
            DeliveryStage::Sending => write!(f, "sending"),
            DeliveryStage::Done => write!(f, "done"),
        }
    }
}

/// Why a delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl From<&MailMergeError> for DeliveryFailure {
    fn from(err: &MailMergeError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Terminal result of one record's delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    /// Position of the record in the batch input.
    pub index: usize,
    /// Recipient address as read from the data source.
    pub address: String,
    /// `None` when the message was accepted by the transport.
    pub failure: Option<DeliveryFailure>,
}

impl DeliveryOutcome {
    pub fn sent(index: usize, address: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
            failure: None,
        }
    }

    pub fn failed(index: usize, address: impl Into<String>, failure: DeliveryFailure) -> Self {
        Self {
            index,
            address: address.into(),
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
}

impl DeliveryReport {
    pub fn from_outcomes(outcomes: &[DeliveryOutcome]) -> Self {
        let mut report = DeliveryReport {
            total: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome.failure_kind() {
                None => report.sent += 1,
                Some(kind) => {
                    report.failed += 1;
                    *report.failures_by_kind.entry(kind).or_insert(0) += 1;
                }
            }
        }

        report
    }

    pub fn all_sent(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_defaults_to_base64() {
        let attachment = Attachment::new("assets/logo.png", "image/png", "logo");
        assert!(attachment.base64_encode);
        assert_eq!(attachment.display_name(), "logo.png");

        let raw = attachment.with_base64(false);
        assert!(!raw.base64_encode);
    }

    #[test]
    fn test_header_set_last_write_wins() {
        let mut headers = HeaderSet::new();
        headers.insert("Subject".into(), "system".into());
        headers.insert("Subject".into(), "custom".into());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["Subject"], "custom");
    }

    #[test]
    fn test_report_counts_by_kind() {
        let outcomes = vec![
            DeliveryOutcome::sent(0, "a@x.com"),
            DeliveryOutcome::failed(
                1,
                "",
                DeliveryFailure {
                    kind: FailureKind::InvalidRecipient,
                    detail: "empty".into(),
                },
            ),
            DeliveryOutcome::failed(
                2,
                "c@x.com",
                DeliveryFailure {
                    kind: FailureKind::Transport,
                    detail: "refused".into(),
                },
            ),
            DeliveryOutcome::sent(3, "d@x.com"),
        ];

        let report = DeliveryReport::from_outcomes(&outcomes);
        assert_eq!(report.total, 4);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.failures_by_kind[&FailureKind::InvalidRecipient], 1);
        assert_eq!(report.failures_by_kind[&FailureKind::Transport], 1);
        assert!(!report.all_sent());
    }

    #[test]
    fn test_empty_report_is_all_sent() {
        let report = DeliveryReport::from_outcomes(&[]);
        assert_eq!(report.total, 0);
        assert!(report.all_sent());
    }
}
