//! Mail-merge Domain
//!
//! Sends one personalized HTML email per row of a CSV file.
//!
//! # Features
//!
//! - CSV recipient records with a case-insensitive `email` column
//! - Handlebars body templates with inline CSS and a signature link
//! - Hand-built MIME messages, optionally `multipart/related` with inline attachments
//! - Batch-wide rate limiting with FIFO admission
//! - Per-recipient failure isolation and cooperative cancellation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   CSV records   │  ← parse_records
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    Scheduler    │  ← one task per record
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │     Limiter     │  ← shared token bucket
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Render/Compose  │  ← TemplateEngine, MessageComposer
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Email Provider  │  ← SMTP, in-memory
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_mailmerge::{
//!     DeliveryLimiter, DeliveryScheduler, MessageComposer, RateLimitConfig, TemplateEngine,
//!     parse_records,
//!     providers::{SmtpConfig, SmtpProvider},
//! };
//!
//! let records = parse_records("templates/standard/data/data.csv")?;
//! let engine = TemplateEngine::from_dir("templates/standard", "body.html", None, "")?;
//! let composer = MessageComposer::new("me@gmail.com", "Hello")?;
//! let provider = SmtpProvider::new(SmtpConfig::gmail("me@gmail.com", "app-password"))?;
//! let limiter = DeliveryLimiter::new(RateLimitConfig::default())?;
//!
//! let scheduler = DeliveryScheduler::new(provider, engine, composer, limiter, shutdown_rx);
//! let outcomes = scheduler.deliver_all(records).await;
//! ```

pub mod composer;
pub mod error;
pub mod limiter;
pub mod models;
pub mod providers;
pub mod records;
pub mod scheduler;
pub mod templates;

// Re-export commonly used types
pub use composer::{ComposedMessage, MessageComposer};
pub use error::{FailureKind, MailMergeError, MailMergeResult};
pub use limiter::{DeliveryLimiter, RateLimitConfig};
pub use models::{
    Attachment, DeliveryFailure, DeliveryOutcome, DeliveryReport, DeliveryStage, HeaderSet,
    RecipientRecord,
};
pub use providers::{EmailProvider, InMemoryProvider, SmtpProvider};
pub use records::{parse_records, parse_records_from_reader};
pub use scheduler::DeliveryScheduler;
pub use templates::{Renderer, TemplateEngine};
