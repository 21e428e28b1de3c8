//! Concurrent, rate-limited batch delivery.
//!
//! `deliver_all` spawns one task per record up front. Each task walks
//! `Pending -> RateGated -> Rendering -> Composing -> Sending -> Done` and
//! stops at the first failing stage; nothing is retried. Failures are
//! turned into that record's [`DeliveryOutcome`] and never reach sibling
//! tasks. `deliver_all` returns once every task has finished, with outcomes
//! in input order.

use crate::composer::MessageComposer;
use crate::error::{FailureKind, MailMergeResult};
use crate::limiter::DeliveryLimiter;
use crate::models::{DeliveryFailure, DeliveryOutcome, DeliveryStage, RecipientRecord};
use crate::providers::EmailProvider;
use crate::templates::Renderer;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span};

/// Read-only state shared by every delivery task of a batch.
struct DeliveryContext<P, R> {
    provider: Arc<P>,
    renderer: Arc<R>,
    composer: Arc<MessageComposer>,
    limiter: Arc<DeliveryLimiter>,
}

/// Fans a batch of records out to concurrent delivery tasks.
pub struct DeliveryScheduler<P, R> {
    context: Arc<DeliveryContext<P, R>>,
    shutdown: watch::Receiver<bool>,
}

impl<P, R> DeliveryScheduler<P, R>
where
    P: EmailProvider + 'static,
    R: Renderer + 'static,
{
    /// Create a new scheduler.
    ///
    /// Setting the `shutdown` channel to `true` cancels every task still
    /// waiting for a send permit.
    pub fn new(
        provider: P,
        renderer: R,
        composer: MessageComposer,
        limiter: DeliveryLimiter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::with_arcs(
            Arc::new(provider),
            Arc::new(renderer),
            Arc::new(composer),
            Arc::new(limiter),
            shutdown,
        )
    }

    /// Create a new scheduler with Arc-wrapped dependencies.
    pub fn with_arcs(
        provider: Arc<P>,
        renderer: Arc<R>,
        composer: Arc<MessageComposer>,
        limiter: Arc<DeliveryLimiter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            context: Arc::new(DeliveryContext {
                provider,
                renderer,
                composer,
                limiter,
            }),
            shutdown,
        }
    }

    /// Get a reference to the email provider.
    pub fn provider(&self) -> &P {
        &self.context.provider
    }

    /// Deliver every record and wait for all of them to finish.
    pub async fn deliver_all(&self, records: Vec<RecipientRecord>) -> Vec<DeliveryOutcome> {
        info!(
            total = records.len(),
            provider = self.context.provider.name(),
            "Starting delivery batch"
        );

        let (addresses, handles): (Vec<_>, Vec<_>) = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let context = Arc::clone(&self.context);
                let shutdown = self.shutdown.clone();
                let span = info_span!("delivery", index, to = %record.address);
                let address = record.address.clone();
                let handle = tokio::spawn(
                    async move { context.deliver(index, record, shutdown).await }.instrument(span),
                );
                (address, handle)
            })
            .unzip();

        let outcomes: Vec<DeliveryOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(addresses)
            .enumerate()
            .map(|(index, (result, address))| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(index, to = %address, error = %e, "Delivery task aborted");
                    DeliveryOutcome::failed(
                        index,
                        address,
                        DeliveryFailure {
                            kind: FailureKind::Internal,
                            detail: format!("delivery task aborted: {}", e),
                        },
                    )
                }
            })
            .collect();

        let sent = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            total = outcomes.len(),
            sent,
            failed = outcomes.len() - sent,
            "Delivery batch finished"
        );

        outcomes
    }
}

impl<P, R> DeliveryContext<P, R>
where
    P: EmailProvider,
    R: Renderer,
{
    async fn deliver(
        &self,
        index: usize,
        record: RecipientRecord,
        mut shutdown: watch::Receiver<bool>,
    ) -> DeliveryOutcome {
        let mut stage = DeliveryStage::Pending;

        match self.run_stages(&record, &mut shutdown, &mut stage).await {
            Ok(()) => {
                info!(to = %record.address, "Email successfully sent");
                DeliveryOutcome::sent(index, record.address)
            }
            Err(e) => {
                error!(to = %record.address, stage = %stage, error = %e, "Could not send email");
                let failure = DeliveryFailure::from(&e);
                DeliveryOutcome::failed(index, record.address, failure)
            }
        }
    }

    /// Run the pipeline, leaving `stage` at the stage that failed.
    async fn run_stages(
        &self,
        record: &RecipientRecord,
        shutdown: &mut watch::Receiver<bool>,
        stage: &mut DeliveryStage,
    ) -> MailMergeResult<()> {
        advance(stage, DeliveryStage::RateGated);
        self.limiter.acquire(shutdown).await?;

        advance(stage, DeliveryStage::Rendering);
        let body = self.renderer.render(&record.fields)?;

        advance(stage, DeliveryStage::Composing);
        let message = self.composer.compose(&record.address, &body).await?;

        advance(stage, DeliveryStage::Sending);
        self.provider
            .send(&self.composer.sender().email, message.recipient(), message.as_bytes())
            .await?;

        advance(stage, DeliveryStage::Done);
        Ok(())
    }
}

fn advance(stage: &mut DeliveryStage, next: DeliveryStage) {
    debug!(from = %stage, to = %next, "Delivery stage");
    *stage = next;
}
