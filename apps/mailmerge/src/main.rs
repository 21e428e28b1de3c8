//! Mail Merge
//!
//! Sends one personalized HTML email per row of a CSV file, pacing sends
//! through a shared rate limit. Ctrl-C cancels every delivery still waiting
//! for a send permit; deliveries already past the gate run to completion.

use clap::Parser;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use domain_mailmerge::{
    DeliveryLimiter, DeliveryOutcome, DeliveryReport, DeliveryScheduler, EmailProvider,
    InMemoryProvider, MessageComposer, RecipientRecord, SmtpProvider, TemplateEngine,
    parse_records,
};
use eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

mod cli;
mod config;

use cli::Cli;
use config::{EnvDefaults, RunConfig};

#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a DeliveryReport,
    outcomes: &'a [DeliveryOutcome],
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();
    let env_defaults = EnvDefaults::from_env().wrap_err("Invalid MAILMERGE_* environment")?;
    let config = RunConfig::resolve(cli, env_defaults);

    let batch = Batch::load(&config)?;

    let outcomes = if config.dry_run {
        info!("Dry run: messages are composed but not sent");
        batch.run(InMemoryProvider::new(), &config).await
    } else {
        let provider = SmtpProvider::new(config.smtp.clone())?;
        if let Err(e) = provider.health_check().await {
            warn!(server = %config.smtp.server_address(), error = %e, "SMTP health check failed");
        }
        batch.run(provider, &config).await
    };

    let report = DeliveryReport::from_outcomes(&outcomes);
    info!(
        total = report.total,
        sent = report.sent,
        failed = report.failed,
        "Mail merge finished"
    );

    if config.json {
        let summary = RunSummary {
            report: &report,
            outcomes: &outcomes,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} sent, {} failed, {} total", report.sent, report.failed, report.total);
        for (kind, count) in &report.failures_by_kind {
            println!("  {kind}: {count}");
        }
    }

    if !report.all_sent() {
        eyre::bail!("{} of {} deliveries failed", report.failed, report.total);
    }

    Ok(())
}

/// Everything a run needs besides the provider.
///
/// Loading covers every input that would fail all recipients the same way
/// (template, data file, sender, rate settings), so a bad one aborts before
/// any network traffic or delivery task.
struct Batch {
    engine: TemplateEngine,
    records: Vec<RecipientRecord>,
    composer: MessageComposer,
    limiter: DeliveryLimiter,
}

impl Batch {
    fn load(config: &RunConfig) -> Result<Self> {
        let engine = TemplateEngine::from_dir(
            &config.template_dir,
            &config.body_file,
            config.css_path.as_deref(),
            config.signature.clone(),
        )
        .wrap_err("Failed to load email template")?
        .with_strict_mode(config.strict);

        let records = parse_records(&config.data_path)
            .wrap_err_with(|| format!("Failed to read {}", config.data_path.display()))?;

        let composer = MessageComposer::new(&config.sender, config.subject.clone())
            .wrap_err("Invalid sender address")?
            .with_headers(config.headers.clone())
            .with_attachments(config.attachments.clone());

        let limiter = DeliveryLimiter::new(config.rate).wrap_err("Invalid rate limit settings")?;

        Ok(Self {
            engine,
            records,
            composer,
            limiter,
        })
    }

    /// Deliver every record through `provider`. Ctrl-C cancels deliveries
    /// still waiting for a send permit.
    async fn run<P>(self, provider: P, config: &RunConfig) -> Vec<DeliveryOutcome>
    where
        P: EmailProvider + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling pending deliveries");
                let _ = shutdown_tx.send(true);
            }
        });

        info!(
            records = self.records.len(),
            provider = provider.name(),
            interval_ms = config.rate.interval.as_millis() as u64,
            burst = config.rate.burst,
            "Starting mail merge"
        );

        let scheduler = DeliveryScheduler::new(
            provider,
            self.engine,
            self.composer,
            self.limiter,
            shutdown_rx,
        );
        scheduler.deliver_all(self.records).await
    }
}
