//! Configuration for the mail-merge CLI.
//!
//! Precedence, highest first: command line flag, `MAILMERGE_*` environment
//! variable, provider preset or built-in default.

use crate::cli::{Cli, ProviderPreset};
use core_config::{ConfigError, FromEnv, env_parse};
use domain_mailmerge::providers::SmtpConfig;
use domain_mailmerge::{Attachment, HeaderSet, RateLimitConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Defaults read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub rate_interval_ms: Option<u64>,
    pub rate_burst: Option<u32>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
}

impl FromEnv for EnvDefaults {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rate_interval_ms: env_parse("MAILMERGE_RATE_INTERVAL_MS")?,
            rate_burst: env_parse("MAILMERGE_RATE_BURST")?,
            smtp_host: env_parse::<String>("MAILMERGE_SMTP_HOST")?.filter(|h| !h.is_empty()),
            smtp_port: env_parse("MAILMERGE_SMTP_PORT")?,
        })
    }
}

/// Fully resolved settings for one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub template_dir: PathBuf,
    pub body_file: String,
    pub css_path: Option<PathBuf>,
    pub data_path: PathBuf,
    pub signature: String,
    pub sender: String,
    pub subject: String,
    pub headers: HeaderSet,
    pub attachments: Vec<Attachment>,
    pub smtp: SmtpConfig,
    pub rate: RateLimitConfig,
    pub strict: bool,
    pub dry_run: bool,
    pub json: bool,
}

impl RunConfig {
    pub fn resolve(cli: Cli, env: EnvDefaults) -> Self {
        let template_dir = cli.templates_root.join(&cli.dir);
        let css_path = (!cli.css.is_empty()).then(|| template_dir.join(&cli.css));
        let data_path = template_dir.join("data").join(&cli.data);

        let attachments = cli
            .attachments
            .into_iter()
            .map(|mut attachment| {
                if attachment.file_name.is_relative() {
                    attachment.file_name = template_dir.join(&attachment.file_name);
                }
                attachment
            })
            .collect();

        let mut smtp = match cli.provider {
            ProviderPreset::Gmail => SmtpConfig::gmail(&cli.email, &cli.password),
            ProviderPreset::Outlook => SmtpConfig::outlook(&cli.email, &cli.password),
        };
        if let Some(host) = cli.host.or(env.smtp_host) {
            smtp = smtp.with_host(host);
        }
        if let Some(port) = cli.port.or(env.smtp_port) {
            smtp = smtp.with_port(port);
        }
        if let Some(tls) = cli.tls {
            smtp = smtp.with_tls(tls.into());
        }

        let defaults = RateLimitConfig::default();
        let rate = RateLimitConfig::new(
            cli.rate_interval_ms
                .or(env.rate_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            cli.rate_burst.or(env.rate_burst).unwrap_or(defaults.burst),
        );

        Self {
            template_dir,
            body_file: cli.body,
            css_path,
            data_path,
            signature: cli.signature,
            sender: cli.email,
            subject: cli.subject,
            headers: cli.headers.into_iter().collect(),
            attachments,
            smtp,
            rate,
            strict: cli.strict,
            dry_run: cli.dry_run,
            json: cli.json,
        }
    }
}
