//! Command line arguments.

use clap::{Parser, ValueEnum};
use domain_mailmerge::Attachment;
use domain_mailmerge::providers::TlsMode;
use std::path::PathBuf;

pub const DEFAULT_SIGNATURE: &str = "https://golang.sampa.br/img/golangsp01.png";

#[derive(Parser, Debug)]
#[command(name = "mailmerge")]
#[command(about = "Send one personalized HTML email per row of a CSV file")]
pub struct Cli {
    /// Subdirectory of the templates root containing the template files
    #[arg(long, default_value = "standard")]
    pub dir: String,

    /// Directory holding every template set
    #[arg(long, default_value = "templates")]
    pub templates_root: PathBuf,

    /// Body template file to use
    #[arg(long, default_value = "workshop-confirmation.html")]
    pub body: String,

    /// Stylesheet inside the template directory. Pass an empty value to skip it.
    #[arg(long, default_value = "styles.css")]
    pub css: String,

    /// Data file to use (read from the data subdirectory of the template directory)
    #[arg(long, default_value = "data.csv")]
    pub data: String,

    /// Signature link to use for the email body
    #[arg(long, default_value = DEFAULT_SIGNATURE)]
    pub signature: String,

    /// Subject of the email
    #[arg(long, default_value = "")]
    pub subject: String,

    /// Extra header, repeatable: "Key: Value"
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Inline attachment, repeatable: FILE:CONTENT_TYPE:CONTENT_ID[:raw].
    /// Relative paths are resolved inside the template directory.
    #[arg(long = "attachment", value_parser = parse_attachment)]
    pub attachments: Vec<Attachment>,

    /// SMTP relay preset
    #[arg(long, value_enum, default_value_t = ProviderPreset::Gmail)]
    pub provider: ProviderPreset,

    /// Override the relay host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the relay port
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the connection security
    #[arg(long, value_enum)]
    pub tls: Option<TlsArg>,

    /// Milliseconds for one send permit to replenish
    #[arg(long)]
    pub rate_interval_ms: Option<u64>,

    /// Sends allowed back to back before pacing starts
    #[arg(long)]
    pub rate_burst: Option<u32>,

    /// Fail a recipient whose row lacks a field the template uses
    #[arg(long)]
    pub strict: bool,

    /// Compose every message but keep it in memory instead of sending
    #[arg(long)]
    pub dry_run: bool,

    /// Print the delivery report as JSON
    #[arg(long)]
    pub json: bool,

    /// Sender address, also used as the SMTP username
    pub email: String,

    /// SMTP password (for Gmail, an app password)
    pub password: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderPreset {
    Gmail,
    Outlook,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsArg {
    None,
    Starttls,
    Implicit,
}

impl From<TlsArg> for TlsMode {
    fn from(arg: TlsArg) -> Self {
        match arg {
            TlsArg::None => TlsMode::None,
            TlsArg::Starttls => TlsMode::StartTls,
            TlsArg::Implicit => TlsMode::Implicit,
        }
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{s}': expected 'Key: Value'"))?;

    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid header name '{key}'"));
    }

    Ok((key.to_string(), value.trim().to_string()))
}

fn parse_attachment(s: &str) -> Result<Attachment, String> {
    let parts: Vec<&str> = s.split(':').collect();

    let (file, content_type, content_id, encoding) = match parts.as_slice() {
        [file, content_type, content_id] => (*file, *content_type, *content_id, None),
        [file, content_type, content_id, encoding] => {
            (*file, *content_type, *content_id, Some(*encoding))
        }
        _ => {
            return Err(format!(
                "invalid attachment '{s}': expected FILE:CONTENT_TYPE:CONTENT_ID[:raw]"
            ));
        }
    };

    if file.is_empty() || content_type.is_empty() || content_id.is_empty() {
        return Err(format!("invalid attachment '{s}': empty field"));
    }

    let base64_encode = match encoding {
        None | Some("base64") => true,
        Some("raw") => false,
        Some(other) => {
            return Err(format!("unknown attachment encoding '{other}', expected raw or base64"));
        }
    };

    Ok(Attachment::new(file, content_type, content_id).with_base64(base64_encode))
}
