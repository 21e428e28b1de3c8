//! Email body rendering.
//!
//! Bodies are Handlebars templates rendered against a recipient's fields.
//! Inside a template the fields live under `data` (`{{data.Name}}`), the
//! batch stylesheet under `css` (use `{{{css}}}` to skip escaping) and the
//! signature image link under `signature`.

use crate::error::{MailMergeError, MailMergeResult};
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

const BODY_TEMPLATE: &str = "body";

/// Turns a recipient's placeholder values into a complete HTML body.
///
/// Implementations must be pure: the same fields always produce the same
/// body, and concurrent calls need no external synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send + Sync {
    fn render(&self, fields: &HashMap<String, String>) -> MailMergeResult<String>;
}

#[derive(Serialize)]
struct TemplateData<'a> {
    css: &'a str,
    signature: &'a str,
    data: &'a HashMap<String, String>,
}

/// Handlebars-backed renderer holding one body template.
#[derive(Debug)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    css: String,
    signature_link: String,
}

impl TemplateEngine {
    /// Build an engine from template source held in memory.
    pub fn from_template_str(
        template: &str,
        css: impl Into<String>,
        signature_link: impl Into<String>,
    ) -> MailMergeResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(BODY_TEMPLATE, template)
            .map_err(|e| {
                MailMergeError::Configuration(format!("could not parse template: {}", e))
            })?;

        Ok(Self {
            handlebars,
            css: css.into(),
            signature_link: signature_link.into(),
        })
    }

    /// Load the body template `dir/body_file` and an optional stylesheet.
    ///
    /// A missing or invalid body template is fatal. An unreadable stylesheet
    /// only logs a warning and renders as empty CSS.
    pub fn from_dir(
        dir: impl AsRef<Path>,
        body_file: &str,
        css_file: Option<&Path>,
        signature_link: impl Into<String>,
    ) -> MailMergeResult<Self> {
        let body_path = dir.as_ref().join(body_file);
        let template = std::fs::read_to_string(&body_path).map_err(|e| {
            MailMergeError::Configuration(format!(
                "could not read template file '{}': {}",
                body_path.display(),
                e
            ))
        })?;

        let css = match css_file {
            Some(path) => std::fs::read_to_string(path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Could not read CSS file, rendering without styles");
                String::new()
            }),
            None => String::new(),
        };

        debug!(template = %body_path.display(), css_bytes = css.len(), "Loaded email template");
        Self::from_template_str(&template, css, signature_link)
    }

    /// Builder method to make references to missing fields a render error.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.handlebars.set_strict_mode(strict);
        self
    }
}

impl Renderer for TemplateEngine {
    fn render(&self, fields: &HashMap<String, String>) -> MailMergeResult<String> {
        let data = TemplateData {
            css: &self.css,
            signature: &self.signature_link,
            data: fields,
        };

        Ok(self.handlebars.render(BODY_TEMPLATE, &data)?)
    }
}
