//! Template materializer
//!
//! Flavor templates use minijinja's default `{{ ... }}` syntax with strict
//! undefined handling, so a typo in a field name fails the render instead of
//! producing an empty value. Besides the builtins, template authors get the
//! `b64` filter (URL-safe alphabet, padded). String values in JSON documents
//! go through `tojson` so operator input is escaped.

use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE, Engine};
use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

use super::error::TemplateError;
use super::Document;

/// `b64` filter
///
/// Usage: `{{ ca.certificate_pem | b64 }}`
pub fn b64(value: &str) -> String {
    URL_SAFE.encode(value.as_bytes())
}

/// Binds typed arguments into text templates
pub struct TemplateMaterializer {
    env: Environment<'static>,
}

impl Default for TemplateMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateMaterializer {
    /// Create a materializer with strict undefined handling and no auto-escaping
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Output is JSON or shell; values are escaped by the template author
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        env.add_filter("b64", b64);

        Self { env }
    }

    /// Render `source` as plain text
    pub fn render_text<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        args: &S,
    ) -> Result<String, TemplateError> {
        self.env
            .render_named_str(name, source, args)
            .map_err(|e| TemplateError::from_render(name, e))
    }

    /// Render `source` and parse the output as a JSON object
    pub fn materialize<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        args: &S,
    ) -> Result<Document, TemplateError> {
        let rendered = self.render_text(name, source, args)?;
        serde_json::from_str::<Document>(&rendered).map_err(|e| {
            TemplateError::MalformedDocument {
                path: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Read the template at `path` and render it as plain text
    pub fn render_file<S: Serialize>(&self, path: &Path, args: &S) -> Result<String, TemplateError> {
        let (name, source) = read_template(path)?;
        self.render_text(&name, &source, args)
    }

    /// Read the template at `path`, render it and parse it as a JSON object
    pub fn materialize_file<S: Serialize>(
        &self,
        path: &Path,
        args: &S,
    ) -> Result<Document, TemplateError> {
        let (name, source) = read_template(path)?;
        self.materialize(&name, &source, args)
    }
}

fn read_template(path: &Path) -> Result<(String, String), TemplateError> {
    let name = path.display().to_string();
    let source =
        std::fs::read_to_string(path).map_err(|source| TemplateError::TemplateNotFound {
            path: name.clone(),
            source,
        })?;
    Ok((name, source))
}
