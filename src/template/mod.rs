//! Deployment template rendering
//!
//! Two steps turn a flavor directory into something the resource manager
//! accepts:
//!
//! - [`ExpressionCompiler`] rewrites cloud-config scripts into a single
//!   `[base64(concat(...))]` template expression
//! - [`TemplateMaterializer`] binds typed arguments into the JSON documents
//!   and the helper script
//!
//! [`FlavorRenderer`] ties both together for one flavor.

mod arguments;
mod compiler;
mod engine;
mod error;
mod flavor;

pub use arguments::{ScriptBindings, TemplateArguments};
pub use compiler::{js_escape, ExpressionCompiler, PlaceholderRule};
pub use engine::{b64, TemplateMaterializer};
pub use error::TemplateError;
pub use flavor::{
    FlavorRenderer, RenderedFlavor, DEPLOY_TEMPLATE, MASTER_SCRIPT, NODE_SCRIPT,
    PARAMETERS_TEMPLATE, UTIL_TEMPLATE,
};

/// A parsed JSON object with keys kept in document order
pub type Document = serde_json::Map<String, serde_json::Value>;
