//! Template error types

use thiserror::Error;

/// Errors from script compilation and template materialization.
///
/// All of these indicate an authoring problem in the flavor files and are
/// never retried.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Script contains a single quote, which `concat('...')` can't carry
    #[error("script {path} contains a single quote, which template expressions cannot escape")]
    SingleQuote {
        /// Script the quote was found in
        path: String,
    },

    /// Template or script file could not be read
    #[error("template not found: {path}: {source}")]
    TemplateNotFound {
        /// Path that was looked up
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Template source does not parse
    #[error("template syntax error in {path}: {message}")]
    Syntax {
        /// Template name
        path: String,
        /// Parser message
        message: String,
    },

    /// Template references an undefined field or a filter failed
    #[error("failed to execute template {path}: {message}")]
    Execution {
        /// Template name
        path: String,
        /// Renderer message
        message: String,
    },

    /// Rendered output is not a JSON object
    #[error("template {path} did not render to a JSON object: {message}")]
    MalformedDocument {
        /// Template name
        path: String,
        /// Parser message
        message: String,
    },
}

impl TemplateError {
    pub(crate) fn from_render(path: &str, err: minijinja::Error) -> Self {
        let message = err.to_string();
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => Self::Syntax {
                path: path.to_string(),
                message,
            },
            _ => Self::Execution {
                path: path.to_string(),
                message,
            },
        }
    }
}
