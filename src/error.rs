//! Error types for kubeseed
//!
//! Every stage of the provisioning pipeline reports failures through [`Error`].
//! The orchestrator tags the first failure with the [`Stage`] it came from and
//! surfaces it as a [`ProvisionError`]; nothing is retried or rolled back at
//! that level.

use std::fmt;

use thiserror::Error;

use crate::cloud::CloudError;
use crate::pki::PkiError;
use crate::template::TemplateError;

/// Main error type for kubeseed operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration, detected before any remote call
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The offending setting (e.g., "credential_mode")
        field: Option<String>,
    },

    /// Key or certificate generation failed
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Script compilation or template materialization failed
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Cloud control plane call failed
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Cluster control plane could not be reached or queried
    #[error("control plane error: {message}")]
    ControlPlane {
        /// Description of what failed
        message: String,
    },

    /// Cluster never became healthy within the validation budget
    #[error("cluster failed validation after {attempts} attempts: {reason}")]
    ValidationExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Reason reported by the final attempt
        reason: String,
    },

    /// Writing a deployment artifact failed
    #[error("io error writing {path}: {source}")]
    Io {
        /// Path being written
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending setting
    pub fn configuration_for(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a control plane error with the given message
    pub fn control_plane(msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            message: msg.into(),
        }
    }

    /// Create an I/O error for the given artifact path
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether re-running the pipeline could plausibly succeed
    ///
    /// Configuration, crypto, template and terminal remote errors indicate
    /// something that has to be fixed first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Cloud(e) => e.is_transient(),
            Error::ControlPlane { .. } | Error::ValidationExhausted { .. } => true,
            Error::Configuration { .. }
            | Error::Pki(_)
            | Error::Template(_)
            | Error::Io { .. } => false,
        }
    }
}

/// Pipeline stage a failure originated from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Configuration validation
    Configuration,
    /// Resource group create-or-update
    ResourceGroup,
    /// Workload identity bootstrap
    CredentialBootstrap,
    /// SSH identity generation
    SshIdentity,
    /// CA and leaf certificate issuance
    Pki,
    /// Script compilation and template materialization
    Render,
    /// Writing artifacts to the output directory
    Persist,
    /// Deployment submission
    Submit,
    /// Listing what the deployment created
    Inventory,
    /// Post-deployment health validation
    Validate,
}

impl Stage {
    /// Stable lowercase name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::ResourceGroup => "resource-group",
            Stage::CredentialBootstrap => "credential-bootstrap",
            Stage::SshIdentity => "ssh-identity",
            Stage::Pki => "pki",
            Stage::Render => "render",
            Stage::Persist => "persist",
            Stage::Submit => "submit",
            Stage::Inventory => "inventory",
            Stage::Validate => "validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline failure tagged with the stage that produced it
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct ProvisionError {
    /// Stage that failed
    pub stage: Stage,
    /// The stage's error, unchanged
    #[source]
    pub source: Error,
}

impl ProvisionError {
    /// Tag an error with its originating stage
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }
}

/// Extension for tagging stage results with their [`Stage`]
pub trait StageResultExt<T> {
    /// Convert the error into a [`ProvisionError`] for `stage`
    fn in_stage(self, stage: Stage) -> std::result::Result<T, ProvisionError>;
}

impl<T, E: Into<Error>> StageResultExt<T> for std::result::Result<T, E> {
    fn in_stage(self, stage: Stage) -> std::result::Result<T, ProvisionError> {
        self.map_err(|e| ProvisionError::new(stage, e.into()))
    }
}
