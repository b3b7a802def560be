//! Kubeseed - provision a Kubernetes cluster on Azure from scratch
//!
//! A single run mints everything the cluster needs, hands it to the resource
//! manager as a template deployment, and waits until the cluster reports
//! healthy.
//!
//! # Pipeline
//!
//! Stages run strictly in order; the first failure stops the run and is
//! reported with the stage it came from:
//!
//! 1. configuration validation
//! 2. resource group create-or-update
//! 3. workload identity (create, passthrough or disabled)
//! 4. SSH identity
//! 5. certificate authority plus apiserver and client leaves
//! 6. cloud-config compilation and template rendering
//! 7. artifacts written to the output directory
//! 8. deployment submission
//! 9. resource inventory
//! 10. bounded-retry cluster validation
//!
//! # Modules
//!
//! - [`config`] - Deploy configuration, defaults and validation
//! - [`keys`] - RSA keys and the SSH authorized-key encoding
//! - [`pki`] - Certificate authority engine
//! - [`template`] - Expression compiler, materializer and flavor rendering
//! - [`cloud`] - Directory and resource manager traits plus the HTTPS client
//! - [`identity`] - Credential bootstrap
//! - [`deploy`] - Deployment submission
//! - [`validate`] - Cluster validation
//! - [`artifacts`] - On-disk artifacts
//! - [`provision`] - The orchestrator
//! - [`retry`] - Fixed-delay retry shared by bootstrap and validation
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod artifacts;
pub mod cloud;
pub mod config;
pub mod deploy;
pub mod error;
pub mod identity;
pub mod keys;
pub mod pki;
pub mod provision;
pub mod retry;
pub mod template;
pub mod validate;

pub use error::{Error, ProvisionError, Stage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Port the master's API server listens on
pub const MASTER_API_PORT: u16 = 6443;
