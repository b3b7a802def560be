//! Post-deployment cluster validation
//!
//! Each attempt connects to the control plane afresh, then checks component
//! health and node readiness. Any failure is retried after a fixed delay until
//! the attempt budget runs out.
//!
//! ```text
//! Pending ──attempt ok──▶ Healthy
//!    │
//!    └──budget spent────▶ Exhausted
//! ```
//!
//! The ready-node check is "at least expected": extra ready nodes only warn.

mod cluster;

pub use cluster::{KubeConnector, KubeControlPlane};

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::{retry_with_policy, RetryPolicy};
use crate::{Error, Result};

/// Attempts before validation gives up
pub const VALIDATION_ATTEMPTS: u32 = 20;

/// Delay between validation attempts
pub const VALIDATION_DELAY: Duration = Duration::from_secs(15);

/// One control plane component's health
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Component name, e.g. `scheduler`
    pub name: String,
    /// Whether the `Healthy` condition is `True`
    pub healthy: bool,
    /// Condition message, if any
    pub message: Option<String>,
}

/// One node's readiness
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeReadiness {
    /// Node name
    pub name: String,
    /// `Ready` condition: `Some(true)`, `Some(false)`, or `None` if not reported
    pub ready: Option<bool>,
}

/// Read-only view of the cluster's control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List component health records
    async fn component_statuses(&self) -> Result<Vec<ComponentHealth>>;

    /// List nodes with their readiness
    async fn nodes(&self) -> Result<Vec<NodeReadiness>>;
}

/// Opens a fresh control plane client for each attempt
#[async_trait]
pub trait ControlPlaneConnector: Send + Sync {
    /// Client type produced
    type Client: ControlPlane;

    /// Build a client authenticated for the cluster
    async fn connect(&self) -> Result<Self::Client>;
}

/// Why a single validation attempt failed
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Client could not be built
    #[error("failed to connect to control plane: {0}")]
    Connect(String),

    /// A list call failed
    #[error("failed to query control plane: {0}")]
    Fetch(String),

    /// A component reported not healthy
    #[error("component {name} is unhealthy: {message}")]
    ComponentUnhealthy {
        /// Component name
        name: String,
        /// Condition message
        message: String,
    },

    /// A node reported `Ready=False`
    #[error("node {name} is not ready")]
    NodeNotReady {
        /// Node name
        name: String,
    },

    /// Fewer ready nodes than expected
    #[error("{actual} nodes ready, expected {expected}")]
    InsufficientReadyNodes {
        /// Expected count
        expected: u32,
        /// Ready count observed
        actual: u32,
    },
}

/// Terminal state of validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// An attempt passed every check
    Healthy {
        /// Attempts used, including the passing one
        attempts: u32,
    },
    /// The attempt budget ran out
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Failure reported by the last attempt
        last_failure: ValidationFailure,
    },
}

impl ValidationOutcome {
    /// Whether the cluster validated
    pub fn is_healthy(&self) -> bool {
        matches!(self, ValidationOutcome::Healthy { .. })
    }

    /// Attempts made in total
    pub fn attempts(&self) -> u32 {
        match self {
            ValidationOutcome::Healthy { attempts } | ValidationOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Attempts on success, [`Error::ValidationExhausted`] otherwise
    pub fn into_result(self) -> Result<u32> {
        match self {
            ValidationOutcome::Healthy { attempts } => Ok(attempts),
            ValidationOutcome::Exhausted {
                attempts,
                last_failure,
            } => Err(Error::ValidationExhausted {
                attempts,
                reason: last_failure.to_string(),
            }),
        }
    }
}

/// Drives validation attempts against a [`ControlPlaneConnector`]
#[derive(Clone, Debug)]
pub struct ClusterValidator {
    expected_nodes: u32,
    policy: RetryPolicy,
}

impl ClusterValidator {
    /// Validator expecting `expected_nodes` ready nodes, 20 attempts 15s apart
    pub fn new(expected_nodes: u32) -> Self {
        Self {
            expected_nodes,
            policy: RetryPolicy::bounded(VALIDATION_ATTEMPTS, VALIDATION_DELAY),
        }
    }

    /// Override the attempt budget and delay
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run attempts until healthy or the budget is spent
    pub async fn validate<C>(&self, connector: &C) -> ValidationOutcome
    where
        C: ControlPlaneConnector + ?Sized,
    {
        let mut attempts = 0u32;
        let result = retry_with_policy(&self.policy, "validate_cluster", || {
            attempts += 1;
            self.attempt(connector, attempts)
        })
        .await;

        match result {
            Ok(()) => {
                info!(attempts, "cluster validated");
                ValidationOutcome::Healthy { attempts }
            }
            Err(last_failure) => ValidationOutcome::Exhausted {
                attempts,
                last_failure,
            },
        }
    }

    async fn attempt<C>(&self, connector: &C, attempt: u32) -> std::result::Result<(), ValidationFailure>
    where
        C: ControlPlaneConnector + ?Sized,
    {
        debug!(attempt, "validating cluster");
        let client = connector
            .connect()
            .await
            .map_err(|e| ValidationFailure::Connect(e.to_string()))?;

        let components = client
            .component_statuses()
            .await
            .map_err(|e| ValidationFailure::Fetch(e.to_string()))?;
        for component in components {
            debug!(component = %component.name, healthy = component.healthy, "component status");
            if !component.healthy {
                return Err(ValidationFailure::ComponentUnhealthy {
                    name: component.name,
                    message: component.message.unwrap_or_default(),
                });
            }
        }

        let nodes = client
            .nodes()
            .await
            .map_err(|e| ValidationFailure::Fetch(e.to_string()))?;
        let mut ready = 0u32;
        for node in nodes {
            debug!(node = %node.name, ready = ?node.ready, "node status");
            match node.ready {
                Some(true) => ready += 1,
                Some(false) => return Err(ValidationFailure::NodeNotReady { name: node.name }),
                None => {}
            }
        }

        if ready < self.expected_nodes {
            return Err(ValidationFailure::InsufficientReadyNodes {
                expected: self.expected_nodes,
                actual: ready,
            });
        }
        if ready > self.expected_nodes {
            warn!(
                expected = self.expected_nodes,
                actual = ready,
                "more nodes ready than expected"
            );
        }

        Ok(())
    }
}
