//! Credential bootstrap
//!
//! Decides which workload identity the cluster gets and, in `create` mode,
//! mints it: application registration, service principal, then a role
//! assignment over the deployment's resource group. Role assignment retries
//! with a fixed delay until the new principal has replicated through the
//! directory; the policy is injectable so tests can bound it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{
    resource_group_scope, role_definition_id, ApplicationRequest, IdentityDirectory,
    RoleAssignmentRequest, OWNER_ROLE_ID,
};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::{Error, Result};

/// Delay between role-assignment attempts
pub const ROLE_ASSIGNMENT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Lifetime of a created application's password credential
pub const CREDENTIAL_LIFETIME_DAYS: i64 = 10_000;

/// How the operator authenticated to the cloud
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Interactive device-code login
    #[default]
    Device,
    /// Client id plus shared secret
    ClientSecret,
    /// Client id plus certificate
    ClientCertificate,
}

impl AuthMethod {
    /// Wire and CLI name
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Device => "device",
            AuthMethod::ClientSecret => "client_secret",
            AuthMethod::ClientCertificate => "client_certificate",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "device" => Ok(AuthMethod::Device),
            "client_secret" => Ok(AuthMethod::ClientSecret),
            "client_certificate" => Ok(AuthMethod::ClientCertificate),
            other => Err(Error::configuration_for(
                "auth_method",
                format!(
                    "unknown auth method {:?} (expected device, client_secret or client_certificate)",
                    other
                ),
            )),
        }
    }
}

/// Where the cluster's workload identity comes from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Create a new application, principal and role assignment
    #[default]
    Create,
    /// Hand the operator's own client id and secret to the cluster
    Passthrough,
    /// No cloud integration; the identity is empty
    Disabled,
}

impl CredentialMode {
    /// Wire and CLI name
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialMode::Create => "create",
            CredentialMode::Passthrough => "passthrough",
            CredentialMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(CredentialMode::Create),
            "passthrough" => Ok(CredentialMode::Passthrough),
            "disabled" => Ok(CredentialMode::Disabled),
            other => Err(Error::configuration_for(
                "credential_mode",
                format!(
                    "unknown credential mode {:?} (expected create, passthrough or disabled)",
                    other
                ),
            )),
        }
    }
}

/// The operator's own identity, as a passthrough candidate
#[derive(Clone, PartialEq, Eq)]
pub struct OperatorCredential {
    /// How the operator authenticated
    pub auth_method: AuthMethod,
    /// Operator client id (empty for device login)
    pub client_id: String,
    /// Operator client secret (empty unless `client_secret`)
    pub client_secret: String,
}

impl fmt::Debug for OperatorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorCredential")
            .field("auth_method", &self.auth_method)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Identity the cluster uses to call the cloud API
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WorkloadIdentity {
    /// Client (application) id
    pub client_id: String,
    /// Shared secret
    pub client_secret: String,
}

impl WorkloadIdentity {
    /// The identity used when cloud integration is disabled
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether both fields are empty
    pub fn is_empty(&self) -> bool {
        self.client_id.is_empty() && self.client_secret.is_empty()
    }
}

impl fmt::Debug for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadIdentity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Produces the workload identity for one run
pub struct CredentialBootstrap<'a, D: IdentityDirectory + ?Sized> {
    directory: &'a D,
    subscription_id: String,
    role_id: String,
    policy: RetryPolicy,
}

impl<'a, D: IdentityDirectory + ?Sized> CredentialBootstrap<'a, D> {
    /// Bootstrap against `directory`, granting Owner and retrying forever
    pub fn new(directory: &'a D, subscription_id: impl Into<String>) -> Self {
        Self {
            directory,
            subscription_id: subscription_id.into(),
            role_id: OWNER_ROLE_ID.to_string(),
            policy: RetryPolicy::forever(ROLE_ASSIGNMENT_RETRY_DELAY),
        }
    }

    /// Override the role-assignment retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the built-in role granted to the new principal
    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.role_id = role_id.into();
        self
    }

    /// Resolve the workload identity for `mode`.
    ///
    /// `disabled` and `passthrough` make no remote calls. A passthrough with
    /// anything other than a client-secret login is a configuration error.
    pub async fn bootstrap(
        &self,
        mode: CredentialMode,
        operator: &OperatorCredential,
        deployment_name: &str,
        resource_group: &str,
    ) -> Result<WorkloadIdentity> {
        match mode {
            CredentialMode::Disabled => {
                info!("cloud integration disabled, workload identity left empty");
                Ok(WorkloadIdentity::empty())
            }
            CredentialMode::Passthrough => {
                if operator.auth_method != AuthMethod::ClientSecret {
                    return Err(Error::configuration_for(
                        "credential_mode",
                        format!(
                            "cannot pass through a {} credential, only client_secret carries a secret",
                            operator.auth_method
                        ),
                    ));
                }
                info!(client_id = %operator.client_id, "passing operator credential through to the cluster");
                Ok(WorkloadIdentity {
                    client_id: operator.client_id.clone(),
                    client_secret: operator.client_secret.clone(),
                })
            }
            CredentialMode::Create => self.create(deployment_name, resource_group).await,
        }
    }

    async fn create(&self, deployment_name: &str, resource_group: &str) -> Result<WorkloadIdentity> {
        let display_name = format!("{}-{}", deployment_name, Uuid::new_v4().simple());
        let start_date = Utc::now();
        let request = ApplicationRequest {
            identifier_uri: format!("https://{}/", display_name),
            display_name,
            secret_key_id: Uuid::new_v4(),
            secret: Uuid::new_v4().to_string(),
            start_date,
            end_date: start_date + chrono::Duration::days(CREDENTIAL_LIFETIME_DAYS),
        };

        info!(application = %request.display_name, "creating application");
        let application = self.directory.create_application(&request).await?;
        debug!(
            application_id = %application.application_id,
            object_id = %application.object_id,
            "application created"
        );

        let principal = self
            .directory
            .create_service_principal(&application.application_id)
            .await?;
        info!(
            application_id = %application.application_id,
            principal_id = %principal.object_id,
            "service principal created"
        );

        let assignment = RoleAssignmentRequest {
            name: Uuid::new_v4().to_string(),
            scope: resource_group_scope(&self.subscription_id, resource_group),
            role_definition_id: role_definition_id(&self.subscription_id, &self.role_id),
            principal_id: principal.object_id.clone(),
        };
        retry_with_policy(&self.policy, "create_role_assignment", || {
            self.directory.create_role_assignment(&assignment)
        })
        .await?;
        info!(
            principal_id = %principal.object_id,
            scope = %assignment.scope,
            "role assignment created"
        );

        Ok(WorkloadIdentity {
            client_id: application.application_id,
            client_secret: request.secret,
        })
    }
}
