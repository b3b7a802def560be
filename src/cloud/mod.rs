//! Cloud control plane: identity directory and resource manager
//!
//! The pipeline talks to two remote APIs. Both sit behind traits so the
//! credential bootstrap, the deployment submitter and the orchestrator can be
//! driven by in-memory fakes in tests:
//!
//! - [`IdentityDirectory`]: applications, service principals, role assignments
//! - [`ResourceManager`]: resource groups, template deployments, resource listing
//!
//! [`AzureClient`] implements both over HTTPS with bearer tokens.

mod azure;
mod error;

pub use azure::{AzureClient, DEFAULT_POLL_INTERVAL};
pub use error::CloudError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::template::Document;

/// Graph API version for applications and service principals
pub const GRAPH_API_VERSION: &str = "1.6";

/// Authorization API version for role assignments
pub const AUTHORIZATION_API_VERSION: &str = "2015-07-01";

/// Resource manager API version for groups, deployments and listings
pub const RESOURCES_API_VERSION: &str = "2016-02-01";

/// Built-in Owner role
pub const OWNER_ROLE_ID: &str = "8e3af657-a8ff-443c-a75c-2fe8c4bcb635";

/// Built-in Contributor role
pub const CONTRIBUTOR_ROLE_ID: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

/// Fully qualified role definition id within a subscription
pub fn role_definition_id(subscription_id: &str, role_id: &str) -> String {
    format!(
        "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
        subscription_id, role_id
    )
}

/// Role assignment scope covering one resource group
pub fn resource_group_scope(subscription_id: &str, resource_group: &str) -> String {
    format!(
        "subscriptions/{}/resourceGroups/{}",
        subscription_id, resource_group
    )
}

/// A new application registration with one password credential
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationRequest {
    /// Display name
    pub display_name: String,
    /// Homepage and sole identifier URI
    pub identifier_uri: String,
    /// Id of the password credential
    pub secret_key_id: uuid::Uuid,
    /// Secret value handed to the workload
    pub secret: String,
    /// Credential valid from
    pub start_date: DateTime<Utc>,
    /// Credential valid until
    pub end_date: DateTime<Utc>,
}

/// A created application
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Application {
    /// Application (client) id
    #[serde(rename = "appId")]
    pub application_id: String,
    /// Directory object id
    #[serde(rename = "objectId")]
    pub object_id: String,
}

/// A created service principal
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ServicePrincipal {
    /// Directory object id; the principal in role assignments
    #[serde(rename = "objectId")]
    pub object_id: String,
    /// Application the principal belongs to
    #[serde(rename = "appId", default)]
    pub application_id: String,
}

/// Binding of a principal to a role over a scope
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleAssignmentRequest {
    /// Assignment name (a UUID), stable across retries
    pub name: String,
    /// Scope, e.g. `subscriptions/<sub>/resourceGroups/<rg>`
    pub scope: String,
    /// Fully qualified role definition id
    pub role_definition_id: String,
    /// Service principal object id
    pub principal_id: String,
}

/// How a deployment treats resources the template does not mention
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// Leave unlisted resources untouched
    #[default]
    Incremental,
    /// Delete unlisted resources
    Complete,
}

/// A template deployment into a resource group
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentRequest {
    /// Target resource group
    pub resource_group: String,
    /// Deployment name
    pub deployment_name: String,
    /// Deployment template document
    pub template: Document,
    /// Parameters document
    pub parameters: Document,
    /// Application mode
    pub mode: DeploymentMode,
}

/// Terminal state of a successful deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentOutcome {
    /// Deployment name
    pub deployment_name: String,
    /// Final provisioning state (always `Succeeded`)
    pub provisioning_state: String,
    /// Correlation id, when reported
    pub correlation_id: Option<String>,
}

/// One resource in a resource group
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ResourceSummary {
    /// Fully qualified resource id
    #[serde(default)]
    pub id: String,
    /// Resource name
    pub name: String,
    /// Resource type, e.g. `Microsoft.Compute/virtualMachines`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Region
    #[serde(default)]
    pub location: Option<String>,
}

/// Directory operations needed to mint a workload identity
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Register an application with one password credential
    async fn create_application(
        &self,
        request: &ApplicationRequest,
    ) -> Result<Application, CloudError>;

    /// Create the service principal for an application
    async fn create_service_principal(
        &self,
        application_id: &str,
    ) -> Result<ServicePrincipal, CloudError>;

    /// Create (or re-create, by name) a role assignment
    async fn create_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> Result<(), CloudError>;
}

/// Resource manager operations used by the pipeline
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Create or update a resource group
    async fn ensure_resource_group(&self, name: &str, location: &str) -> Result<(), CloudError>;

    /// Create or update a deployment and wait for it to reach a terminal state
    async fn create_or_update_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, CloudError>;

    /// List every resource in a resource group
    async fn list_resources(&self, resource_group: &str)
        -> Result<Vec<ResourceSummary>, CloudError>;
}
