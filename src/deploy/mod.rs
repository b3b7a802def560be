//! Deployment submission
//!
//! One create-or-update call per run, always incremental. Transient failures
//! are returned as-is; re-running is the caller's decision.

use tracing::info;

pub use crate::cloud::DeploymentMode;
use crate::cloud::{DeploymentOutcome, DeploymentRequest, ResourceManager};
use crate::template::Document;
use crate::Result;

/// Submits rendered documents to the resource manager
pub struct DeploymentSubmitter<'a, R: ResourceManager + ?Sized> {
    manager: &'a R,
}

impl<'a, R: ResourceManager + ?Sized> DeploymentSubmitter<'a, R> {
    /// Submitter backed by `manager`
    pub fn new(manager: &'a R) -> Self {
        Self { manager }
    }

    /// Create or update `deployment_name` in `resource_group`
    pub async fn submit(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &Document,
        parameters: &Document,
    ) -> Result<DeploymentOutcome> {
        let request = DeploymentRequest {
            resource_group: resource_group.to_string(),
            deployment_name: deployment_name.to_string(),
            template: template.clone(),
            parameters: parameters.clone(),
            mode: DeploymentMode::Incremental,
        };

        info!(
            deployment = %deployment_name,
            resource_group = %resource_group,
            "starting deployment"
        );
        let outcome = self.manager.create_or_update_deployment(&request).await?;
        info!(
            deployment = %deployment_name,
            state = %outcome.provisioning_state,
            "deployment finished"
        );

        Ok(outcome)
    }
}
