//! Provisioning orchestrator
//!
//! Runs every stage strictly in order and stops at the first failure, tagging
//! it with the [`Stage`] it came from. Nothing is cleaned up on failure: the
//! resource group, any directory objects and the artifacts written so far stay
//! in place for inspection or a later destroy.

use std::path::PathBuf;

use tracing::info;

use crate::artifacts::{ArtifactWriter, DEPLOY_DOCUMENT, PARAMETERS_DOCUMENT, UTIL_SCRIPT};
use crate::cloud::{IdentityDirectory, ResourceManager, ResourceSummary};
use crate::config::{CloudAuth, ResolvedDeployment};
use crate::deploy::DeploymentSubmitter;
use crate::error::{ProvisionError, Stage, StageResultExt};
use crate::identity::CredentialBootstrap;
use crate::keys::{issue_ssh_identity, KeySize};
use crate::pki::{CertificateAuthorityEngine, CertificateChain, ServerIdentity};
use crate::retry::RetryPolicy;
use crate::template::{FlavorRenderer, TemplateArguments};
use crate::validate::{ClusterValidator, ControlPlaneConnector, KubeConnector};

/// Builds the validation connector once the PKI exists
pub trait ConnectorFactory: Send + Sync {
    /// Connector type produced
    type Connector: ControlPlaneConnector;

    /// Connector for the master at `master_fqdn`, trusting `chain.ca` and
    /// presenting `chain.client`
    fn connector(&self, master_fqdn: &str, chain: &CertificateChain) -> Self::Connector;
}

/// Connects with a kube client
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeConnectorFactory;

impl ConnectorFactory for KubeConnectorFactory {
    type Connector = KubeConnector;

    fn connector(&self, master_fqdn: &str, chain: &CertificateChain) -> KubeConnector {
        KubeConnector::new(master_fqdn, &chain.ca, &chain.client)
    }
}

/// What a successful run produced
#[derive(Clone, Debug)]
pub struct ProvisionReport {
    /// Deployment name
    pub deployment_name: String,
    /// Resource group
    pub resource_group: String,
    /// `https://<master fqdn>:6443`
    pub master_endpoint: String,
    /// Where artifacts were written
    pub output_directory: PathBuf,
    /// Workload identity client id (empty when disabled)
    pub workload_client_id: String,
    /// Resources in the group after deployment
    pub resources: Vec<ResourceSummary>,
    /// Validation attempts used
    pub validation_attempts: u32,
}

/// Runs the provisioning pipeline against injected cloud and cluster clients
pub struct Provisioner<'a, D: ?Sized, R: ?Sized, F> {
    directory: &'a D,
    resources: &'a R,
    connectors: F,
    key_size: KeySize,
    role_assignment_policy: Option<RetryPolicy>,
    validation_policy: Option<RetryPolicy>,
}

impl<'a, D, R, F> Provisioner<'a, D, R, F>
where
    D: IdentityDirectory + ?Sized,
    R: ResourceManager + ?Sized,
    F: ConnectorFactory,
{
    /// Pipeline with 4096-bit keys and the default retry budgets
    pub fn new(directory: &'a D, resources: &'a R, connectors: F) -> Self {
        Self {
            directory,
            resources,
            connectors,
            key_size: KeySize::default(),
            role_assignment_policy: None,
            validation_policy: None,
        }
    }

    /// RSA key size for the SSH identity and all certificates
    pub fn with_key_size(mut self, key_size: KeySize) -> Self {
        self.key_size = key_size;
        self
    }

    /// Override the role-assignment retry policy
    pub fn with_role_assignment_policy(mut self, policy: RetryPolicy) -> Self {
        self.role_assignment_policy = Some(policy);
        self
    }

    /// Override the validation attempt budget
    pub fn with_validation_policy(mut self, policy: RetryPolicy) -> Self {
        self.validation_policy = Some(policy);
        self
    }

    /// Provision `deployment` end to end
    pub async fn run(
        &self,
        deployment: &ResolvedDeployment,
        auth: &CloudAuth,
    ) -> Result<ProvisionReport, ProvisionError> {
        let name = deployment.deployment_name.as_str();
        info!(deployment = %name, resource_group = %deployment.resource_group, "provisioning started");

        auth.validate().in_stage(Stage::Configuration)?;
        deployment.validate(auth).in_stage(Stage::Configuration)?;

        info!(deployment = %name, stage = %Stage::ResourceGroup, "stage started");
        self.resources
            .ensure_resource_group(&deployment.resource_group, &deployment.location)
            .await
            .in_stage(Stage::ResourceGroup)?;

        info!(deployment = %name, stage = %Stage::CredentialBootstrap, "stage started");
        let mut bootstrap = CredentialBootstrap::new(self.directory, auth.subscription_id.clone());
        if let Some(policy) = &self.role_assignment_policy {
            bootstrap = bootstrap.with_retry_policy(policy.clone());
        }
        let identity = bootstrap
            .bootstrap(
                deployment.credential_mode,
                &auth.operator_credential(),
                name,
                &deployment.resource_group,
            )
            .await
            .in_stage(Stage::CredentialBootstrap)?;

        info!(deployment = %name, stage = %Stage::SshIdentity, "stage started");
        let ssh = issue_ssh_identity(self.key_size).in_stage(Stage::SshIdentity)?;

        info!(deployment = %name, stage = %Stage::Pki, "stage started");
        let server = ServerIdentity {
            fqdn: deployment.master_fqdn.clone(),
            extra_fqdns: deployment.master_extra_fqdns.clone(),
            cluster_domain: deployment.cluster_domain.clone(),
            ip_addresses: deployment.control_plane_ips(),
        };
        let chain = CertificateAuthorityEngine::new(self.key_size)
            .issue_chain(&server)
            .in_stage(Stage::Pki)?;

        info!(deployment = %name, stage = %Stage::Render, "stage started");
        let arguments = TemplateArguments {
            deployment_name: deployment.deployment_name.clone(),
            resource_group: deployment.resource_group.clone(),
            tenant_id: auth.tenant_id.clone(),
            master_size: deployment.master_size.clone(),
            node_size: deployment.node_size.clone(),
            node_count: deployment.node_count,
            username: deployment.username.clone(),
            ssh_public_key_data: ssh.authorized_key.clone(),
            service_principal_client_id: identity.client_id.clone(),
            service_principal_client_secret: identity.client_secret.clone(),
            master_fqdn: deployment.master_fqdn.clone(),
            master_private_ip: deployment.master_private_ip,
            cluster_domain: deployment.cluster_domain.clone(),
            kubernetes_hyperkube_spec: deployment.kubernetes_hyperkube_spec.clone(),
            ca_key_pair: chain.ca.clone(),
            apiserver_key_pair: chain.server.clone(),
            client_key_pair: chain.client.clone(),
        };
        let rendered = FlavorRenderer::new(&deployment.template_root, &deployment.flavor)
            .render(&arguments)
            .in_stage(Stage::Render)?;

        info!(deployment = %name, stage = %Stage::Persist, "stage started");
        let writer = ArtifactWriter::create(&deployment.output_directory).in_stage(Stage::Persist)?;
        writer.write_certificate_chain(&chain).in_stage(Stage::Persist)?;
        writer
            .write_ssh_key(&deployment.username, &ssh.private_key_pem)
            .in_stage(Stage::Persist)?;
        writer
            .write_document(DEPLOY_DOCUMENT, &rendered.template)
            .in_stage(Stage::Persist)?;
        writer
            .write_document(PARAMETERS_DOCUMENT, &rendered.parameters)
            .in_stage(Stage::Persist)?;
        writer
            .write_script(UTIL_SCRIPT, &rendered.util_script)
            .in_stage(Stage::Persist)?;

        info!(deployment = %name, stage = %Stage::Submit, "stage started");
        DeploymentSubmitter::new(self.resources)
            .submit(
                &deployment.resource_group,
                name,
                &rendered.template,
                &rendered.parameters,
            )
            .await
            .in_stage(Stage::Submit)?;

        let resources = self
            .resources
            .list_resources(&deployment.resource_group)
            .await
            .in_stage(Stage::Inventory)?;
        info!(deployment = %name, count = resources.len(), "deployment resources listed");

        info!(deployment = %name, stage = %Stage::Validate, "stage started");
        let mut validator = ClusterValidator::new(deployment.node_count);
        if let Some(policy) = &self.validation_policy {
            validator = validator.with_policy(policy.clone());
        }
        let connector = self.connectors.connector(&deployment.master_fqdn, &chain);
        let validation_attempts = validator
            .validate(&connector)
            .await
            .into_result()
            .in_stage(Stage::Validate)?;

        let report = ProvisionReport {
            deployment_name: deployment.deployment_name.clone(),
            resource_group: deployment.resource_group.clone(),
            master_endpoint: deployment.master_endpoint(),
            output_directory: deployment.output_directory.clone(),
            workload_client_id: identity.client_id.clone(),
            resources,
            validation_attempts,
        };
        info!(
            deployment = %name,
            endpoint = %report.master_endpoint,
            output_directory = %report.output_directory.display(),
            "provisioning complete"
        );
        Ok(report)
    }
}
