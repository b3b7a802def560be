//! End-to-end pipeline tests with in-memory cloud and cluster fakes
//!
//! The real coreos flavor is rendered and every artifact is written to a
//! temporary directory; only the remote APIs are faked.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use kubeseed::cloud::{
    Application, ApplicationRequest, CloudError, DeploymentMode, DeploymentOutcome,
    DeploymentRequest, IdentityDirectory, ResourceManager, ResourceSummary,
    RoleAssignmentRequest, ServicePrincipal,
};
use kubeseed::config::{CloudAuth, DeployConfig, ResolvedDeployment};
use kubeseed::identity::{AuthMethod, CredentialMode};
use kubeseed::keys::KeySize;
use kubeseed::pki::CertificateChain;
use kubeseed::provision::{ConnectorFactory, Provisioner};
use kubeseed::retry::RetryPolicy;
use kubeseed::validate::{ComponentHealth, ControlPlane, ControlPlaneConnector, NodeReadiness};
use kubeseed::{Error, Stage};

// =============================================================================
// Fakes
// =============================================================================

/// Records every remote call in order
#[derive(Default)]
struct FakeCloud {
    calls: Mutex<Vec<String>>,
    role_failures: AtomicU32,
    deployments: Mutex<Vec<DeploymentRequest>>,
}

impl FakeCloud {
    fn with_role_failures(failures: u32) -> Self {
        Self {
            role_failures: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl IdentityDirectory for FakeCloud {
    async fn create_application(
        &self,
        request: &ApplicationRequest,
    ) -> Result<Application, CloudError> {
        self.record(format!("create_application:{}", request.display_name));
        Ok(Application {
            application_id: "11111111-app".to_string(),
            object_id: "22222222-obj".to_string(),
        })
    }

    async fn create_service_principal(
        &self,
        application_id: &str,
    ) -> Result<ServicePrincipal, CloudError> {
        self.record(format!("create_service_principal:{}", application_id));
        Ok(ServicePrincipal {
            object_id: "33333333-sp".to_string(),
            application_id: application_id.to_string(),
        })
    }

    async fn create_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> Result<(), CloudError> {
        self.record(format!("create_role_assignment:{}", request.principal_id));
        let remaining = self.role_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.role_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CloudError::Status {
                status: 400,
                body: "PrincipalNotFound".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for FakeCloud {
    async fn ensure_resource_group(&self, name: &str, location: &str) -> Result<(), CloudError> {
        self.record(format!("ensure_resource_group:{}@{}", name, location));
        Ok(())
    }

    async fn create_or_update_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, CloudError> {
        self.record(format!("create_or_update_deployment:{}", request.deployment_name));
        self.deployments.lock().unwrap().push(request.clone());
        Ok(DeploymentOutcome {
            deployment_name: request.deployment_name.clone(),
            provisioning_state: "Succeeded".to_string(),
            correlation_id: Some("corr".to_string()),
        })
    }

    async fn list_resources(
        &self,
        resource_group: &str,
    ) -> Result<Vec<ResourceSummary>, CloudError> {
        self.record(format!("list_resources:{}", resource_group));
        Ok(vec![ResourceSummary {
            id: format!("/subscriptions/sub/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/master", resource_group),
            name: "master".to_string(),
            resource_type: "Microsoft.Compute/virtualMachines".to_string(),
            location: Some("westus".to_string()),
        }])
    }
}

/// A cluster whose ready-node count follows a script, one entry per attempt
struct ScriptedCluster {
    ready_per_attempt: Vec<usize>,
    attempts: Arc<AtomicU32>,
}

struct Snapshot {
    ready: usize,
}

#[async_trait]
impl ControlPlane for Snapshot {
    async fn component_statuses(&self) -> kubeseed::Result<Vec<ComponentHealth>> {
        Ok(["scheduler", "controller-manager", "etcd-0"]
            .iter()
            .map(|name| ComponentHealth {
                name: name.to_string(),
                healthy: true,
                message: None,
            })
            .collect())
    }

    async fn nodes(&self) -> kubeseed::Result<Vec<NodeReadiness>> {
        Ok((0..self.ready)
            .map(|i| NodeReadiness {
                name: format!("node-{}", i),
                ready: Some(true),
            })
            .collect())
    }
}

#[async_trait]
impl ControlPlaneConnector for ScriptedCluster {
    type Client = Snapshot;

    async fn connect(&self) -> kubeseed::Result<Snapshot> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) as usize;
        let index = attempt.min(self.ready_per_attempt.len() - 1);
        Ok(Snapshot {
            ready: self.ready_per_attempt[index],
        })
    }
}

struct ScriptedFactory {
    ready_per_attempt: Vec<usize>,
    attempts: Arc<AtomicU32>,
    chain: Arc<Mutex<Option<CertificateChain>>>,
}

impl ScriptedFactory {
    fn new(ready_per_attempt: Vec<usize>) -> Self {
        Self {
            ready_per_attempt,
            attempts: Arc::new(AtomicU32::new(0)),
            chain: Arc::new(Mutex::new(None)),
        }
    }
}

impl ConnectorFactory for ScriptedFactory {
    type Connector = ScriptedCluster;

    fn connector(&self, _master_fqdn: &str, chain: &CertificateChain) -> ScriptedCluster {
        *self.chain.lock().unwrap() = Some(chain.clone());
        ScriptedCluster {
            ready_per_attempt: self.ready_per_attempt.clone(),
            attempts: self.attempts.clone(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn deployment(output: &Path, mode: CredentialMode) -> ResolvedDeployment {
    DeployConfig {
        output_directory: Some(output.to_path_buf()),
        credential_mode: mode,
        template_root: Path::new(env!("CARGO_MANIFEST_DIR")).join("templates"),
        ..Default::default()
    }
    .resolve(
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap(),
    )
}

fn auth(method: AuthMethod) -> CloudAuth {
    CloudAuth {
        subscription_id: "sub".to_string(),
        tenant_id: "tenant".to_string(),
        auth_method: method,
        client_id: Some("operator-app".to_string()),
        client_secret: Some("operator-secret".to_string()),
        ..Default::default()
    }
}

fn mode_of(path: &Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

// =============================================================================
// Pipeline Tests
// =============================================================================

/// Full create-mode run: identity is minted after a replication delay, the
/// cluster needs one extra validation cycle, and every artifact is on disk
#[tokio::test(start_paused = true)]
async fn integration_create_mode_runs_every_stage_in_order() {
    let out = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::with_role_failures(2);
    let factory = ScriptedFactory::new(vec![2, 3]);
    let attempts = factory.attempts.clone();
    let chain = factory.chain.clone();
    let deployment = deployment(out.path(), CredentialMode::Create);

    let start = tokio::time::Instant::now();
    let report = Provisioner::new(&cloud, &cloud, factory)
        .with_key_size(KeySize::Rsa2048)
        .run(&deployment, &auth(AuthMethod::Device))
        .await
        .unwrap();

    // Two role-assignment retries at 3s plus one validation retry at 15s
    assert!(start.elapsed() >= Duration::from_secs(21));

    assert_eq!(report.deployment_name, "kube-20261018-123000");
    assert_eq!(report.resource_group, "kube-20261018-123000");
    assert_eq!(
        report.master_endpoint,
        "https://kube-20261018-123000.westus.cloudapp.azure.com:6443"
    );
    assert_eq!(report.workload_client_id, "11111111-app");
    assert_eq!(report.validation_attempts, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(report.resources.len(), 1);

    let calls = cloud.calls();
    let kinds: Vec<&str> = calls
        .iter()
        .map(|c| c.split(':').next().unwrap_or_default())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "ensure_resource_group",
            "create_application",
            "create_service_principal",
            "create_role_assignment",
            "create_role_assignment",
            "create_role_assignment",
            "create_or_update_deployment",
            "list_resources",
        ]
    );
    assert_eq!(calls[0], "ensure_resource_group:kube-20261018-123000@westus");
    assert_eq!(calls[3], "create_role_assignment:33333333-sp");

    // Submitted documents carry the identity and the compiled scripts
    let deployments = cloud.deployments.lock().unwrap();
    let submitted = &deployments[0];
    assert_eq!(submitted.mode, DeploymentMode::Incremental);
    assert_eq!(
        submitted.parameters["servicePrincipalClientId"]["value"],
        serde_json::json!("11111111-app")
    );
    assert_eq!(submitted.parameters["nodeCount"]["value"], serde_json::json!(3));
    let template = serde_json::to_string(&submitted.template).unwrap();
    assert!(template.contains("[base64(concat("));

    // Artifacts
    for name in ["ca", "apiserver", "client"] {
        assert_eq!(mode_of(&out.path().join(format!("{}.key", name))), 0o600);
        assert_eq!(mode_of(&out.path().join(format!("{}.crt", name))), 0o600);
    }
    assert_eq!(mode_of(&out.path().join("kube_rsa")), 0o600);
    assert_eq!(mode_of(&out.path().join("cluster-deploy.json")), 0o600);
    assert_eq!(mode_of(&out.path().join("cluster-parameters.json")), 0o600);
    assert_eq!(mode_of(&out.path().join("util.sh")), 0o700);

    let written_ca = std::fs::read_to_string(out.path().join("ca.crt")).unwrap();
    let validated_with = chain.lock().unwrap().clone().unwrap();
    assert_eq!(written_ca, validated_with.ca.certificate_pem);

    let parameters: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("cluster-parameters.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(parameters, serde_json::Value::Object(submitted.parameters.clone()));
}

/// Disabled mode makes no directory calls and leaves the identity empty
#[tokio::test(start_paused = true)]
async fn integration_disabled_mode_skips_directory() {
    let out = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::default();

    let report = Provisioner::new(&cloud, &cloud, ScriptedFactory::new(vec![3]))
        .with_key_size(KeySize::Rsa2048)
        .run(
            &deployment(out.path(), CredentialMode::Disabled),
            &auth(AuthMethod::Device),
        )
        .await
        .unwrap();

    assert_eq!(report.workload_client_id, "");
    assert!(cloud
        .calls()
        .iter()
        .all(|c| !c.starts_with("create_application") && !c.starts_with("create_role")));
    let deployments = cloud.deployments.lock().unwrap();
    assert_eq!(
        deployments[0].parameters["servicePrincipalClientSecret"]["value"],
        serde_json::json!("")
    );
}

/// A cluster that never has enough ready nodes exhausts validation
#[tokio::test(start_paused = true)]
async fn integration_validation_exhaustion_is_reported_from_validate_stage() {
    let out = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::default();
    let factory = ScriptedFactory::new(vec![2]);
    let attempts = factory.attempts.clone();

    let start = tokio::time::Instant::now();
    let err = Provisioner::new(&cloud, &cloud, factory)
        .with_key_size(KeySize::Rsa2048)
        .run(
            &deployment(out.path(), CredentialMode::Passthrough),
            &auth(AuthMethod::ClientSecret),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Validate);
    assert!(matches!(err.source, Error::ValidationExhausted { attempts: 20, .. }));
    assert!(err.source.is_retryable());
    assert_eq!(attempts.load(Ordering::SeqCst), 20);
    assert!(start.elapsed() >= Duration::from_secs(19 * 15));
}

/// Role assignment gives up only when the caller bounds it
#[tokio::test(start_paused = true)]
async fn integration_bounded_role_assignment_fails_bootstrap() {
    let out = tempfile::tempdir().unwrap();
    let cloud = FakeCloud::with_role_failures(10);

    let err = Provisioner::new(&cloud, &cloud, ScriptedFactory::new(vec![3]))
        .with_key_size(KeySize::Rsa2048)
        .with_role_assignment_policy(RetryPolicy::bounded(3, Duration::from_secs(3)))
        .run(
            &deployment(out.path(), CredentialMode::Create),
            &auth(AuthMethod::Device),
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::CredentialBootstrap);
    assert!(matches!(err.source, Error::Cloud(CloudError::Status { status: 400, .. })));
    assert!(!cloud
        .calls()
        .iter()
        .any(|c| c.starts_with("create_or_update_deployment")));
    // Nothing past bootstrap was written
    assert!(!out.path().join("ca.crt").exists());
}
