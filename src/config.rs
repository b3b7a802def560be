//! Deploy configuration
//!
//! [`DeployConfig`] is what the operator supplies (CLI flags, optionally on top
//! of a YAML file). [`DeployConfig::resolve`] fills in the derived defaults and
//! produces a [`ResolvedDeployment`] with every value concrete; that is what
//! the pipeline consumes. [`CloudAuth`] carries the operator's own cloud
//! credentials.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identity::{AuthMethod, CredentialMode, OperatorCredential};
use crate::{Error, Result, MASTER_API_PORT};

/// Default region
pub const DEFAULT_LOCATION: &str = "westus";
/// Default VM size for master and nodes
pub const DEFAULT_VM_SIZE: &str = "Standard_A1";
/// Default initial node count
pub const DEFAULT_NODE_COUNT: u32 = 3;
/// Default Kubernetes component image
pub const DEFAULT_HYPERKUBE_SPEC: &str = "gcr.io/google_containers/hyperkube-amd64:v1.3.0";
/// Default login user
pub const DEFAULT_USERNAME: &str = "kube";
/// Default master private IP
pub const DEFAULT_MASTER_PRIVATE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 4);
/// Default in-cluster virtual IP of the `kubernetes` service
pub const DEFAULT_SERVICE_VIP: Ipv4Addr = Ipv4Addr::new(10, 3, 0, 1);
/// Default cluster DNS domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// Default template root directory
pub const DEFAULT_TEMPLATE_ROOT: &str = "templates";
/// Default flavor
pub const DEFAULT_FLAVOR: &str = "coreos";
/// Parent of derived output directories
pub const DEPLOYMENTS_DIR: &str = "_deployments";

/// Resource manager and directory endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudEndpoints {
    /// Resource manager base URL
    pub resource_manager: String,
    /// Graph (directory) base URL
    pub graph: String,
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self {
            resource_manager: "https://management.azure.com".to_string(),
            graph: "https://graph.windows.net".to_string(),
        }
    }
}

/// The operator's cloud credentials.
///
/// Token acquisition is done outside this crate; the bearer tokens for both
/// endpoints are supplied ready to use.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudAuth {
    /// Subscription to deploy into
    pub subscription_id: String,
    /// Directory tenant of the subscription
    pub tenant_id: String,
    /// How the operator authenticated
    pub auth_method: AuthMethod,
    /// Operator client id (`client_secret` / `client_certificate`)
    pub client_id: Option<String>,
    /// Operator client secret (`client_secret`)
    pub client_secret: Option<String>,
    /// Operator certificate (`client_certificate`)
    pub certificate_path: Option<PathBuf>,
    /// Operator certificate key (`client_certificate`)
    pub private_key_path: Option<PathBuf>,
    /// Bearer token for the resource manager
    pub arm_token: Option<String>,
    /// Bearer token for the graph endpoint
    pub graph_token: Option<String>,
    /// API endpoints
    pub endpoints: CloudEndpoints,
}

impl fmt::Debug for CloudAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudAuth")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("auth_method", &self.auth_method)
            .field("client_id", &self.client_id)
            .field("certificate_path", &self.certificate_path)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl CloudAuth {
    /// Check the auth method has everything it needs
    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.is_empty() {
            return Err(Error::configuration_for(
                "subscription_id",
                "subscription id must be specified",
            ));
        }

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        match self.auth_method {
            AuthMethod::Device => {}
            AuthMethod::ClientSecret => {
                if !present(&self.client_id) || !present(&self.client_secret) {
                    return Err(Error::configuration_for(
                        "auth_method",
                        "client id and client secret must be specified for auth method client_secret",
                    ));
                }
            }
            AuthMethod::ClientCertificate => {
                if !present(&self.client_id)
                    || self.certificate_path.is_none()
                    || self.private_key_path.is_none()
                {
                    return Err(Error::configuration_for(
                        "auth_method",
                        "client id, certificate path and private key path must be specified for auth method client_certificate",
                    ));
                }
            }
        }

        Ok(())
    }

    /// The operator's identity, as offered for passthrough
    pub fn operator_credential(&self) -> OperatorCredential {
        OperatorCredential {
            auth_method: self.auth_method,
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
        }
    }
}

/// Deploy settings as supplied by the operator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Where artifacts go (derived from the deployment name if unset)
    pub output_directory: Option<PathBuf>,
    /// Deployment name (generated from the clock if unset)
    pub deployment_name: Option<String>,
    /// Resource group (the deployment name if unset)
    pub resource_group: Option<String>,
    /// Region
    pub location: String,
    /// Master VM size
    pub master_size: String,
    /// Node VM size
    pub node_size: String,
    /// Initial node count
    pub node_count: u32,
    /// Kubernetes component image
    pub kubernetes_hyperkube_spec: String,
    /// Login user
    pub username: String,
    /// Public master FQDN (derived from name and location if unset)
    pub master_fqdn: Option<String>,
    /// Master private IP
    pub master_private_ip: IpAddr,
    /// In-cluster virtual IP of the `kubernetes` service
    pub service_vip: IpAddr,
    /// Cluster DNS domain
    pub cluster_domain: String,
    /// Extra DNS SANs for the API server
    pub master_extra_fqdns: Vec<String>,
    /// Extra IP SANs for the API server
    pub extra_ips: Vec<IpAddr>,
    /// Where the workload identity comes from
    pub credential_mode: CredentialMode,
    /// Directory holding flavors
    pub template_root: PathBuf,
    /// Flavor to render
    pub flavor: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            output_directory: None,
            deployment_name: None,
            resource_group: None,
            location: DEFAULT_LOCATION.to_string(),
            master_size: DEFAULT_VM_SIZE.to_string(),
            node_size: DEFAULT_VM_SIZE.to_string(),
            node_count: DEFAULT_NODE_COUNT,
            kubernetes_hyperkube_spec: DEFAULT_HYPERKUBE_SPEC.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            master_fqdn: None,
            master_private_ip: IpAddr::V4(DEFAULT_MASTER_PRIVATE_IP),
            service_vip: IpAddr::V4(DEFAULT_SERVICE_VIP),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            master_extra_fqdns: Vec::new(),
            extra_ips: Vec::new(),
            credential_mode: CredentialMode::default(),
            template_root: PathBuf::from(DEFAULT_TEMPLATE_ROOT),
            flavor: DEFAULT_FLAVOR.to_string(),
        }
    }
}

impl DeployConfig {
    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("invalid deploy config: {}", e)))
    }

    /// Read and parse a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Fill in derived defaults. `now` seeds a generated deployment name.
    pub fn resolve(self, now: NaiveDateTime) -> ResolvedDeployment {
        let deployment_name = match self.deployment_name.filter(|s| !s.is_empty()) {
            Some(name) => name,
            None => {
                let name = format!("kube-{}", now.format("%Y%m%d-%H%M%S"));
                warn!(deployment = %name, "deployment name is unset, generated one");
                name
            }
        };

        let resource_group = match self.resource_group.filter(|s| !s.is_empty()) {
            Some(group) => group,
            None => {
                warn!(
                    resource_group = %deployment_name,
                    "resource group is unset, derived it from the deployment name"
                );
                deployment_name.clone()
            }
        };

        let master_fqdn = match self.master_fqdn.filter(|s| !s.is_empty()) {
            Some(fqdn) => fqdn,
            None => {
                let fqdn = format!("{}.{}.cloudapp.azure.com", deployment_name, self.location);
                warn!(master_fqdn = %fqdn, "master fqdn is unset, derived it from name and location");
                fqdn
            }
        };

        let output_directory = match self.output_directory {
            Some(dir) => dir,
            None => {
                let dir = Path::new(DEPLOYMENTS_DIR).join(&deployment_name);
                warn!(output_directory = %dir.display(), "output directory is unset, using derived location");
                dir
            }
        };

        ResolvedDeployment {
            deployment_name,
            resource_group,
            output_directory,
            location: self.location,
            master_size: self.master_size,
            node_size: self.node_size,
            node_count: self.node_count,
            kubernetes_hyperkube_spec: self.kubernetes_hyperkube_spec,
            username: self.username,
            master_fqdn,
            master_private_ip: self.master_private_ip,
            service_vip: self.service_vip,
            cluster_domain: self.cluster_domain,
            master_extra_fqdns: self.master_extra_fqdns,
            extra_ips: self.extra_ips,
            credential_mode: self.credential_mode,
            template_root: self.template_root,
            flavor: self.flavor,
        }
    }
}

/// Deploy settings with every derived value filled in
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDeployment {
    /// Deployment name
    pub deployment_name: String,
    /// Resource group
    pub resource_group: String,
    /// Artifact directory
    pub output_directory: PathBuf,
    /// Region
    pub location: String,
    /// Master VM size
    pub master_size: String,
    /// Node VM size
    pub node_size: String,
    /// Initial node count
    pub node_count: u32,
    /// Kubernetes component image
    pub kubernetes_hyperkube_spec: String,
    /// Login user
    pub username: String,
    /// Public master FQDN
    pub master_fqdn: String,
    /// Master private IP
    pub master_private_ip: IpAddr,
    /// In-cluster virtual IP of the `kubernetes` service
    pub service_vip: IpAddr,
    /// Cluster DNS domain
    pub cluster_domain: String,
    /// Extra DNS SANs for the API server
    pub master_extra_fqdns: Vec<String>,
    /// Extra IP SANs for the API server
    pub extra_ips: Vec<IpAddr>,
    /// Where the workload identity comes from
    pub credential_mode: CredentialMode,
    /// Directory holding flavors
    pub template_root: PathBuf,
    /// Flavor to render
    pub flavor: String,
}

impl ResolvedDeployment {
    /// Reject invalid combinations before any remote call is made
    pub fn validate(&self, auth: &CloudAuth) -> Result<()> {
        if self.node_count < 1 {
            return Err(Error::configuration_for(
                "node_count",
                "node count must be at least 1",
            ));
        }
        if self.username.is_empty() {
            return Err(Error::configuration_for("username", "username must not be empty"));
        }
        // The SSH key is written as `<username>_rsa` in the output directory
        if self.username.contains(&['/', '\\', '\0'][..]) || self.username.contains("..") {
            return Err(Error::configuration_for(
                "username",
                format!("username '{}' must not contain path separators or '..'", self.username),
            ));
        }
        if self.credential_mode == CredentialMode::Passthrough
            && auth.auth_method != AuthMethod::ClientSecret
        {
            return Err(Error::configuration_for(
                "credential_mode",
                format!(
                    "passthrough is only allowed with auth method client_secret (got {})",
                    auth.auth_method
                ),
            ));
        }
        Ok(())
    }

    /// `https://<master fqdn>:6443`
    pub fn master_endpoint(&self) -> String {
        format!("https://{}:{}", self.master_fqdn, MASTER_API_PORT)
    }

    /// Control plane IP SANs: master private IP, extra IPs, then the service VIP
    pub fn control_plane_ips(&self) -> Vec<IpAddr> {
        std::iter::once(self.master_private_ip)
            .chain(self.extra_ips.iter().copied())
            .chain(std::iter::once(self.service_vip))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap()
    }

    fn secret_auth() -> CloudAuth {
        CloudAuth {
            subscription_id: "sub".to_string(),
            tenant_id: "tenant".to_string(),
            auth_method: AuthMethod::ClientSecret,
            client_id: Some("operator".to_string()),
            client_secret: Some("hunter2".to_string()),
            ..Default::default()
        }
    }

    // ==========================================================================
    // Story Tests: From Operator Input to a Concrete Deployment
    // ==========================================================================

    /// Story: an operator who supplies nothing gets a fully derived deployment
    #[test]
    fn story_defaults_are_derived_from_the_clock() {
        let resolved = DeployConfig::default().resolve(now());

        assert_eq!(resolved.deployment_name, "kube-20260307-090501");
        assert_eq!(resolved.resource_group, "kube-20260307-090501");
        assert_eq!(
            resolved.master_fqdn,
            "kube-20260307-090501.westus.cloudapp.azure.com"
        );
        assert_eq!(
            resolved.output_directory,
            PathBuf::from("_deployments/kube-20260307-090501")
        );
        assert_eq!(
            resolved.master_endpoint(),
            "https://kube-20260307-090501.westus.cloudapp.azure.com:6443"
        );
        assert_eq!(resolved.node_count, 3);
        assert_eq!(resolved.username, "kube");
        assert_eq!(resolved.master_size, "Standard_A1");
        assert_eq!(resolved.credential_mode, CredentialMode::Create);
    }

    /// Story: explicit values win over derived ones
    #[test]
    fn story_explicit_values_are_kept() {
        let config = DeployConfig {
            deployment_name: Some("prod".to_string()),
            resource_group: Some("prod-rg".to_string()),
            master_fqdn: Some("api.example.com".to_string()),
            output_directory: Some(PathBuf::from("/tmp/prod")),
            location: "eastus".to_string(),
            ..Default::default()
        };
        let resolved = config.resolve(now());

        assert_eq!(resolved.deployment_name, "prod");
        assert_eq!(resolved.resource_group, "prod-rg");
        assert_eq!(resolved.master_fqdn, "api.example.com");
        assert_eq!(resolved.output_directory, PathBuf::from("/tmp/prod"));
    }

    /// Story: the derived fqdn follows the deployment's location
    #[test]
    fn story_fqdn_uses_location() {
        let config = DeployConfig {
            deployment_name: Some("demo".to_string()),
            location: "northeurope".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.resolve(now()).master_fqdn,
            "demo.northeurope.cloudapp.azure.com"
        );
    }

    /// Story: passthrough with an interactive login has no secret to hand over
    #[test]
    fn story_passthrough_requires_client_secret_auth() {
        let resolved = DeployConfig {
            credential_mode: CredentialMode::Passthrough,
            ..Default::default()
        }
        .resolve(now());

        for method in [AuthMethod::Device, AuthMethod::ClientCertificate] {
            let auth = CloudAuth {
                auth_method: method,
                ..secret_auth()
            };
            let err = resolved.validate(&auth).unwrap_err();
            assert!(matches!(
                err,
                Error::Configuration { ref field, .. } if field.as_deref() == Some("credential_mode")
            ));
        }

        assert!(resolved.validate(&secret_auth()).is_ok());
    }

    #[test]
    fn zero_nodes_is_rejected() {
        let resolved = DeployConfig {
            node_count: 0,
            ..Default::default()
        }
        .resolve(now());
        assert!(resolved.validate(&secret_auth()).is_err());
    }

    #[test]
    fn empty_username_is_rejected() {
        let resolved = DeployConfig {
            username: String::new(),
            ..Default::default()
        }
        .resolve(now());
        assert!(resolved.validate(&secret_auth()).is_err());
    }

    #[test]
    fn username_that_escapes_output_directory_is_rejected() {
        for username in ["../x", "a/b", "..", "a\\b"] {
            let resolved = DeployConfig {
                username: username.to_string(),
                ..Default::default()
            }
            .resolve(now());
            let err = resolved.validate(&secret_auth()).unwrap_err();
            assert!(err.to_string().contains("username"), "{}: {}", username, err);
        }

        let resolved = DeployConfig {
            username: "core.admin".to_string(),
            ..Default::default()
        }
        .resolve(now());
        assert!(resolved.validate(&secret_auth()).is_ok());
    }

    #[test]
    fn control_plane_ips_end_with_service_vip() {
        let resolved = DeployConfig {
            extra_ips: vec!["52.1.2.3".parse().unwrap()],
            ..Default::default()
        }
        .resolve(now());
        let ips: Vec<String> = resolved
            .control_plane_ips()
            .iter()
            .map(|ip| ip.to_string())
            .collect();
        assert_eq!(ips, vec!["10.0.1.4", "52.1.2.3", "10.3.0.1"]);
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let config = DeployConfig::from_yaml_str(
            r#"
deployment_name: staging
node_count: 5
credential_mode: disabled
master_extra_fqdns:
  - kube.example.com
"#,
        )
        .unwrap();

        assert_eq!(config.deployment_name.as_deref(), Some("staging"));
        assert_eq!(config.node_count, 5);
        assert_eq!(config.credential_mode, CredentialMode::Disabled);
        assert_eq!(config.master_extra_fqdns, vec!["kube.example.com"]);
        assert_eq!(config.location, DEFAULT_LOCATION);
        assert_eq!(config.flavor, DEFAULT_FLAVOR);
    }

    #[test]
    fn yaml_with_bad_types_is_a_configuration_error() {
        let err = DeployConfig::from_yaml_str("node_count: many").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn cloud_auth_requires_subscription() {
        let auth = CloudAuth::default();
        assert!(auth.validate().is_err());
    }

    #[test]
    fn cloud_auth_method_requirements() {
        assert!(secret_auth().validate().is_ok());

        let missing_secret = CloudAuth {
            client_secret: None,
            ..secret_auth()
        };
        assert!(missing_secret.validate().is_err());

        let cert = CloudAuth {
            auth_method: AuthMethod::ClientCertificate,
            certificate_path: Some(PathBuf::from("op.crt")),
            ..secret_auth()
        };
        assert!(cert.validate().is_err());

        let cert = CloudAuth {
            private_key_path: Some(PathBuf::from("op.key")),
            ..cert
        };
        assert!(cert.validate().is_ok());

        let device = CloudAuth {
            auth_method: AuthMethod::Device,
            client_id: None,
            client_secret: None,
            ..secret_auth()
        };
        assert!(device.validate().is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", secret_auth());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("operator"));
    }
}
