//! Kubernetes-backed control plane client

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{ComponentStatus, Node};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use super::{ComponentHealth, ControlPlane, ControlPlaneConnector, NodeReadiness};
use crate::pki::KeyCertPair;
use crate::{Error, Result, MASTER_API_PORT};

const CONTEXT_NAME: &str = "kubeseed";

/// Builds a client per attempt from the CA and the admin client certificate
pub struct KubeConnector {
    master_fqdn: String,
    ca_certificate_pem: String,
    client: KeyCertPair,
}

impl KubeConnector {
    /// Connector for `https://<master_fqdn>:6443`
    pub fn new(master_fqdn: impl Into<String>, ca: &KeyCertPair, client: &KeyCertPair) -> Self {
        Self {
            master_fqdn: master_fqdn.into(),
            ca_certificate_pem: ca.certificate_pem.clone(),
            client: client.clone(),
        }
    }

    /// API server URL
    pub fn server(&self) -> String {
        format!("https://{}:{}", self.master_fqdn, MASTER_API_PORT)
    }

    /// In-memory kubeconfig with embedded certificate data
    pub fn kubeconfig(&self) -> Result<Kubeconfig> {
        let yaml = format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: {ctx}
  cluster:
    server: {server}
    certificate-authority-data: {ca}
users:
- name: {ctx}
  user:
    client-certificate-data: {cert}
    client-key-data: {key}
contexts:
- name: {ctx}
  context:
    cluster: {ctx}
    user: {ctx}
current-context: {ctx}
"#,
            ctx = CONTEXT_NAME,
            server = self.server(),
            ca = STANDARD.encode(&self.ca_certificate_pem),
            cert = STANDARD.encode(&self.client.certificate_pem),
            key = STANDARD.encode(&self.client.private_key_pem),
        );
        Kubeconfig::from_yaml(&yaml)
            .map_err(|e| Error::control_plane(format!("invalid kubeconfig: {}", e)))
    }
}

#[async_trait]
impl ControlPlaneConnector for KubeConnector {
    type Client = KubeControlPlane;

    async fn connect(&self) -> Result<KubeControlPlane> {
        // Repeat installs are harmless; the first one wins
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let config = Config::from_custom_kubeconfig(self.kubeconfig()?, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::control_plane(format!("failed to load kubeconfig: {}", e)))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::control_plane(format!("failed to build client: {}", e)))?;
        debug!(server = %self.server(), "connected to control plane");
        Ok(KubeControlPlane { client })
    }
}

/// [`ControlPlane`] over a kube client
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn component_statuses(&self) -> Result<Vec<ComponentHealth>> {
        let api: Api<ComponentStatus> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::control_plane(format!("failed to list component statuses: {}", e)))?;
        Ok(list.items.iter().map(component_health).collect())
    }

    async fn nodes(&self) -> Result<Vec<NodeReadiness>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::control_plane(format!("failed to list nodes: {}", e)))?;
        Ok(list.items.iter().map(node_readiness).collect())
    }
}

fn component_health(status: &ComponentStatus) -> ComponentHealth {
    let healthy = status
        .conditions
        .as_ref()
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Healthy"));
    ComponentHealth {
        name: status.metadata.name.clone().unwrap_or_default(),
        healthy: healthy.map_or(true, |c| c.status == "True"),
        message: healthy.and_then(|c| c.message.clone().or_else(|| c.error.clone())),
    }
}

fn node_readiness(node: &Node) -> NodeReadiness {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True");
    NodeReadiness {
        name: node.metadata.name.clone().unwrap_or_default(),
        ready,
    }
}
