//! Values bound into flavor templates

use std::net::IpAddr;

use serde::Serialize;

use crate::pki::KeyCertPair;

/// Everything a flavor's parameters document and helper script may reference.
///
/// Built once per run from the resolved configuration plus the identity, SSH
/// and PKI outputs; read-only afterwards.
#[derive(Clone, Serialize)]
pub struct TemplateArguments {
    /// Deployment name
    pub deployment_name: String,
    /// Resource group the deployment lands in
    pub resource_group: String,
    /// Directory tenant the workload identity belongs to
    pub tenant_id: String,
    /// VM size of the master
    pub master_size: String,
    /// VM size of the nodes
    pub node_size: String,
    /// Initial node count
    pub node_count: u32,
    /// Login user on every machine
    pub username: String,
    /// `authorized_keys` line for `username`
    pub ssh_public_key_data: String,
    /// Workload identity client id (empty when cloud integration is disabled)
    pub service_principal_client_id: String,
    /// Workload identity secret (empty when cloud integration is disabled)
    pub service_principal_client_secret: String,
    /// Public FQDN of the master
    pub master_fqdn: String,
    /// Private IP of the master inside the virtual network
    pub master_private_ip: IpAddr,
    /// Cluster DNS domain
    pub cluster_domain: String,
    /// Container image of the Kubernetes components
    pub kubernetes_hyperkube_spec: String,
    /// Certificate authority
    pub ca_key_pair: KeyCertPair,
    /// API server certificate
    pub apiserver_key_pair: KeyCertPair,
    /// Administrator client certificate
    pub client_key_pair: KeyCertPair,
}

/// Compiled cloud-config scripts bound into the deployment template
#[derive(Clone, Debug, Serialize)]
pub struct ScriptBindings {
    /// Master cloud-config as a template expression
    pub master_script: String,
    /// Node cloud-config as a template expression
    pub node_script: String,
}
