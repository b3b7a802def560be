//! Kubeseed CLI - provision a Kubernetes cluster on Azure

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubeseed::cloud::AzureClient;
use kubeseed::config::{CloudAuth, CloudEndpoints, DeployConfig};
use kubeseed::identity::{AuthMethod, CredentialMode};
use kubeseed::provision::{KubeConnectorFactory, Provisioner};

/// Kubeseed - provision a Kubernetes cluster on Azure
#[derive(Parser, Debug)]
#[command(name = "kubeseed", version, about, long_about = None)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a new cluster
    ///
    /// Creates the resource group and workload identity, generates the SSH
    /// identity and cluster PKI, renders and submits the deployment, then
    /// waits for the cluster to report healthy.
    Deploy(DeployArgs),
}

/// Operator credentials
#[derive(Args, Debug)]
struct AuthArgs {
    /// Subscription to deploy into
    #[arg(long, env = "KUBESEED_SUBSCRIPTION_ID")]
    subscription_id: String,

    /// Directory tenant of the subscription
    #[arg(long, env = "KUBESEED_TENANT_ID", default_value = "")]
    tenant_id: String,

    /// device, client_secret or client_certificate
    #[arg(long, env = "KUBESEED_AUTH_METHOD", default_value = "device")]
    auth_method: AuthMethod,

    /// Operator client id
    #[arg(long, env = "KUBESEED_CLIENT_ID")]
    client_id: Option<String>,

    /// Operator client secret
    #[arg(long, env = "KUBESEED_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Operator certificate (client_certificate)
    #[arg(long, env = "KUBESEED_CERTIFICATE_PATH")]
    certificate_path: Option<PathBuf>,

    /// Operator certificate key (client_certificate)
    #[arg(long, env = "KUBESEED_PRIVATE_KEY_PATH")]
    private_key_path: Option<PathBuf>,

    /// Bearer token for the resource manager
    #[arg(long, env = "KUBESEED_ARM_TOKEN", hide_env_values = true)]
    arm_token: Option<String>,

    /// Bearer token for the graph endpoint
    #[arg(long, env = "KUBESEED_GRAPH_TOKEN", hide_env_values = true)]
    graph_token: Option<String>,

    /// Resource manager base URL
    #[arg(long, env = "KUBESEED_RESOURCE_MANAGER_URL")]
    resource_manager_url: Option<String>,

    /// Graph base URL
    #[arg(long, env = "KUBESEED_GRAPH_URL")]
    graph_url: Option<String>,
}

impl AuthArgs {
    fn into_auth(self) -> CloudAuth {
        let defaults = CloudEndpoints::default();
        CloudAuth {
            subscription_id: self.subscription_id,
            tenant_id: self.tenant_id,
            auth_method: self.auth_method,
            client_id: self.client_id,
            client_secret: self.client_secret,
            certificate_path: self.certificate_path,
            private_key_path: self.private_key_path,
            arm_token: self.arm_token,
            graph_token: self.graph_token,
            endpoints: CloudEndpoints {
                resource_manager: self
                    .resource_manager_url
                    .unwrap_or(defaults.resource_manager),
                graph: self.graph_url.unwrap_or(defaults.graph),
            },
        }
    }
}

/// Deploy arguments; each flag overrides the `--config` file
#[derive(Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    auth: AuthArgs,

    /// Base deploy configuration (YAML)
    #[arg(short = 'f', long = "config", env = "KUBESEED_CONFIG")]
    config_file: Option<PathBuf>,

    /// Where artifacts are written (default _deployments/<name>)
    #[arg(long, env = "KUBESEED_OUTPUT_DIRECTORY")]
    output_directory: Option<PathBuf>,

    /// Deployment name (default kube-<timestamp>)
    #[arg(long, env = "KUBESEED_DEPLOYMENT_NAME")]
    deployment_name: Option<String>,

    /// Resource group (default: the deployment name)
    #[arg(long, env = "KUBESEED_RESOURCE_GROUP")]
    resource_group: Option<String>,

    /// Region
    #[arg(long, env = "KUBESEED_LOCATION")]
    location: Option<String>,

    /// Master VM size
    #[arg(long, env = "KUBESEED_MASTER_SIZE")]
    master_size: Option<String>,

    /// Node VM size
    #[arg(long, env = "KUBESEED_NODE_SIZE")]
    node_size: Option<String>,

    /// Initial node count
    #[arg(long, env = "KUBESEED_NODE_COUNT")]
    node_count: Option<u32>,

    /// Kubernetes component image
    #[arg(long, env = "KUBESEED_HYPERKUBE_SPEC")]
    kubernetes_hyperkube_spec: Option<String>,

    /// Login user
    #[arg(long, env = "KUBESEED_USERNAME")]
    username: Option<String>,

    /// Public master FQDN (default <name>.<location>.cloudapp.azure.com)
    #[arg(long, env = "KUBESEED_MASTER_FQDN")]
    master_fqdn: Option<String>,

    /// Extra DNS name on the API server certificate (repeatable)
    #[arg(long = "master-extra-fqdn")]
    master_extra_fqdns: Vec<String>,

    /// Extra IP on the API server certificate (repeatable)
    #[arg(long = "extra-ip")]
    extra_ips: Vec<IpAddr>,

    /// create, passthrough or disabled
    #[arg(long, env = "KUBESEED_CREDENTIAL_MODE")]
    credential_mode: Option<CredentialMode>,

    /// Directory holding flavors
    #[arg(long, env = "KUBESEED_TEMPLATE_ROOT")]
    template_root: Option<PathBuf>,

    /// Flavor to render
    #[arg(long, env = "KUBESEED_FLAVOR")]
    flavor: Option<String>,
}

impl DeployArgs {
    fn deploy_config(&self) -> anyhow::Result<DeployConfig> {
        let mut config = match &self.config_file {
            Some(path) => DeployConfig::from_yaml_file(path)?,
            None => DeployConfig::default(),
        };

        if let Some(v) = &self.output_directory {
            config.output_directory = Some(v.clone());
        }
        if let Some(v) = &self.deployment_name {
            config.deployment_name = Some(v.clone());
        }
        if let Some(v) = &self.resource_group {
            config.resource_group = Some(v.clone());
        }
        if let Some(v) = &self.location {
            config.location = v.clone();
        }
        if let Some(v) = &self.master_size {
            config.master_size = v.clone();
        }
        if let Some(v) = &self.node_size {
            config.node_size = v.clone();
        }
        if let Some(v) = self.node_count {
            config.node_count = v;
        }
        if let Some(v) = &self.kubernetes_hyperkube_spec {
            config.kubernetes_hyperkube_spec = v.clone();
        }
        if let Some(v) = &self.username {
            config.username = v.clone();
        }
        if let Some(v) = &self.master_fqdn {
            config.master_fqdn = Some(v.clone());
        }
        config.master_extra_fqdns.extend(self.master_extra_fqdns.iter().cloned());
        config.extra_ips.extend(self.extra_ips.iter().copied());
        if let Some(v) = self.credential_mode {
            config.credential_mode = v;
        }
        if let Some(v) = &self.template_root {
            config.template_root = v.clone();
        }
        if let Some(v) = &self.flavor {
            config.flavor = v.clone();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Deploy(args) => run_deploy(args).await,
    }
}

async fn run_deploy(args: DeployArgs) -> anyhow::Result<()> {
    let deployment = args
        .deploy_config()?
        .resolve(chrono::Local::now().naive_local());
    let auth = args.auth.into_auth();
    auth.validate()?;

    let client = AzureClient::new(&auth)?;
    let report = Provisioner::new(&client, &client, KubeConnectorFactory)
        .run(&deployment, &auth)
        .await?;

    info!(
        endpoint = %report.master_endpoint,
        output_directory = %report.output_directory.display(),
        resources = report.resources.len(),
        "cluster is ready"
    );
    Ok(())
}
