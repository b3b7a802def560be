//! HTTPS client for the graph directory and the resource manager

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    Application, ApplicationRequest, CloudError, DeploymentOutcome, DeploymentRequest,
    IdentityDirectory, ResourceManager, ResourceSummary, RoleAssignmentRequest, ServicePrincipal,
    AUTHORIZATION_API_VERSION, GRAPH_API_VERSION, RESOURCES_API_VERSION,
};
use crate::config::{CloudAuth, CloudEndpoints};

/// Interval between deployment state polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct DeploymentEnvelope {
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    provisioning_state: Option<String>,
    correlation_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourcePage {
    #[serde(default)]
    value: Vec<ResourceSummary>,
    next_link: Option<String>,
}

/// Client for both cloud APIs, authenticated with pre-acquired bearer tokens
#[derive(Clone)]
pub struct AzureClient {
    http: Client,
    endpoints: CloudEndpoints,
    subscription_id: String,
    tenant_id: String,
    arm_token: Option<String>,
    graph_token: Option<String>,
    poll_interval: Duration,
}

impl AzureClient {
    /// Build a client from the operator's credentials
    pub fn new(auth: &CloudAuth) -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CloudError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints: auth.endpoints.clone(),
            subscription_id: auth.subscription_id.clone(),
            tenant_id: auth.tenant_id.clone(),
            arm_token: auth.arm_token.clone(),
            graph_token: auth.graph_token.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the deployment poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Tenant the directory calls go to
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Subscription the resource manager calls go to
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn graph_url(&self, collection: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoints.graph.trim_end_matches('/'),
            self.tenant_id,
            collection
        )
    }

    fn arm_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoints.resource_manager.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn deployment_url(&self, resource_group: &str, deployment: &str) -> String {
        self.arm_url(&format!(
            "subscriptions/{}/resourcegroups/{}/providers/Microsoft.Resources/deployments/{}",
            self.subscription_id, resource_group, deployment
        ))
    }

    fn graph(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.query(&[("api-version", GRAPH_API_VERSION)]);
        match &self.graph_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn arm(&self, builder: RequestBuilder, api_version: &str) -> RequestBuilder {
        let builder = builder.query(&[("api-version", api_version)]);
        self.arm_authorized(builder)
    }

    fn arm_authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.arm_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_deployment(
        &self,
        resource_group: &str,
        deployment: &str,
    ) -> Result<DeploymentProperties, CloudError> {
        let response = self
            .arm(
                self.http.get(self.deployment_url(resource_group, deployment)),
                RESOURCES_API_VERSION,
            )
            .send()
            .await?;
        let response = expect_status(response, |s| s.is_success()).await?;
        let envelope: DeploymentEnvelope = decode(response).await?;
        Ok(envelope.properties)
    }
}

/// Fail with [`CloudError::Status`] unless `accept` allows the status
async fn expect_status(
    response: Response,
    accept: impl Fn(StatusCode) -> bool,
) -> Result<Response, CloudError> {
    let status = response.status();
    if accept(status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, CloudError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| CloudError::malformed(e.to_string()))
}

#[async_trait]
impl IdentityDirectory for AzureClient {
    async fn create_application(
        &self,
        request: &ApplicationRequest,
    ) -> Result<Application, CloudError> {
        debug!(
            display_name = %request.display_name,
            identifier_uri = %request.identifier_uri,
            "creating application"
        );
        let body = json!({
            "availableToOtherTenants": false,
            "displayName": request.display_name,
            "homepage": request.identifier_uri,
            "identifierUris": [request.identifier_uri],
            "passwordCredentials": [{
                "keyId": request.secret_key_id,
                "startDate": request.start_date.to_rfc3339(),
                "endDate": request.end_date.to_rfc3339(),
                "value": request.secret,
            }],
        });

        let response = self
            .graph(self.http.post(self.graph_url("applications")))
            .json(&body)
            .send()
            .await?;
        decode(expect_status(response, |s| s == StatusCode::CREATED).await?).await
    }

    async fn create_service_principal(
        &self,
        application_id: &str,
    ) -> Result<ServicePrincipal, CloudError> {
        let body = json!({ "appId": application_id, "accountEnabled": true });
        let response = self
            .graph(self.http.post(self.graph_url("servicePrincipals")))
            .json(&body)
            .send()
            .await?;
        decode(expect_status(response, |s| s == StatusCode::CREATED).await?).await
    }

    async fn create_role_assignment(
        &self,
        request: &RoleAssignmentRequest,
    ) -> Result<(), CloudError> {
        let url = self.arm_url(&format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            request.scope, request.name
        ));
        let body = json!({
            "properties": {
                "roleDefinitionId": request.role_definition_id,
                "principalId": request.principal_id,
            }
        });
        let response = self
            .arm(self.http.put(url), AUTHORIZATION_API_VERSION)
            .json(&body)
            .send()
            .await?;
        // 409: an earlier attempt landed but its response was lost
        expect_status(response, |s| s.is_success() || s == StatusCode::CONFLICT).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for AzureClient {
    async fn ensure_resource_group(&self, name: &str, location: &str) -> Result<(), CloudError> {
        let url = self.arm_url(&format!(
            "subscriptions/{}/resourcegroups/{}",
            self.subscription_id, name
        ));
        let response = self
            .arm(self.http.put(url), RESOURCES_API_VERSION)
            .json(&json!({ "name": name, "location": location }))
            .send()
            .await?;
        expect_status(response, |s| s.is_success()).await?;
        info!(resource_group = %name, location = %location, "resource group ready");
        Ok(())
    }

    async fn create_or_update_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, CloudError> {
        let body = json!({
            "properties": {
                "template": request.template,
                "parameters": request.parameters,
                "mode": request.mode,
            }
        });
        let response = self
            .arm(
                self.http
                    .put(self.deployment_url(&request.resource_group, &request.deployment_name)),
                RESOURCES_API_VERSION,
            )
            .json(&body)
            .send()
            .await?;
        expect_status(response, |s| s.is_success()).await?;

        loop {
            let properties = self
                .get_deployment(&request.resource_group, &request.deployment_name)
                .await?;
            let state = properties.provisioning_state.ok_or_else(|| {
                CloudError::malformed("deployment response has no provisioningState")
            })?;

            match state.as_str() {
                "Succeeded" => {
                    return Ok(DeploymentOutcome {
                        deployment_name: request.deployment_name.clone(),
                        provisioning_state: state,
                        correlation_id: properties.correlation_id,
                    })
                }
                "Failed" | "Canceled" => {
                    return Err(CloudError::DeploymentFailed {
                        deployment: request.deployment_name.clone(),
                        state,
                    })
                }
                _ => {
                    debug!(
                        deployment = %request.deployment_name,
                        state = %state,
                        "deployment still in progress"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn list_resources(
        &self,
        resource_group: &str,
    ) -> Result<Vec<ResourceSummary>, CloudError> {
        let first = self.arm_url(&format!(
            "subscriptions/{}/resourceGroups/{}/resources",
            self.subscription_id, resource_group
        ));
        let mut request = self.arm(self.http.get(first), RESOURCES_API_VERSION);
        let mut resources = Vec::new();

        loop {
            let response = request.send().await?;
            let page: ResourcePage =
                decode(expect_status(response, |s| s.is_success()).await?).await?;
            resources.extend(page.value);

            match page.next_link.filter(|l| !l.is_empty()) {
                // nextLink already carries its own query string
                Some(link) => request = self.arm_authorized(self.http.get(link)),
                None => break,
            }
        }

        debug!(resource_group = %resource_group, count = resources.len(), "listed resources");
        Ok(resources)
    }
}
