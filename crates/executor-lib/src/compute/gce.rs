//! Compute Engine v1 REST client

use super::{
    resource_name, ComputeApi, InstanceDescription, InstanceSpec, InventoryPage, OperationHandle,
    ZoneInstances,
};
use crate::error::{ExecutorError, ExecutorResult};
use crate::models::InstanceStatus;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the Compute Engine client
#[derive(Debug, Clone)]
pub struct GceConfig {
    /// API base URL, ending with a slash
    pub endpoint: String,
    pub project_id: String,
    /// Bearer token attached to every request
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    /// Client-side timeout for one `wait` call. The server holds the call
    /// for up to two minutes, so this must stay above that.
    pub operation_wait_timeout: Duration,
    /// Upper bound on `wait` calls for a single operation
    pub max_operation_waits: u32,
}

impl Default for GceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://compute.googleapis.com/compute/v1/".to_string(),
            project_id: String::new(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
            operation_wait_timeout: Duration::from_secs(150),
            max_operation_waits: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedListResponse {
    #[serde(default)]
    items: BTreeMap<String, ScopedInstances>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopedInstances {
    #[serde(default)]
    instances: Vec<InstanceResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
    name: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    machine_type: String,
    #[serde(default)]
    disks: Vec<AttachedDisk>,
}

#[derive(Debug, Deserialize)]
struct AttachedDisk {
    #[serde(default)]
    boot: bool,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResource {
    name: String,
    zone: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    target_link: String,
    error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Settings of a source instance that a snapshot copy inherits
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceSettings {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    service_accounts: Vec<ServiceAccount>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subnetwork: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    access_configs: Vec<AccessConfig>,
}

/// External access config; the ephemeral address is not carried over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceAccount {
    email: String,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tags {
    #[serde(default)]
    items: Vec<String>,
}

/// Metadata items without the fingerprint of the source instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default)]
    items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataItem {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl NetworkInterface {
    /// Interface on the default network, used when the source has none
    fn default_network() -> Self {
        Self {
            network: Some("global/networks/default".to_string()),
            ..Self::default()
        }
    }

    /// Subnetworks are regional; drop one that lives outside the zone's region
    fn for_zone(mut self, zone: &str) -> Self {
        let region = zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone);
        let in_region = self
            .subnetwork
            .as_deref()
            .map(|s| s.contains(&format!("/regions/{}/", region)))
            .unwrap_or(true);
        if !in_region {
            self.subnetwork = None;
        }
        self
    }
}

impl OperationResource {
    fn into_handle(self) -> OperationHandle {
        OperationHandle {
            name: self.name,
            zone: self.zone.as_deref().map(|z| resource_name(z).to_string()),
            target: resource_name(&self.target_link).to_string(),
        }
    }

    fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| {
            e.errors
                .iter()
                .map(|item| format!("{}: {}", item.code, item.message))
                .collect::<Vec<_>>()
                .join("; ")
        })
    }
}

/// Compute Engine client backed by the public REST API
pub struct GceComputeClient {
    client: Client,
    base_url: Url,
    config: GceConfig,
}

impl GceComputeClient {
    pub fn new(config: GceConfig) -> ExecutorResult<Self> {
        if config.project_id.is_empty() {
            return Err(ExecutorError::InvalidInput(
                "project_id is required for the Compute Engine client".to_string(),
            ));
        }

        let mut endpoint = config.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base_url = Url::parse(&endpoint)
            .map_err(|e| ExecutorError::InvalidInput(format!("invalid compute endpoint: {}", e)))?;

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    fn project_path(&self, suffix: &str) -> String {
        format!("projects/{}/{}", self.config.project_id, suffix)
    }

    fn request(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ExecutorResult<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ExecutorError::InvalidInput(format!("invalid path {}: {}", path, e)))?;

        let mut request = self.client.request(method.clone(), url).query(query);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(method = %method, path = %path, "Compute API request");
        Ok(request)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ExecutorResult<T> {
        let response = self.request(&method, path, query, body)?.send().await?;
        Self::decode(&method, path, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &Method,
        path: &str,
        response: Response,
    ) -> ExecutorResult<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExecutorError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Compute(format!(
                "{} {} returned {}: {}",
                method, path, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Compute(format!("failed to parse response: {}", e)))
    }

    async fn post_operation(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ExecutorResult<OperationHandle> {
        let op: OperationResource = self
            .send(Method::POST, path, &[], Some(body.unwrap_or_else(|| json!({}))))
            .await?;
        Ok(op.into_handle())
    }
}

#[async_trait]
impl ComputeApi for GceComputeClient {
    async fn aggregated_list(&self, page_token: Option<&str>) -> ExecutorResult<InventoryPage> {
        let path = self.project_path("aggregated/instances");
        let mut query = vec![("fields", "items/*/instances(name,zone),nextPageToken")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: AggregatedListResponse = self.send(Method::GET, &path, &query, None).await?;

        let zones = response
            .items
            .into_iter()
            .filter(|(_, scoped)| !scoped.instances.is_empty())
            .map(|(scope, scoped)| ZoneInstances {
                zone: resource_name(&scope).to_string(),
                instances: scoped.instances.into_iter().map(|i| i.name).collect(),
            })
            .collect();

        Ok(InventoryPage {
            zones,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_instance(&self, zone: &str, name: &str) -> ExecutorResult<InstanceDescription> {
        let path = self.project_path(&format!("zones/{}/instances/{}", zone, name));
        let instance: InstanceResource = self.send(Method::GET, &path, &[], None).await?;

        let boot_disk = instance
            .disks
            .iter()
            .find(|d| d.boot)
            .and_then(|d| d.source.as_deref())
            .map(|s| resource_name(s).to_string());

        Ok(InstanceDescription {
            zone: if instance.zone.is_empty() {
                zone.to_string()
            } else {
                resource_name(&instance.zone).to_string()
            },
            name: instance.name,
            status: InstanceStatus::parse(&instance.status),
            machine_type: resource_name(&instance.machine_type).to_string(),
            boot_disk,
        })
    }

    async fn stop(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let path = self.project_path(&format!("zones/{}/instances/{}/stop", zone, name));
        self.post_operation(&path, None).await
    }

    async fn start(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let path = self.project_path(&format!("zones/{}/instances/{}/start", zone, name));
        self.post_operation(&path, None).await
    }

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ExecutorResult<OperationHandle> {
        let path = self.project_path(&format!("zones/{}/instances/{}/setMachineType", zone, name));
        let body = json!({
            "machineType": format!("zones/{}/machineTypes/{}", zone, machine_type),
        });
        self.post_operation(&path, Some(body)).await
    }

    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        snapshot_name: &str,
        storage_region: &str,
    ) -> ExecutorResult<OperationHandle> {
        let path = self.project_path(&format!("zones/{}/disks/{}/createSnapshot", zone, disk));
        let body = json!({
            "name": snapshot_name,
            "storageLocations": [storage_region],
        });
        self.post_operation(&path, Some(body)).await
    }

    /// Insert a copy of `spec.source_instance` booting from the snapshot.
    ///
    /// The source's network interfaces (without their addresses), service
    /// accounts, labels, tags and metadata are copied. A subnetwork outside
    /// the target zone's region is dropped, leaving only its network.
    async fn insert_instance(&self, zone: &str, spec: &InstanceSpec) -> ExecutorResult<OperationHandle> {
        let source_path = self.project_path(&format!(
            "zones/{}/instances/{}",
            spec.source_zone, spec.source_instance
        ));
        let source: SourceSettings = self.send(Method::GET, &source_path, &[], None).await?;

        let network_interfaces: Vec<NetworkInterface> = if source.network_interfaces.is_empty() {
            vec![NetworkInterface::default_network()]
        } else {
            source
                .network_interfaces
                .into_iter()
                .map(|nic| nic.for_zone(zone))
                .collect()
        };

        let path = self.project_path(&format!("zones/{}/instances", zone));
        let body = json!({
            "name": spec.name,
            "machineType": format!("zones/{}/machineTypes/{}", zone, spec.machine_type),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": {
                    "sourceSnapshot": format!("global/snapshots/{}", spec.source_snapshot),
                },
            }],
            "networkInterfaces": network_interfaces,
            "serviceAccounts": source.service_accounts,
            "labels": source.labels,
            "tags": source.tags,
            "metadata": source.metadata,
        });
        self.post_operation(&path, Some(body)).await
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> ExecutorResult<OperationHandle> {
        let path = self.project_path(&format!("zones/{}/instances/{}", zone, name));
        let op: OperationResource = self.send(Method::DELETE, &path, &[], None).await?;
        Ok(op.into_handle())
    }

    async fn wait_operation(&self, operation: &OperationHandle) -> ExecutorResult<()> {
        let path = match &operation.zone {
            Some(zone) => self.project_path(&format!("zones/{}/operations/{}/wait", zone, operation.name)),
            None => self.project_path(&format!("global/operations/{}/wait", operation.name)),
        };

        // The wait endpoint returns after at most ~2 minutes even if the operation is still running
        for attempt in 1..=self.config.max_operation_waits {
            let response = self
                .request(&Method::POST, &path, &[], None)?
                .timeout(self.config.operation_wait_timeout)
                .send()
                .await;
            let response = match response {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    debug!(operation = %operation.name, attempt, "Operation wait timed out, waiting again");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let op: OperationResource = Self::decode(&Method::POST, &path, response).await?;
            if op.status == "DONE" {
                return match op.error_message() {
                    Some(message) => Err(ExecutorError::Compute(format!(
                        "operation {} on {} failed: {}",
                        op.name, op.target_link, message
                    ))),
                    None => Ok(()),
                };
            }
            debug!(operation = %op.name, status = %op.status, "Operation still running");
        }

        Err(ExecutorError::Compute(format!(
            "operation {} did not finish after {} waits",
            operation.name, self.config.max_operation_waits
        )))
    }
}
