//! Control-plane client
//!
//! [`ControlPlane`] is the seam the daemon depends on. [`HttpControlPlane`]
//! implements it against the platform's Kubernetes-style REST API.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::ControlPlaneError;
use crate::types::{Cluster, Project, ResourceList, SelfIdentity, Template, WorkspaceInstance};
use crate::watch::{decode_ndjson, WatchEvent, WatchStream};

const MANAGEMENT_API: &str = "apis/management.workpod.dev/v1";
const STORAGE_API: &str = "apis/storage.workpod.dev/v1";

/// Connect timeout for every request
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Overall timeout for non-watch requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Operations the daemon needs from the platform
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Identity behind the configured credentials
    async fn self_identity(&self) -> Result<SelfIdentity, ControlPlaneError>;

    async fn list_projects(&self) -> Result<Vec<Project>, ControlPlaneError>;

    async fn list_templates(&self, project: &str) -> Result<Vec<Template>, ControlPlaneError>;

    async fn list_clusters(&self, project: &str) -> Result<Vec<Cluster>, ControlPlaneError>;

    async fn list_workspaces(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkspaceInstance>, ControlPlaneError>;

    /// Current instances as `Added` events followed by live changes
    async fn watch_workspaces(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<WatchStream, ControlPlaneError>;

    async fn create_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError>;

    async fn update_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError>;
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

/// HTTP implementation of [`ControlPlane`]
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    base: Url,
    access_key: Option<String>,
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, access_key: Option<String>) -> Result<Self, ControlPlaneError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            base,
            access_key,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, ControlPlaneError> {
        Ok(self.base.join(path)?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ControlPlaneError> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let response = self
            .request(reqwest::Method::GET, url)
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn list_workspace_page(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<ResourceList<WorkspaceInstance>, ControlPlaneError> {
        let path = format!("{}/namespaces/{}/workspaceinstances", STORAGE_API, namespace);
        self.get_json(&path, &[("labelSelector", selector)]).await
    }

    fn workspace_namespace(instance: &WorkspaceInstance) -> Result<&str, ControlPlaneError> {
        let namespace = instance.metadata.namespace.as_str();
        if namespace.is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "workspace instance has no namespace".to_string(),
            ));
        }
        Ok(namespace)
    }
}

/// Turn a non-success response into the matching error
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ControlPlaneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StatusBody>(&body)
        .ok()
        .map(|status| status.message)
        .filter(|message| !message.is_empty())
        .unwrap_or(body);

    Err(ControlPlaneError::from_status(status.as_u16(), message))
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn self_identity(&self) -> Result<SelfIdentity, ControlPlaneError> {
        self.get_json(&format!("{}/self", MANAGEMENT_API), &[]).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, ControlPlaneError> {
        let list: ResourceList<Project> = self
            .get_json(&format!("{}/projects", MANAGEMENT_API), &[])
            .await?;
        Ok(list.items)
    }

    async fn list_templates(&self, project: &str) -> Result<Vec<Template>, ControlPlaneError> {
        let path = format!("{}/projects/{}/templates", MANAGEMENT_API, project);
        let list: ResourceList<Template> = self.get_json(&path, &[]).await?;
        Ok(list.items)
    }

    async fn list_clusters(&self, project: &str) -> Result<Vec<Cluster>, ControlPlaneError> {
        let path = format!("{}/projects/{}/clusters", MANAGEMENT_API, project);
        let list: ResourceList<Cluster> = self.get_json(&path, &[]).await?;
        Ok(list.items)
    }

    async fn list_workspaces(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkspaceInstance>, ControlPlaneError> {
        Ok(self.list_workspace_page(namespace, selector).await?.items)
    }

    async fn watch_workspaces(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<WatchStream, ControlPlaneError> {
        let initial = self.list_workspace_page(namespace, selector).await?;
        let resource_version = initial.metadata.resource_version.unwrap_or_default();

        let url = self.url(&format!(
            "{}/namespaces/{}/workspaceinstances",
            STORAGE_API, namespace
        ))?;
        debug!(
            "Watching {} from resource version {:?}",
            url, resource_version
        );

        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[
                ("watch", "true"),
                ("allowWatchBookmarks", "true"),
                ("labelSelector", selector),
                ("resourceVersion", resource_version.as_str()),
            ])
            .send()
            .await?;
        let body = check(response)
            .await?
            .bytes_stream()
            .map_err(std::io::Error::other);

        let snapshot = stream::iter(
            initial
                .items
                .into_iter()
                .map(|instance| Ok(WatchEvent::Added(instance))),
        );

        Ok(snapshot.chain(decode_ndjson(body)).boxed())
    }

    async fn create_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError> {
        let namespace = Self::workspace_namespace(instance)?;
        let url = self.url(&format!(
            "{}/namespaces/{}/workspaceinstances",
            STORAGE_API, namespace
        ))?;
        debug!("POST {}", url);

        let response = self
            .request(reqwest::Method::POST, url)
            .json(instance)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn update_workspace(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<WorkspaceInstance, ControlPlaneError> {
        let namespace = Self::workspace_namespace(instance)?;
        let url = self.url(&format!(
            "{}/namespaces/{}/workspaceinstances/{}",
            STORAGE_API, namespace, instance.metadata.name
        ))?;
        debug!("PUT {}", url);

        let response = self
            .request(reqwest::Method::PUT, url)
            .json(instance)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}
