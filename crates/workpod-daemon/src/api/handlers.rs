//! Control API request handlers

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};
use workpod_platform::{Cluster, Project, SelfIdentity, Template, WorkspaceInstance};
use workpod_proto::DaemonState;

use super::error::ApiError;
use super::models::*;
use super::ApiState;
use crate::cache::{project_instances, CacheOptions, Snapshot, WorkspaceCache};
use crate::projection::EnrichedProjection;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Metrics are not collected; kept so scrapers get a 200
pub async fn metrics() -> &'static str {
    ""
}

pub async fn status(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let node = state.node.node_status().await;
    let daemon_state = match &node {
        Ok(status) => status.daemon_state(),
        Err(e) => {
            debug!("Overlay status unavailable: {}", e);
            DaemonState::Stopped
        }
    };
    let login_required = !state.auth.is_authenticated().await;

    let debug = query.debug.map(|_| {
        let overlay = match &node {
            Ok(status) => serde_json::to_value(status).unwrap_or_default(),
            Err(e) => json!({ "error": e.to_string() }),
        };
        json!({
            "config": state.debug_config,
            "overlay": overlay,
        })
    });

    Json(StatusResponse {
        state: daemon_state,
        login_required,
        debug,
    })
}

pub async fn version(State(state): State<Arc<ApiState>>) -> Json<VersionResponse> {
    Json(state.version.clone())
}

pub async fn self_identity(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<SelfIdentity>, ApiError> {
    Ok(Json(state.control_plane.self_identity().await?))
}

/// Request daemon shutdown; repeated calls are harmless
pub async fn shutdown(State(state): State<Arc<ApiState>>) -> Json<ShutdownResponse> {
    if !state.shutdown.is_cancelled() {
        info!("Shutdown requested over the control API");
        state.shutdown.cancel();
    }
    Json(ShutdownResponse {
        status: "shutting down".to_string(),
    })
}

pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.control_plane.list_projects().await?))
}

pub async fn list_templates(
    State(state): State<Arc<ApiState>>,
    Path(project): Path<String>,
) -> Result<Json<Vec<Template>>, ApiError> {
    Ok(Json(state.control_plane.list_templates(&project).await?))
}

pub async fn list_clusters(
    State(state): State<Arc<ApiState>>,
    Path(project): Path<String>,
) -> Result<Json<Vec<Cluster>>, ApiError> {
    Ok(Json(state.control_plane.list_clusters(&project).await?))
}

/// Look up one workspace by instance UID across all project caches
pub async fn get_workspace(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<WorkspaceQuery>, QueryRejection>,
) -> Result<Json<EnrichedProjection>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let uid = query
        .uid
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing uid".to_string()))?;

    for cache in state.caches.values() {
        if let Some(projection) = cache.get(&uid).await {
            return Ok(Json(projection));
        }
    }
    Err(ApiError::NotFound(format!("Workspace {} not found", uid)))
}

/// All workspaces across every accessible project
pub async fn list_workspaces(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<EnrichedProjection>>, ApiError> {
    let projects = state.control_plane.list_projects().await?;
    if projects.is_empty() {
        return Err(ApiError::NoAccessibleProjects);
    }

    let mut workspaces = Vec::new();
    for project in &projects {
        let name = &project.metadata.name;
        match state.caches.get(name) {
            Some(cache) => workspaces.extend(cache.list().await),
            None => {
                let namespace = state.namespacer.namespace_for(name)?;
                let instances = state
                    .control_plane
                    .list_workspaces(&namespace, &state.selector)
                    .await?;
                workspaces.extend(
                    project_instances(instances, &state.store, state.owner.as_ref()).await,
                );
            }
        }
    }
    Ok(Json(workspaces))
}

/// Stream the project's full workspace set as NDJSON, one line per change
pub async fn watch_workspaces(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let project = query
        .project
        .filter(|project| !project.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing project".to_string()))?;

    let cache = match state.caches.get(&project) {
        Some(cache) => cache.clone(),
        None => {
            // Lives as long as the response stream
            let namespace = state.namespacer.namespace_for(&project)?;
            let options = CacheOptions::new(namespace, state.selector.clone())
                .with_owner(state.owner.clone());
            let cache = Arc::new(WorkspaceCache::new(
                state.control_plane.clone(),
                state.store.clone(),
                options,
            ));
            cache.open().await?;
            cache
        }
    };

    debug!(%project, "Workspace watch subscribed");
    let receiver = cache.subscribe();
    let lines = futures::stream::unfold(
        (receiver, cache, true),
        |(mut receiver, cache, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let snapshot: Snapshot = receiver.borrow_and_update().clone();
            let line = match snapshot_line(&snapshot) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode workspace snapshot: {}", e);
                    return None;
                }
            };
            Some((Ok::<_, Infallible>(line), (receiver, cache, false)))
        },
    )
    .take_until(state.shutdown.clone().cancelled_owned());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

fn snapshot_line(snapshot: &Snapshot) -> serde_json::Result<Bytes> {
    let mut line = serde_json::to_vec(snapshot.as_slice())?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

pub async fn create_workspace(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<Json<WorkspaceInstance>, ApiError> {
    let instance = resolve_instance(&state, payload)?;
    info!(name = %instance.metadata.name, namespace = %instance.metadata.namespace, "Creating workspace");
    Ok(Json(state.control_plane.create_workspace(&instance).await?))
}

pub async fn update_workspace(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<Json<WorkspaceInstance>, ApiError> {
    let instance = resolve_instance(&state, payload)?;
    info!(name = %instance.metadata.name, namespace = %instance.metadata.namespace, "Updating workspace");
    Ok(Json(state.control_plane.update_workspace(&instance).await?))
}

/// Validate the body and fill in the namespace from the project
///
/// Falls back to the configured default project.
fn resolve_instance(
    state: &ApiState,
    payload: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<WorkspaceInstance, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut instance = request.instance;

    if instance.metadata.name.is_empty() {
        return Err(ApiError::BadRequest("Workspace name is required".to_string()));
    }
    if instance.metadata.namespace.is_empty() {
        let project = request
            .project
            .or_else(|| state.default_project.clone())
            .ok_or_else(|| {
                ApiError::BadRequest("Either a namespace or a project is required".to_string())
            })?;
        instance.metadata.namespace = state.namespacer.namespace_for(&project)?;
    }
    Ok(instance)
}
