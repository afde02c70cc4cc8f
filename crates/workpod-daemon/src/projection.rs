//! Enriched workspace projections
//!
//! A projection is a remote instance plus what the daemon knows about it
//! locally: its decoded source and the IDE it opens with. Projections are
//! rebuilt on every change and never persisted.

use serde::{Deserialize, Serialize};
use workpod_platform::WorkspaceInstance;

use crate::local_store::{IdeConfig, LocalWorkspace, LocalWorkspaceStore};

/// Annotation holding the encoded workspace source
pub const SOURCE_ANNOTATION: &str = "workpod.dev/source";

/// Label holding the local workspace ID
pub const WORKSPACE_ID_LABEL: &str = "workpod.dev/workspace-id";

/// Where a workspace's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum WorkspaceSource {
    Git(String),
    Image(String),
    Local(String),
    Unknown(String),
}

impl WorkspaceSource {
    /// Decode `git:<url>`, `image:<ref>` or `local:<path>`
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let source = match raw.split_once(':') {
            Some(("git", rest)) => WorkspaceSource::Git(rest.to_string()),
            Some(("image", rest)) => WorkspaceSource::Image(rest.to_string()),
            Some(("local", rest)) => WorkspaceSource::Local(rest.to_string()),
            _ => WorkspaceSource::Unknown(raw.to_string()),
        };
        Some(source)
    }
}

/// A workspace instance enriched with local state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedProjection {
    pub workspace_id: String,
    pub instance: WorkspaceInstance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<WorkspaceSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ide: Option<IdeConfig>,
    #[serde(default)]
    pub imported: bool,
}

impl EnrichedProjection {
    /// Local workspace ID of an instance: its label, else its name
    pub fn workspace_id_of(instance: &WorkspaceInstance) -> String {
        instance
            .metadata
            .labels
            .get(WORKSPACE_ID_LABEL)
            .cloned()
            .unwrap_or_else(|| instance.metadata.name.clone())
    }

    fn source_of(instance: &WorkspaceInstance) -> Option<WorkspaceSource> {
        instance
            .metadata
            .annotations
            .get(SOURCE_ANNOTATION)
            .and_then(|raw| WorkspaceSource::parse(raw))
    }

    /// Build a projection, reading IDE settings from the local store
    pub async fn build(instance: WorkspaceInstance, store: &LocalWorkspaceStore) -> Self {
        let workspace_id = Self::workspace_id_of(&instance);
        let ide = store.ide_config(&workspace_id).await;
        Self {
            source: Self::source_of(&instance),
            workspace_id,
            instance,
            ide,
            imported: false,
        }
    }

    /// Build a projection for an instance backing a local record
    pub fn from_local(instance: WorkspaceInstance, local: &LocalWorkspace) -> Self {
        Self {
            source: Self::source_of(&instance),
            workspace_id: local.id.clone(),
            instance,
            ide: local.ide.clone(),
            imported: local.imported,
        }
    }

    pub fn uid(&self) -> &str {
        &self.instance.metadata.uid
    }
}
