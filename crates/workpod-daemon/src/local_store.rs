//! Local workspace store
//!
//! Read-only view of workspaces recorded on this machine, one directory per
//! workspace ID holding a `workspace.json`:
//!
//! ```text
//! ~/.workpod/workspaces/<id>/workspace.json
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const WORKSPACE_FILE: &str = "workspace.json";

/// IDE a workspace opens with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// A workspace as recorded locally
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWorkspace {
    pub id: String,
    /// UID of the remote instance backing this workspace
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub ide: Option<IdeConfig>,
    /// Created elsewhere and imported onto this machine
    #[serde(default)]
    pub imported: bool,
}

/// Read-only access to the local workspace store
#[derive(Debug, Clone)]
pub struct LocalWorkspaceStore {
    root: PathBuf,
}

impl LocalWorkspaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workspace_path(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && id != "."
            && id != "..";
        valid.then(|| self.root.join(id).join(WORKSPACE_FILE))
    }

    /// Load one workspace; `None` when it is not recorded or unreadable
    pub async fn load(&self, id: &str) -> Option<LocalWorkspace> {
        let path = self.workspace_path(id)?;
        read_workspace(&path).await
    }

    /// IDE configuration for a workspace ID
    pub async fn ide_config(&self, id: &str) -> Option<IdeConfig> {
        self.load(id).await.and_then(|workspace| workspace.ide)
    }

    /// Every workspace in the store
    pub async fn list(&self) -> Vec<LocalWorkspace> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Local workspace store {:?} not readable: {}", self.root, e);
                return Vec::new();
            }
        };

        let mut workspaces = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path().join(WORKSPACE_FILE);
            if let Some(workspace) = read_workspace(&path).await {
                workspaces.push(workspace);
            }
        }

        workspaces.sort_by(|a, b| a.id.cmp(&b.id));
        workspaces
    }

    pub async fn list_imported(&self) -> Vec<LocalWorkspace> {
        self.list()
            .await
            .into_iter()
            .filter(|workspace| workspace.imported)
            .collect()
    }
}

async fn read_workspace(path: &Path) -> Option<LocalWorkspace> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&json) {
        Ok(workspace) => Some(workspace),
        Err(e) => {
            warn!("Ignoring malformed workspace file {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn write_workspace(root: &Path, workspace: &LocalWorkspace) {
        let dir = root.join(&workspace.id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(WORKSPACE_FILE),
            serde_json::to_string_pretty(workspace).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_and_list() {
        let temp = TempDir::new().unwrap();
        let store = LocalWorkspaceStore::new(temp.path());

        write_workspace(
            temp.path(),
            &LocalWorkspace {
                id: "b-ws".to_string(),
                uid: Some("uid-b".to_string()),
                ide: Some(IdeConfig {
                    name: "vscode".to_string(),
                    options: BTreeMap::new(),
                }),
                imported: true,
            },
        );
        write_workspace(
            temp.path(),
            &LocalWorkspace {
                id: "a-ws".to_string(),
                ..Default::default()
            },
        );
        std::fs::create_dir_all(temp.path().join("broken")).unwrap();
        std::fs::write(temp.path().join("broken").join(WORKSPACE_FILE), "{").unwrap();

        let all = store.list().await;
        assert_eq!(
            all.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            vec!["a-ws", "b-ws"]
        );

        let imported = store.list_imported().await;
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].uid.as_deref(), Some("uid-b"));

        assert_eq!(
            store.ide_config("b-ws").await.map(|ide| ide.name),
            Some("vscode".to_string())
        );
        assert!(store.load("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_escapes() {
        let temp = TempDir::new().unwrap();
        let store = LocalWorkspaceStore::new(temp.path().join("store"));
        assert!(store.load("..").await.is_none());
        assert!(store.load("../x").await.is_none());
        assert!(store.load("").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let store = LocalWorkspaceStore::new("/nonexistent/workpod/store");
        assert!(store.list().await.is_empty());
    }
}
