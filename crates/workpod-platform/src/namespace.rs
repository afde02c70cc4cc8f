//! Project to namespace mapping
//!
//! The platform stores each project's resources in a namespace named
//! `<prefix><project>`. The prefix comes from the control plane's self
//! response and is carried as a value, never as process state.

use crate::error::NamespaceError;
use crate::types::SelfIdentity;

/// Prefix used when the control plane does not advertise one
pub const DEFAULT_PROJECT_NAMESPACE_PREFIX: &str = "p-";

/// Maps project names to namespaces and back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectNamespacer {
    prefix: Option<String>,
}

impl ProjectNamespacer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// A namespacer that fails every lookup until configured
    pub fn unconfigured() -> Self {
        Self { prefix: None }
    }

    /// Build from the self identity, falling back to the default prefix
    pub fn from_self(identity: &SelfIdentity) -> Self {
        let prefix = identity
            .project_namespace_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT_NAMESPACE_PREFIX.to_string());
        Self::new(prefix)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn namespace_for(&self, project: &str) -> Result<String, NamespaceError> {
        let prefix = self.prefix.as_deref().ok_or(NamespaceError::Unconfigured)?;
        if project.is_empty() {
            return Err(NamespaceError::EmptyProject);
        }
        Ok(format!("{}{}", prefix, project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_fails() {
        let namespacer = ProjectNamespacer::unconfigured();
        assert!(matches!(
            namespacer.namespace_for("default"),
            Err(NamespaceError::Unconfigured)
        ));
    }

    #[test]
    fn test_mapping() {
        let namespacer = ProjectNamespacer::new("loft-p-");
        assert_eq!(namespacer.namespace_for("default").unwrap(), "loft-p-default");
        assert!(matches!(
            namespacer.namespace_for(""),
            Err(NamespaceError::EmptyProject)
        ));
    }

    #[test]
    fn test_from_self_defaults_prefix() {
        let namespacer = ProjectNamespacer::from_self(&SelfIdentity::default());
        assert_eq!(namespacer.prefix(), Some(DEFAULT_PROJECT_NAMESPACE_PREFIX));

        let identity = SelfIdentity {
            project_namespace_prefix: Some("team-".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ProjectNamespacer::from_self(&identity).namespace_for("x").unwrap(),
            "team-x"
        );
    }
}
