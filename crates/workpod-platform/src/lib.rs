//! Workpod platform client
//!
//! Types and client for the managed cluster platform that owns workspace
//! instances, projects, templates and clusters.

pub mod client;
pub mod error;
pub mod namespace;
pub mod types;
pub mod watch;

pub use client::{ControlPlane, HttpControlPlane};
pub use error::{ControlPlaneError, NamespaceError};
pub use namespace::ProjectNamespacer;
pub use types::{
    Cluster, EntityInfo, InstanceKey, InstancePhase, ObjectMeta, Project, SelfIdentity, Template,
    TemplateRef, UserOrTeam, WorkspaceInstance,
};
pub use watch::{Tombstone, WatchEvent, WatchStream};
