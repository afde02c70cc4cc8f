//! Overlay network client
//!
//! The daemon reaches remote workspaces over a private overlay network run by
//! a userspace node. This crate spawns that node, drives it through its
//! LocalAPI and exposes its local socket for pass-through clients.

pub mod error;
pub mod localapi;
pub mod node;
pub mod types;

pub use error::OverlayError;
pub use localapi::{connect_local, LocalApiClient, LocalStream};
pub use node::{node_args, write_snapshot, OverlayConfig, OverlayNetworkClient, CAPABILITY_VERSION};
pub use types::{NodeStatus, PeerStatus};
