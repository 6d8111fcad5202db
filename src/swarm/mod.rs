//! Cluster orchestration.
//!
//! The [`ClusterManager`] drives service provisioning end to end:
//! node discovery through the [`NodeRegistry`], the platform's task state
//! machine (`CREATING → WAITING_ASSIGNMENT → WAITING_ACTIVE → BOUND`), and
//! one [`RemoteUnit`] per live container. Commands are routed to specific
//! units; each unit's dispatcher executes them idle-gated in the
//! background.

pub mod manager;
pub mod registry;
pub mod unit;

pub use manager::{ClusterManager, ProvisionReport};
pub use registry::{Node, NodeRegistry};
pub use unit::RemoteUnit;
