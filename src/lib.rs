//! Task-execution core for Docker Swarm clusters.
//!
//! A [`ClusterManager`](swarm::ClusterManager) discovers cluster nodes,
//! provisions a replicated service across them, and binds one
//! [`RemoteUnit`](swarm::RemoteUnit) per live container. Each unit owns a
//! [`Dispatcher`](exec::Dispatcher): a background control loop that runs
//! submitted work (blocking or async) without blocking the submitter and
//! records every result in a completion-ordered history.
//!
//! The cluster platform is reached through the [`platform::ClusterPlatform`]
//! trait; [`platform::DockerEngine`] implements it against the Docker
//! Engine HTTP API, and tests drive the same seam with scripted mocks.

pub mod catalog;
pub mod config;
pub mod error;
pub mod exec;
pub mod platform;
pub mod poll;
pub mod swarm;

pub use error::{Result, SwarmError};
