//! Reel coordinator
//!
//! Discovers generation nodes on the local network, keeps their capabilities
//! up to date and drives narrative pipeline runs across them.
//!
//! Services are constructed explicitly and shared through `Arc`:
//! [`registry::NodeRegistry`] holds node state, [`discovery::Scanner`] and
//! [`health::HealthMonitor`] feed it, [`router::CapabilityRouter`] picks
//! targets from it and [`pipeline::PipelineOrchestrator`] runs steps on them
//! through a [`backend::Backend`].

pub mod api;
pub mod backend;
pub mod config;
pub mod discovery;
pub mod health;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;
