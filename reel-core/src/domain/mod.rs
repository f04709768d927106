//! Core domain types
//!
//! This module contains the core domain structures used across Reel services.
//! They are shared between the orchestrator (which owns the registry and runs
//! pipelines), the agent (which reports its own node) and the CLI.

pub mod assignment;
pub mod log;
pub mod node;
pub mod pipeline;
