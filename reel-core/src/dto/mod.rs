//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Reel services
//! (orchestrator, agent, CLI). DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod agent;
pub mod node;
pub mod run;
