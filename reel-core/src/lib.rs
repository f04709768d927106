//! Reel Core
//!
//! Core types and abstractions for the Reel generation coordinator.
//!
//! This crate contains:
//! - Domain types: nodes, model assignments, pipeline runs and logs
//! - DTOs: Data transfer objects for inter-service communication

pub mod domain;
pub mod dto;
