//! Reel HTTP Client
//!
//! Typed access to the coordinator's `/api` routes: the node registry and
//! scans, step assignments, pipeline runs and the agent board.
//!
//! The `reel` CLI drives runs with it, `reel-agent` pushes heartbeats, and a
//! coordinator configured with `REEL_COORDINATOR_URL` pulls agent records
//! from another coordinator.
//!
//! # Example
//!
//! ```no_run
//! use reel_client::CoordinatorClient;
//! use reel_core::domain::pipeline::RunOptions;
//! use reel_core::dto::run::StartRun;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!
//!     let run = client
//!         .start_run(&StartRun {
//!             premise: "a lighthouse keeper sees a ghost ship".to_string(),
//!             options: RunOptions::default(),
//!         })
//!         .await?;
//!
//!     let run = client.get_run(run.id).await?;
//!     println!("{} {} {}%", run.id, run.status, run.progress);
//!     Ok(())
//! }
//! ```

pub mod error;
mod agents;
mod nodes;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Reel coordinator API
///
/// Methods live next to the resource they touch: `nodes.rs` covers nodes,
/// scans and assignments, `runs.rs` covers runs and their artifacts, and
/// `agents.rs` covers heartbeats and the agent board.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Client with reqwest's default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Client over a preconfigured `reqwest::Client`
    ///
    /// Agents pass one with a timeout shorter than their heartbeat interval,
    /// so a hung coordinator never delays the next heartbeat.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Maps non-2xx answers to `ClientError::ApiError` with the body text,
    /// which carries the coordinator's `{"error": ...}` message
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!(status = status.as_u16(), "Coordinator returned an error");
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Same as `handle_response` for routes answering with an empty body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CoordinatorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = CoordinatorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
