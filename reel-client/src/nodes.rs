//! Node registry API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use reel_core::domain::assignment::{AssignmentTable, ModelAssignment};
use reel_core::domain::node::Node;
use reel_core::dto::node::{NodeQuery, ScanQuery, ScanSummary};

impl CoordinatorClient {
    /// List registered nodes, optionally filtered by capability and status
    pub async fn list_nodes(&self, query: NodeQuery) -> Result<Vec<Node>> {
        let url = format!("{}/api/nodes", self.base_url);
        let response = self.client.get(&url).query(&query).send().await?;

        self.handle_response(response).await
    }

    /// Get a single node by id
    pub async fn get_node(&self, id: &str) -> Result<Node> {
        let url = format!("{}/api/nodes/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Trigger a network scan and wait for its summary
    ///
    /// # Arguments
    /// * `quick` - Only re-check known hosts and localhost
    pub async fn scan(&self, quick: bool) -> Result<ScanSummary> {
        let url = format!("{}/api/nodes/scan", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&ScanQuery { quick })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get the model assignment of every step
    pub async fn list_assignments(&self) -> Result<AssignmentTable> {
        let url = format!("{}/api/assignments", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Replace the candidate list of one step
    pub async fn set_assignment(&self, assignment: &ModelAssignment) -> Result<ModelAssignment> {
        let url = format!("{}/api/assignments", self.base_url);
        let response = self.client.put(&url).json(assignment).send().await?;

        self.handle_response(response).await
    }
}
