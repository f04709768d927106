//! Agent-related API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use reel_core::dto::agent::AgentRecord;

impl CoordinatorClient {
    /// Push an agent's current status to the coordinator
    ///
    /// Agents call this periodically; a record that stops arriving ages out
    /// of the pull endpoint and the node is marked offline.
    pub async fn send_heartbeat(&self, record: &AgentRecord) -> Result<()> {
        let url = format!("{}/api/agents/heartbeat", self.base_url);
        let response = self.client.post(&url).json(record).send().await?;

        self.handle_empty_response(response).await
    }

    /// Pull the records of all live agents
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let url = format!("{}/api/agents", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
