//! Sources of self-reporting agent records

use async_trait::async_trait;
use reel_client::CoordinatorClient;
use reel_core::dto::agent::AgentRecord;

use super::ScanError;

/// Something that can list the currently live agents
#[async_trait]
pub trait AgentSource: Send + Sync {
    async fn fetch_agents(&self) -> Result<Vec<AgentRecord>, ScanError>;
}

/// Pulls agent records from a remote coordination service
pub struct CoordinatorAgents {
    client: CoordinatorClient,
}

impl CoordinatorAgents {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: CoordinatorClient::new(base_url),
        }
    }
}

#[async_trait]
impl AgentSource for CoordinatorAgents {
    async fn fetch_agents(&self) -> Result<Vec<AgentRecord>, ScanError> {
        Ok(self.client.list_agents().await?)
    }
}
