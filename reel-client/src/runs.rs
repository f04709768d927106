//! Pipeline run API endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use reel_core::domain::pipeline::PipelineRun;
use reel_core::dto::run::{RunSummary, StartRun};
use uuid::Uuid;

impl CoordinatorClient {
    /// Start a generation run
    ///
    /// Returns immediately with the run's initial state; poll
    /// [`CoordinatorClient::get_run`] for progress.
    ///
    /// # Example
    /// ```no_run
    /// # use reel_client::CoordinatorClient;
    /// # use reel_core::dto::run::StartRun;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// let run = client.start_run(&StartRun {
    ///     premise: "A lighthouse keeper finds a map".to_string(),
    ///     options: Default::default(),
    /// }).await?;
    /// println!("started {}", run.id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_run(&self, req: &StartRun) -> Result<PipelineRun> {
        let url = format!("{}/api/runs", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Get the latest snapshot of a run
    pub async fn get_run(&self, id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/api/runs/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a run that has not finished
    pub async fn cancel_run(&self, id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/api/runs/{}/cancel", self.base_url, id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the outputs of a finished run as raw JSON
    pub async fn get_artifacts(&self, id: Uuid) -> Result<serde_json::Value> {
        let url = format!("{}/api/runs/{}/artifacts", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List summaries of all known runs
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/api/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
