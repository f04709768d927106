//! Local render daemon (`/prompt`, `/queue`)
//!
//! Render jobs are submitted as a minimal text-to-image graph and tracked by
//! the prompt id the daemon hands back. The queue endpoint doubles as a load
//! probe for routing.

use std::time::Duration;

use async_trait::async_trait;
use reel_core::domain::node::{Capability, Node};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{BackendError, InvocationRequest, check_status};
use crate::router::LoadProbe;

/// Frame size of submitted renders
const WIDTH: u32 = 1024;
const HEIGHT: u32 = 576;

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: Value,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    queue_running: Vec<Value>,

    #[serde(default)]
    queue_pending: Vec<Value>,
}

/// Text-to-image graph in the daemon's API format
pub fn txt2img_workflow(checkpoint: &str, positive: &str, negative: &str, seed: u64) -> Value {
    json!({
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": checkpoint }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": WIDTH, "height": HEIGHT, "batch_size": 1 }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": positive, "clip": ["4", 1] }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": negative, "clip": ["4", 1] }
        },
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": seed,
                "steps": 25,
                "cfg": 7.0,
                "sampler_name": "euler",
                "scheduler": "normal",
                "denoise": 1.0,
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "reel", "images": ["8", 0] }
        }
    })
}

/// Queues a render of `request.input` (negative prompt in `request.system`)
/// and returns the daemon's prompt id
pub async fn submit(
    client: &reqwest::Client,
    endpoint: &str,
    client_id: &str,
    checkpoint: &str,
    request: &InvocationRequest,
) -> Result<String, BackendError> {
    let url = format!("{}/prompt", endpoint.trim_end_matches('/'));
    // JSON numbers above 2^53 lose precision in the daemon
    let seed = Uuid::new_v4().as_u64_pair().0 >> 11;

    let body = PromptRequest {
        prompt: txt2img_workflow(checkpoint, &request.input, &request.system, seed),
        client_id,
    };

    let response = check_status(client.post(&url).json(&body).send().await?).await?;
    let queued: PromptResponse = response.json().await?;

    tracing::debug!(prompt_id = %queued.prompt_id, "Render queued");
    Ok(queued.prompt_id)
}

/// Estimates render wait from the daemon's queue length
pub struct QueueLoadProbe {
    client: reqwest::Client,

    /// Assumed duration of one queued job
    per_job: Duration,
}

impl QueueLoadProbe {
    pub fn new(timeout: Duration, per_job: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, per_job })
    }

    /// Running plus pending jobs, `None` when the queue can't be read
    pub async fn queue_length(&self, endpoint: &str) -> Option<usize> {
        let queue = self.fetch_queue(endpoint).await?;
        Some(queue.queue_running.len() + queue.queue_pending.len())
    }

    /// Prompt id of the job the daemon is rendering, if any
    ///
    /// Queue entries are `[number, prompt_id, graph, ...]` arrays.
    pub async fn running_job(&self, endpoint: &str) -> Option<String> {
        let queue = self.fetch_queue(endpoint).await?;
        queue
            .queue_running
            .first()?
            .get(1)
            .and_then(Value::as_str)
            .map(String::from)
    }

    async fn fetch_queue(&self, endpoint: &str) -> Option<QueueResponse> {
        let url = format!("{}/queue", endpoint.trim_end_matches('/'));
        let response = self.client.get(&url).send().await.ok()?;
        check_status(response).await.ok()?.json().await.ok()
    }
}

#[async_trait]
impl LoadProbe for QueueLoadProbe {
    async fn estimated_wait(&self, node: &Node, capability: Capability) -> Option<Duration> {
        if capability != Capability::Render {
            return None;
        }
        let endpoint = node.render.endpoint.as_deref()?;
        let jobs = self.queue_length(endpoint).await?;
        Some(self.per_job * jobs as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get, routing::post};
    use reel_core::domain::node::{CapabilityState, NodeOrigin};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_workflow_wires_prompts_and_checkpoint() {
        let graph = txt2img_workflow("sdxl.safetensors", "a red fox", "blurry", 7);
        assert_eq!(graph["4"]["inputs"]["ckpt_name"], "sdxl.safetensors");
        assert_eq!(graph["6"]["inputs"]["text"], "a red fox");
        assert_eq!(graph["7"]["inputs"]["text"], "blurry");
        assert_eq!(graph["3"]["inputs"]["seed"], 7);
    }

    #[tokio::test]
    async fn test_submit_returns_prompt_id() {
        let app = Router::new().route(
            "/prompt",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["client_id"], "reel-test");
                assert_eq!(body["prompt"]["6"]["inputs"]["text"], "a red fox");
                Json(json!({ "prompt_id": "p-123", "number": 4, "node_errors": {} }))
            }),
        );
        let endpoint = serve(app).await;

        let prompt_id = submit(
            &reqwest::Client::new(),
            &endpoint,
            "reel-test",
            "sdxl.safetensors",
            &InvocationRequest::new("blurry", "a red fox"),
        )
        .await
        .unwrap();
        assert_eq!(prompt_id, "p-123");
    }

    #[tokio::test]
    async fn test_queue_load_probe() {
        let app = Router::new().route(
            "/queue",
            get(|| async {
                Json(json!({ "queue_running": [[1, "a"]], "queue_pending": [[2, "b"], [3, "c"]] }))
            }),
        );
        let endpoint = serve(app).await;
        let node = Node::new("127.0.0.1", "127.0.0.1", NodeOrigin::Discovered)
            .with_render(CapabilityState::online(endpoint, vec!["sdxl".to_string()]));

        let probe = QueueLoadProbe::new(Duration::from_secs(1), Duration::from_secs(10)).unwrap();
        assert_eq!(
            probe.estimated_wait(&node, Capability::Render).await,
            Some(Duration::from_secs(30))
        );
        assert_eq!(probe.estimated_wait(&node, Capability::TextGen).await, None);
        assert_eq!(
            probe.running_job(node.render.endpoint.as_deref().unwrap()).await.as_deref(),
            Some("a")
        );
    }
}
