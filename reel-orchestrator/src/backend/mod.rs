//! Backend invocation adapter
//!
//! One narrow `invoke` interface over every kind of backend: the local text
//! daemon, the local render daemon and chat-completions cloud providers.
//! Each protocol produces its own [`BackendResponse`] variant; callers only
//! ever see the normalized [`StepOutput`].

pub mod cloud;
pub mod comfy;
pub mod ollama;
pub mod response;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reel_core::domain::node::{BackendKind, Capability};
use reel_core::domain::pipeline::FailureKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::router::Target;

/// Longest error body kept from a failed backend call
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend request timed out")]
    Timeout,

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no credential configured for provider '{0}'")]
    CredentialMissing(String),

    #[error("credential rejected by provider '{0}'")]
    CredentialInvalid(String),

    #[error("{backend} nodes cannot serve {capability}")]
    Unsupported {
        backend: String,
        capability: Capability,
    },

    #[error("node has no {0} endpoint")]
    MissingEndpoint(Capability),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::MalformedResponse(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl BackendError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackendError::Transport(_) | BackendError::Status { .. } => FailureKind::Transport,
            BackendError::Timeout => FailureKind::Timeout,
            BackendError::MalformedResponse(_) => FailureKind::MalformedResponse,
            BackendError::CredentialMissing(_) => FailureKind::CredentialMissing,
            BackendError::CredentialInvalid(_) => FailureKind::CredentialInvalid,
            BackendError::Unsupported { .. } | BackendError::MissingEndpoint(_) => {
                FailureKind::CapabilityUnavailable
            }
        }
    }
}

/// Sampling knobs passed through to the backend when set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// What a step asks of a backend
///
/// For render targets `input` is the positive prompt and `system` the
/// negative prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationRequest {
    pub system: String,
    pub input: String,
    pub options: GenerationOptions,
}

impl InvocationRequest {
    pub fn new(system: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            input: input.into(),
            options: GenerationOptions::default(),
        }
    }
}

/// Protocol-specific backend answer
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    /// Local text daemon completion
    Generated { text: String },

    /// Cloud chat completion
    ChatCompletion {
        text: String,
        finish_reason: Option<String>,
    },

    /// Render job accepted into the daemon's queue
    Queued { node_id: String, prompt_id: String },
}

impl BackendResponse {
    /// Normalizes the answer, stripping reasoning markup from text
    pub fn into_output(self) -> Result<StepOutput, BackendError> {
        match self {
            BackendResponse::Generated { text } | BackendResponse::ChatCompletion { text, .. } => {
                let text = response::strip_thinking(&text);
                if text.is_empty() {
                    return Err(BackendError::MalformedResponse(
                        "backend returned an empty answer".to_string(),
                    ));
                }
                Ok(StepOutput::Text(text))
            }
            BackendResponse::Queued { node_id, prompt_id } => {
                Ok(StepOutput::Artifact(ArtifactRef { node_id, prompt_id }))
            }
        }
    }
}

/// Reference to a render job on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub node_id: String,
    pub prompt_id: String,
}

/// Backend output as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    Text(String),
    Artifact(ArtifactRef),
}

impl StepOutput {
    pub fn into_text(self) -> Result<String, BackendError> {
        match self {
            StepOutput::Text(text) => Ok(text),
            StepOutput::Artifact(_) => Err(BackendError::MalformedResponse(
                "expected text, got a render artifact".to_string(),
            )),
        }
    }

    pub fn into_artifact(self) -> Result<ArtifactRef, BackendError> {
        match self {
            StepOutput::Artifact(artifact) => Ok(artifact),
            StepOutput::Text(_) => Err(BackendError::MalformedResponse(
                "expected a render artifact, got text".to_string(),
            )),
        }
    }
}

/// A backend that can run one request against a routed target
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(
        &self,
        target: &Target,
        request: &InvocationRequest,
    ) -> Result<BackendResponse, BackendError>;

    /// Calls the backend and normalizes its answer
    async fn invoke(
        &self,
        target: &Target,
        request: &InvocationRequest,
    ) -> Result<StepOutput, BackendError> {
        self.call(target, request).await?.into_output()
    }
}

/// Dispatches on the target's backend kind over HTTP
pub struct HttpBackend {
    client: reqwest::Client,

    /// Provider name -> API key
    credentials: HashMap<String, String>,

    /// Identifies this coordinator to render daemons
    client_id: String,
}

impl HttpBackend {
    pub fn new(timeout: Duration, credentials: HashMap<String, String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
            client_id: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self, target, request), fields(node = %target.node.id, model = %target.model, capability = %target.capability))]
    async fn call(
        &self,
        target: &Target,
        request: &InvocationRequest,
    ) -> Result<BackendResponse, BackendError> {
        let endpoint = target
            .endpoint()
            .ok_or(BackendError::MissingEndpoint(target.capability))?;
        debug!(endpoint, input_length = request.input.len(), "Invoking backend");

        match (target.capability, &target.node.backend) {
            (Capability::TextGen, BackendKind::Local) => {
                ollama::generate(&self.client, endpoint, &target.model, request).await
            }
            (Capability::TextGen, BackendKind::Cloud { provider }) => {
                let api_key = self
                    .credentials
                    .get(provider)
                    .ok_or_else(|| BackendError::CredentialMissing(provider.clone()))?;
                cloud::chat_completion(&self.client, endpoint, provider, api_key, &target.model, request)
                    .await
            }
            (Capability::Render, BackendKind::Local) => {
                let prompt_id =
                    comfy::submit(&self.client, endpoint, &self.client_id, &target.model, request)
                        .await?;
                Ok(BackendResponse::Queued {
                    node_id: target.node.id.clone(),
                    prompt_id,
                })
            }
            (Capability::Render, BackendKind::Cloud { provider }) => Err(BackendError::Unsupported {
                backend: format!("cloud provider '{}'", provider),
                capability: Capability::Render,
            }),
        }
    }
}

/// Passes successful responses through; turns the rest into
/// `BackendError::Status` carrying a truncated body
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::domain::node::{CapabilityState, Node, NodeOrigin};

    fn cloud_target() -> Target {
        let node = Node::new("cloud:openai", "http://127.0.0.1:9", NodeOrigin::Configured)
            .with_backend(BackendKind::Cloud {
                provider: "openai".to_string(),
            })
            .with_text_gen(CapabilityState::online(
                "http://127.0.0.1:9",
                vec!["gpt-4o-mini".to_string()],
            ));
        Target {
            node,
            capability: Capability::TextGen,
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_request() {
        let backend = HttpBackend::new(Duration::from_secs(1), HashMap::new()).unwrap();
        let err = backend
            .invoke(&cloud_target(), &InvocationRequest::new("", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::CredentialMissing(ref p) if p == "openai"));
        assert_eq!(err.failure_kind(), FailureKind::CredentialMissing);
    }

    #[tokio::test]
    async fn test_cloud_render_is_unsupported() {
        let backend = HttpBackend::new(Duration::from_secs(1), HashMap::new()).unwrap();
        let mut target = cloud_target();
        target.capability = Capability::Render;
        target.node.render = CapabilityState::online("http://127.0.0.1:9", vec!["m".to_string()]);

        let err = backend
            .call(&target, &InvocationRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::CapabilityUnavailable);
    }

    #[test]
    fn test_into_output_strips_thinking() {
        let output = BackendResponse::Generated {
            text: "<think>hmm</think> The end.".to_string(),
        }
        .into_output()
        .unwrap();
        assert_eq!(output, StepOutput::Text("The end.".to_string()));

        let empty = BackendResponse::ChatCompletion {
            text: "<think>only thoughts</think>".to_string(),
            finish_reason: None,
        }
        .into_output();
        assert!(matches!(empty, Err(BackendError::MalformedResponse(_))));
    }

    #[test]
    fn test_queued_becomes_artifact() {
        let output = BackendResponse::Queued {
            node_id: "127.0.0.1".to_string(),
            prompt_id: "abc".to_string(),
        }
        .into_output()
        .unwrap();

        let artifact = output.into_artifact().unwrap();
        assert_eq!(artifact.prompt_id, "abc");
    }
}
