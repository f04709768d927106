//! Cloud providers speaking the chat-completions protocol

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{BackendError, BackendResponse, InvocationRequest, check_status};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,

    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Runs one chat completion with bearer authentication
pub async fn chat_completion(
    client: &reqwest::Client,
    base_url: &str,
    provider: &str,
    api_key: &str,
    model: &str,
    request: &InvocationRequest,
) -> Result<BackendResponse, BackendError> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let mut messages = Vec::with_capacity(2);
    if !request.system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &request.system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.input,
    });

    let body = ChatRequest {
        model,
        messages,
        temperature: request.options.temperature,
        max_tokens: request.options.max_tokens,
    };

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    if matches!(
        response.status(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        tracing::warn!(provider, status = response.status().as_u16(), "Provider rejected credential");
        return Err(BackendError::CredentialInvalid(provider.to_string()));
    }

    let completion: ChatResponse = check_status(response).await?.json().await?;
    let choice = completion.choices.into_iter().next().ok_or_else(|| {
        BackendError::MalformedResponse("completion has no choices".to_string())
    })?;

    Ok(BackendResponse::ChatCompletion {
        text: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}
