//! Local text daemon (`/api/generate`)

use serde::{Deserialize, Serialize};

use super::{BackendError, BackendResponse, InvocationRequest, check_status};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Runs one non-streaming completion
pub async fn generate(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    request: &InvocationRequest,
) -> Result<BackendResponse, BackendError> {
    let url = format!("{}/api/generate", endpoint.trim_end_matches('/'));
    let body = GenerateRequest {
        model,
        system: &request.system,
        prompt: &request.input,
        stream: false,
        options: GenerateOptions {
            temperature: request.options.temperature,
            num_predict: request.options.max_tokens,
        },
    };

    let response = check_status(client.post(&url).json(&body).send().await?).await?;
    let generated: GenerateResponse = response.json().await?;

    tracing::debug!(
        response_length = generated.response.len(),
        "Received completion"
    );
    Ok(BackendResponse::Generated {
        text: generated.response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_generate_sends_model_system_and_prompt() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "llama3");
                assert_eq!(body["system"], "Write a story.");
                assert_eq!(body["stream"], false);
                Json(json!({ "response": format!("echo: {}", body["prompt"].as_str().unwrap()), "done": true }))
            }),
        );
        let endpoint = serve(app).await;

        let response = generate(
            &reqwest::Client::new(),
            &endpoint,
            "llama3",
            &InvocationRequest::new("Write a story.", "a lighthouse keeper"),
        )
        .await
        .unwrap();

        assert_eq!(
            response,
            BackendResponse::Generated {
                text: "echo: a lighthouse keeper".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_generate_maps_http_errors() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::NOT_FOUND, "model 'llama3' not found") }),
        );
        let endpoint = serve(app).await;

        let err = generate(
            &reqwest::Client::new(),
            &endpoint,
            "llama3",
            &InvocationRequest::new("", "x"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BackendError::Status { status: 404, ref body } if body.contains("not found")));
    }
}
