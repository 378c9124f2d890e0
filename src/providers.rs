use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{future::Future, pin::Pin};
use thiserror::Error;

use crate::model::{AdCopy, AdInput};
use crate::prompts::{render_user_prompt, response_schema};

pub const GENERIC_FAILURE: &str =
    "Failed to generate ad copy. Please check your API key and try again.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    /// Any failure talking to the text service. Details go to the log only.
    #[error("{}", GENERIC_FAILURE)]
    Service,
    /// A failure that carries its own user-facing message. Only test generators
    /// build it; the Gemini client always reports `Service`.
    #[cfg(test)]
    #[error("{0}")]
    Rejected(String),
}

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<AdCopy, GenerateError>> + Send + 'a>>;

pub trait CopyGenerator: Send + Sync {
    fn generate<'a>(&'a self, input: &'a AdInput) -> GenerateFuture<'a>;
    fn name(&self) -> &'static str;
}

/// Offline generator; derives the copy from the input without any network call.
pub struct MockProvider;

impl CopyGenerator for MockProvider {
    fn generate<'a>(&'a self, input: &'a AdInput) -> GenerateFuture<'a> {
        Box::pin(async move {
            let features: Vec<&str> = input
                .key_features
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            let lead = features.first().copied().unwrap_or("everything you need");
            Ok(AdCopy {
                professional: format!(
                    "{} delivers {} for {}. Built to be relied on.",
                    input.product_name,
                    features.join(", "),
                    input.target_audience
                ),
                casual: format!(
                    "Hey {}! Meet {}: {}. You're going to love it.",
                    input.target_audience, input.product_name, lead
                ),
                urgent: format!(
                    "Don't wait! Get {} today. {} while it lasts!",
                    input.product_name, lead
                ),
            })
        })
    }

    fn name(&self) -> &'static str { "mock" }
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: String, system: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, model, base_url, system }
    }

    fn endpoint(&self) -> anyhow::Result<reqwest::Url> {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        let raw = format!("{}/{}:generateContent", self.base_url.trim_end_matches('/'), model_path);
        reqwest::Url::parse(&raw).context("failed to parse Gemini endpoint URL")
    }

    async fn call(&self, input: &AdInput) -> anyhow::Result<AdCopy> {
        let prompt = render_user_prompt(input);
        let req = GenerateReq {
            system_instruction: Content { role: None, parts: vec![Part { text: &self.system }] },
            contents: vec![Content { role: Some("user"), parts: vec![Part { text: &prompt }] }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };

        // The key travels in a header so it never shows up in a logged URL.
        let resp = self
            .client
            .post(self.endpoint()?)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to reach Gemini")?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to read Gemini response body")?;
        if !status.is_success() {
            return Err(anyhow!("Gemini API error ({}): {}", status, extract_api_error(&body)));
        }

        let parsed: GenerateResp =
            serde_json::from_str(&body).context("failed to parse Gemini response envelope")?;
        let text = parsed.text();
        let text = if text.is_empty() { "{}".to_string() } else { text };
        serde_json::from_str::<AdCopy>(&text)
            .with_context(|| format!("response does not match the ad copy shape: {text}"))
    }
}

impl CopyGenerator for GeminiProvider {
    fn generate<'a>(&'a self, input: &'a AdInput) -> GenerateFuture<'a> {
        Box::pin(async move {
            self.call(input).await.map_err(|e| {
                tracing::error!(provider = "gemini", model = %self.model, error = %format!("{e:#}"), "ad copy generation failed");
                GenerateError::Service
            })
        })
    }

    fn name(&self) -> &'static str { "gemini" }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReq<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> { text: &'a str }

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResp {
    /// Text parts of the first candidate, concatenated.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

fn extract_api_error(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope { error: Option<ApiError> }
    #[derive(Deserialize)]
    struct ApiError { message: Option<String>, status: Option<String>, code: Option<i64> }

    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope { error: Some(err) }) => format!(
            "{} (status={}, code={})",
            err.message.unwrap_or_else(|| "unknown error".to_string()),
            err.status.unwrap_or_else(|| "unknown".to_string()),
            err.code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
        ),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::{HeaderMap, StatusCode}, routing::post, Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        body: Value,
        seen: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn handle(
        State(stub): State<Stub>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let key = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
        stub.seen.lock().await.push((uri.to_string(), key, body));
        (stub.status, Json(stub.body.clone()))
    }

    async fn spawn_stub(status: StatusCode, body: Value) -> (String, Stub) {
        let stub = Stub { status, body, seen: Arc::new(Mutex::new(Vec::new())) };
        let app = Router::new()
            .route("/v1beta/{*rest}", post(handle))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/v1beta"), stub)
    }

    fn candidate(text: &str) -> Value {
        serde_json::json!({ "candidates": [ { "content": { "role": "model", "parts": [ { "text": text } ] } } ] })
    }

    fn provider(base: String, key: &str) -> GeminiProvider {
        GeminiProvider::new(key.into(), "gemini-3-flash-preview".into(), base, "be brief".into())
    }

    fn zenflow() -> AdInput {
        AdInput {
            product_name: "ZenFlow".into(),
            target_audience: "busy professionals".into(),
            key_features: "5-minute sessions\nSleep tracking".into(),
        }
    }

    #[tokio::test]
    async fn decodes_structured_copy_and_sends_schema() {
        let (base, stub) =
            spawn_stub(StatusCode::OK, candidate(r#"{"professional":"P","casual":"C","urgent":"U"}"#)).await;
        let copy = provider(base, "k-123").generate(&zenflow()).await.unwrap();
        assert_eq!(
            copy,
            AdCopy { professional: "P".into(), casual: "C".into(), urgent: "U".into() }
        );

        let seen = stub.seen.lock().await;
        assert_eq!(seen.len(), 1);
        let (uri, key, body) = &seen[0];
        assert_eq!(key.as_deref(), Some("k-123"));
        assert!(!uri.contains("k-123"));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Product Name: ZenFlow"));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"], response_schema());
    }

    #[tokio::test]
    async fn joins_split_text_parts() {
        let body = serde_json::json!({ "candidates": [ { "content": { "parts": [
            { "text": r#"{"professional":"P","# },
            { "text": r#""casual":"C","urgent":"U"}"# }
        ] } } ] });
        let (base, _) = spawn_stub(StatusCode::OK, body).await;
        let copy = provider(base, "k").generate(&zenflow()).await.unwrap();
        assert_eq!(copy.casual, "C");
    }

    #[tokio::test]
    async fn empty_text_fails_required_fields() {
        let (base, _) = spawn_stub(StatusCode::OK, serde_json::json!({ "candidates": [] })).await;
        let err = provider(base, "k").generate(&zenflow()).await.unwrap_err();
        assert_eq!(err, GenerateError::Service);
        assert_eq!(err.to_string(), GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn partial_payload_is_rejected() {
        let (base, _) = spawn_stub(StatusCode::OK, candidate(r#"{"professional":"P"}"#)).await;
        let err = provider(base, "k").generate(&zenflow()).await.unwrap_err();
        assert_eq!(err, GenerateError::Service);
    }

    #[tokio::test]
    async fn auth_failure_collapses_to_generic_message() {
        let body = serde_json::json!({ "error": { "code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT" } });
        let (base, _) = spawn_stub(StatusCode::BAD_REQUEST, body).await;
        let err = provider(base, "").generate(&zenflow()).await.unwrap_err();
        assert_eq!(err.to_string(), GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn unreachable_service_collapses_to_generic_message() {
        let err = provider("http://127.0.0.1:9/v1beta".into(), "k")
            .generate(&zenflow())
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::Service);
    }

    #[tokio::test]
    async fn transport_error_chain_omits_api_key() {
        let err = provider("http://127.0.0.1:9/v1beta".into(), "SECRET-KEY-123")
            .call(&zenflow())
            .await
            .unwrap_err();
        let logged = format!("{err:#}");
        assert!(logged.contains("failed to reach Gemini"), "{logged}");
        assert!(!logged.contains("SECRET-KEY-123"), "{logged}");
    }

    #[test]
    fn endpoint_accepts_prefixed_model_names() {
        let p = GeminiProvider::new("k".into(), "models/gemini-x".into(), "https://h/v1beta/".into(), String::new());
        assert_eq!(p.endpoint().unwrap().as_str(), "https://h/v1beta/models/gemini-x:generateContent");
    }

    #[test]
    fn api_error_detail_is_extracted() {
        let body = r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(extract_api_error(body), "denied (status=PERMISSION_DENIED, code=403)");
        assert_eq!(extract_api_error("plain"), "plain");
    }

    #[tokio::test]
    async fn mock_provider_uses_input() {
        let copy = MockProvider.generate(&zenflow()).await.unwrap();
        assert!(copy.professional.contains("ZenFlow"));
        assert!(copy.professional.contains("5-minute sessions, Sleep tracking"));
        assert!(copy.urgent.contains("5-minute sessions"));
    }
}
