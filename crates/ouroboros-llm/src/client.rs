//! HTTP client for structured (JSON-schema constrained) generation

use crate::config::ClientConfig;
use crate::error::{LlmError, LlmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A single structured generation request
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// The user's instruction (sent as the user turn)
    pub instruction: String,

    /// System context (state, auxiliary material)
    pub system_instruction: String,

    /// Schema the response must satisfy
    pub response_schema: Value,

    /// Optional sampling temperature
    pub temperature: Option<f32>,
}

impl StructuredRequest {
    /// Create a new request
    pub fn new(
        instruction: impl Into<String>,
        system_instruction: impl Into<String>,
        response_schema: Value,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            system_instruction: system_instruction.into(),
            response_schema,
            temperature: None,
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<WireContent<'a>>,
    system_instruction: WireContent<'a>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Client for the hosted reasoning backend
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// Create a new client
    pub fn new(config: ClientConfig) -> LlmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Create a client from environment variables
    pub fn from_env() -> LlmResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run a structured generation and return the parsed JSON document
    pub async fn generate_json(&self, request: &StructuredRequest) -> LlmResult<Value> {
        let url = self
            .config
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.config.model))
            .map_err(|e| LlmError::configuration(format!("invalid model endpoint: {}", e)))?;

        let body = GenerateContentBody {
            contents: vec![WireContent {
                role: Some("user"),
                parts: vec![WirePart {
                    text: &request.instruction,
                }],
            }],
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart {
                    text: &request.system_instruction,
                }],
            },
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.response_schema,
                temperature: request.temperature,
            },
        };

        debug!(
            model = %self.config.model,
            instruction_chars = request.instruction.chars().count(),
            system_chars = request.system_instruction.chars().count(),
            "Calling reasoning backend"
        );

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;

        if !status.is_success() {
            let message = extract_error_message(&raw);
            warn!(status = status.as_u16(), message = %message, "Reasoning backend rejected request");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let decoded: GenerateContentResponse =
            serde_json::from_str(&raw).map_err(|e| LlmError::Decode {
                message: e.to_string(),
            })?;

        let candidate = decoded.candidates.into_iter().next();
        if let Some(reason) = candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
            debug!(finish_reason = %reason, "Reasoning backend finished");
        }

        let text: String = candidate
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        serde_json::from_str(&text).map_err(|e| LlmError::MalformedJson {
            message: e.to_string(),
        })
    }
}

fn extract_error_message(raw: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(raw) {
        Ok(envelope) => {
            let message = envelope.error.message.unwrap_or_default();
            match envelope.error.status {
                Some(status) if !message.contains(&status) => format!("{} ({})", message, status),
                _ => message,
            }
        }
        Err(_) => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Client {
        let config = ClientConfig::new("test-key")
            .unwrap()
            .with_model("test-model")
            .with_base_url(&server.uri())
            .unwrap();
        Client::new(config).unwrap()
    }

    fn request() -> StructuredRequest {
        StructuredRequest::new(
            "hello",
            "you are a test",
            schema::object(vec![("response", schema::string())], &["response"]),
        )
    }

    fn candidate_with_text(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
    }

    #[tokio::test]
    async fn test_generate_json_parses_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" },
                "systemInstruction": { "parts": [{ "text": "you are a test" }] }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(candidate_with_text(r#"{"response":"hi"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let value = client_for(&server).generate_json(&request()).await.unwrap();
        assert_eq!(value["response"], "hi");
    }

    #[tokio::test]
    async fn test_quota_error_keeps_status_in_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "Resource has been exhausted (e.g. check quota).", "status": "RESOURCE_EXHAUSTED" }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_json(&request()).await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        let text = err.to_string();
        assert!(text.contains("429"));
        assert!(text.contains("quota"));
    }

    #[tokio::test]
    async fn test_empty_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_json(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_non_json_text_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(candidate_with_text("not json at all")),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).generate_json(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedJson { .. }));
    }
}
