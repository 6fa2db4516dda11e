//! Gemini API client
//!
//! Implements `InferenceBackend` over `generateContent` with function calling.
//! Uses a long-lived reqwest::Client for connection pooling. Every failure is
//! classified into an `InferenceError` kind here, so nothing upstream has to
//! guess whether a message means "throttled".

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::inference::{
    ChatMessage, InferenceBackend, InferenceError, InferenceResponse, ToolCall, ToolSpec,
};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled), bound to one model
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            temperature: 0.2,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> GeminiRequest {
        let system_text = messages
            .iter()
            .filter_map(|m| match m {
                ChatMessage::System(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut contents: Vec<Content> = Vec::with_capacity(messages.len());

        for message in messages {
            let (role, part) = match message {
                ChatMessage::System(_) => continue,
                ChatMessage::Human(text) => ("user", vec![Part::text(text)]),
                ChatMessage::Ai { text, tool_calls } => {
                    let mut parts = Vec::with_capacity(tool_calls.len() + 1);
                    if !text.is_empty() {
                        parts.push(Part::text(text));
                    }
                    parts.extend(tool_calls.iter().map(|call| Part {
                        function_call: Some(FunctionCall {
                            id: Some(call.id.clone()),
                            name: call.name.clone(),
                            args: call.args.clone(),
                        }),
                        ..Default::default()
                    }));
                    ("model", parts)
                }
                ChatMessage::Tool {
                    call_id,
                    name,
                    content,
                } => (
                    "user",
                    vec![Part {
                        function_response: Some(FunctionResponse {
                            id: Some(call_id.clone()),
                            name: name.clone(),
                            response: json!({ "content": content }),
                        }),
                        ..Default::default()
                    }],
                ),
            };

            // Adjacent turns of the same role are merged; tool results for one
            // model turn travel together.
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.extend(part),
                _ => contents.push(Content {
                    role: role.to_string(),
                    parts: part,
                }),
            }
        }

        GeminiRequest {
            contents,
            system_instruction: (!system_text.is_empty()).then(|| SystemInstruction {
                parts: vec![Part::text(&system_text)],
            }),
            tools: (!tools.is_empty()).then(|| {
                vec![ToolDeclarations {
                    function_declarations: tools
                        .iter()
                        .map(|t| FunctionDeclaration {
                            name: t.name.to_string(),
                            description: t.description.to_string(),
                            parameters: t.parameters.clone(),
                        })
                        .collect(),
                }]
            }),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
        }
    }
}

#[async_trait]
impl InferenceBackend for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<InferenceResponse, InferenceError> {
        if self.api_key.is_empty() {
            return Err(InferenceError::InvalidRequest(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = self.build_request(messages, tools);

        info!(model = %self.model, tools = tools.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                InferenceError::Unavailable(format!("Gemini request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let classified = classify_failure(status, &body);
            warn!(model = %self.model, %status, kind = ?classified, "Gemini API error response");
            return Err(classified);
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            InferenceError::Unknown(format!("Gemini parse error: {}", e))
        })?;

        let parsed = into_inference_response(gemini_response)?;
        debug!(
            model = %self.model,
            tool_calls = parsed.tool_calls.len(),
            "Gemini response received"
        );
        Ok(parsed)
    }
}

/// Map an HTTP failure onto the closed error set
fn classify_failure(status: StatusCode, body: &str) -> InferenceError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(300).collect::<String>());

    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        InferenceError::RateLimited(detail)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        InferenceError::Unavailable(detail)
    } else if status.is_client_error() {
        InferenceError::InvalidRequest(detail)
    } else {
        InferenceError::Unknown(detail)
    }
}

fn into_inference_response(response: GeminiResponse) -> Result<InferenceResponse, InferenceError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Unknown("No candidates in Gemini response".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(chunk) = part.text {
            text.push_str(&chunk);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                name: call.name,
                args: call.args,
            });
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return Err(InferenceError::Unknown(format!(
            "Empty Gemini response (finish reason: {})",
            candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(InferenceResponse { text, tool_calls })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}
