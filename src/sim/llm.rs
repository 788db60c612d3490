//! Messages-API decision client
//!
//! Sends the agent's situation to a hosted model and parses the JSON object in
//! its text reply into a [`DecisionResponse`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::decision::{DecisionError, DecisionFuture, DecisionProvider, DecisionRequest, DecisionResponse};
use super::state::ActivityKind;

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 512;

/// Decision provider backed by an HTTP model endpoint
#[derive(Clone)]
pub struct LlmDecisionClient {
    client: Client,
    inner: Arc<Settings>,
}

struct Settings {
    api_key: String,
    model: String,
    endpoint: String,
}

impl LlmDecisionClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_endpoint(api_key, model, DEFAULT_ENDPOINT.to_string(), Duration::from_secs(15))
    }

    pub fn with_endpoint(api_key: String, model: String, endpoint: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            inner: Arc::new(Settings {
                api_key,
                model,
                endpoint,
            }),
        }
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    async fn request(client: Client, settings: Arc<Settings>, request: DecisionRequest) -> Result<DecisionResponse, DecisionError> {
        if settings.api_key.is_empty() {
            return Err(DecisionError::Provider("API key not configured".into()));
        }

        let body = MessagesRequest {
            model: settings.model.clone(),
            max_tokens: MAX_TOKENS,
            system: system_prompt(),
            messages: vec![Message {
                role: "user".into(),
                content: user_message(&request)?,
            }],
        };

        debug!(request_id = request.request_id, agent = %request.agent_name, "Sending decision request");

        let response = client
            .post(&settings.endpoint)
            .header("x-api-key", &settings.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout
                } else {
                    DecisionError::Provider(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(request_id = request.request_id, %status, "Decision API error");
            return Err(DecisionError::Provider(format!("API error: {} - {}", status, text)));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::Provider(format!("Failed to parse response: {}", e)))?;

        let text = reply
            .content
            .iter()
            .find_map(|c| match c {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| DecisionError::Provider("No text content in response".into()))?;

        parse_decision(text)
    }
}

impl DecisionProvider for LlmDecisionClient {
    fn decide(&self, request: DecisionRequest) -> DecisionFuture {
        Box::pin(Self::request(self.client.clone(), self.inner.clone(), request))
    }

    fn name(&self) -> &str {
        "llm"
    }
}

fn system_prompt() -> String {
    let activities: Vec<&str> = ActivityKind::ALL.iter().map(|k| k.as_str()).collect();
    format!(
        r#"You decide what a resident of a small town does next.
Pick one activity from: {}.
Sleep happens at home. Eat at the cafe, shop at the market, read at the library,
relax in the park, work at the workshop, socialize on the plaza. Wait needs no place.

Respond with valid JSON only:

{{"activity": "eat", "location": "Cafe", "durationMinutes": 30, "goal": "grab lunch", "plan": ["walk to the cafe", "eat"], "reflection": "optional short thought"}}

durationMinutes must be between 5 and 240."#,
        activities.join(", ")
    )
}

fn user_message(request: &DecisionRequest) -> Result<String, DecisionError> {
    let context = serde_json::to_string_pretty(request)
        .map_err(|e| DecisionError::Provider(format!("Failed to serialize request: {}", e)))?;
    Ok(format!("## Resident\n\n```json\n{}\n```\n\nWhat should {} do next?", context, request.agent_name))
}

/// Pull the first `{` .. last `}` span out of a reply that may be wrapped in prose
pub fn parse_decision(text: &str) -> Result<DecisionResponse, DecisionError> {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    };
    serde_json::from_str(json)
        .map_err(|e| DecisionError::Provider(format!("Failed to parse decision JSON: {} - Raw: {}", e, json)))
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
