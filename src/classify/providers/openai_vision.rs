//! OpenAI-compatible vision chat-completion provider (`/v1/chat/completions`).
//!
//! One round-trip per call: criteria text plus base64 data-URL slice images
//! go out, a JSON reply comes back and is parsed into channel readings. All
//! wire types are private to this module — callers never see them.
//!
//! Each tier uses its own model and timeout; the two `reqwest` clients are
//! built once at startup and cloned cheaply (`Client` is an `Arc`
//! internally).

use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::classify::{parse_readings, ClassifyError, ClassifyOutput, ClassifyRequest, SliceImage};
use crate::config::ClassifierConfig;
use crate::ledger::{CallUsage, Tier};

// ── Public provider ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiVisionProvider {
    screen_client: Client,
    escalate_client: Client,
    api_base_url: String,
    screen_model: String,
    escalate_model: String,
    api_key: Option<String>,
}

impl OpenAiVisionProvider {
    pub fn new(config: &ClassifierConfig, api_key: Option<String>) -> Result<Self, ClassifyError> {
        let build_client = |timeout_seconds: u64| {
            Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_seconds))
                .build()
                .map_err(|e| ClassifyError::Request(format!("failed to build HTTP client: {e}")))
        };
        Ok(Self {
            screen_client: build_client(config.screen.timeout_seconds)?,
            escalate_client: build_client(config.escalate.timeout_seconds)?,
            api_base_url: config.api_base_url.clone(),
            screen_model: config.screen.model.clone(),
            escalate_model: config.escalate.model.clone(),
            api_key,
        })
    }

    /// Lightweight reachability probe.
    ///
    /// Any HTTP response (including 4xx) means the server is reachable;
    /// only a transport-level failure counts as unreachable. Hard 5-second
    /// timeout regardless of the tier timeouts.
    pub async fn ping(&self) -> Result<(), ClassifyError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| ClassifyError::Request(format!("failed to build ping client: {e}")))?;
        let mut req = client.head(&self.api_base_url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| ClassifyError::Request(format!("unreachable: {e}")))
    }

    pub async fn classify(
        &self,
        tier: Tier,
        request: &ClassifyRequest,
        images: &[SliceImage],
    ) -> Result<ClassifyOutput, ClassifyError> {
        let (client, model) = match tier {
            Tier::Screen => (&self.screen_client, &self.screen_model),
            Tier::Escalate => (&self.escalate_client, &self.escalate_model),
        };

        let mut parts: Vec<ContentPart> = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text { text: request.user.clone() });
        for image in images {
            let encoded = base64::engine::general_purpose::STANDARD.encode(image.bytes.as_ref());
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: format!("data:{};base64,{encoded}", image.mime) },
            });
        }

        let payload = ChatCompletionRequest {
            model: model.clone(),
            messages: vec![
                Message { role: "system", content: MessageContent::Text(request.system.clone()) },
                Message { role: "user", content: MessageContent::Parts(parts) },
            ],
            temperature: 0.0,
        };

        debug!(
            tier = tier.label(),
            model = %payload.model,
            channels = request.channels.len(),
            images = images.len(),
            "sending classification request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(system = %request.system, user = %request.user, "classification prompt");
        }

        let mut req = client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "classification HTTP request failed (transport)");
            ClassifyError::Request(e.to_string())
        })?;
        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize classifier response");
            ClassifyError::Request(format!("failed to parse response body: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClassifyError::Request("empty or missing content in response".into()))?;

        let readings = parse_readings(&text)?;
        debug!(tier = tier.label(), readings = readings.len(), "classification reply parsed");

        let usage = parsed.usage.map(|u| CallUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cached_input_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
        });

        Ok(ClassifyOutput { readings, usage })
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClassifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "classification request returned HTTP error");
    Err(ClassifyError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_parts_serialize_as_data_urls() {
        let part = ContentPart::ImageUrl {
            image_url: ImageUrl { url: "data:image/png;base64,AAAA".into() },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image_url");
        assert!(json["image_url"]["url"].as_str().unwrap().starts_with("data:image/png"));
    }

    #[test]
    fn error_envelope_decodes() {
        let body = r#"{"error": {"message": "rate limited", "code": "429"}}"#;
        let env: ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(env.error.message, "rate limited");
    }
}
