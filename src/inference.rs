//! Client for the hosted vision-language model.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::InferenceSettings;
use crate::error::{AppError, Result};

/// One image plus one prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    /// Base64 PNG without a data-URL prefix.
    pub image_png_base64: String,
    pub prompt: String,
    pub temperature: f32,
    pub disable_thinking: bool,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Returns the model's text output.
    async fn generate(&self, request: &InferenceRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug)]
pub struct GeminiClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(settings: &InferenceSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(AppError::Config(
                "API key is not set, pass --api-key or GEMINI_API_KEY".into(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Network(format!("failed to build HTTP client: {e}")))?;

        debug!(endpoint = %settings.endpoint, model = %settings.model, "inference client ready");

        Ok(Self {
            http_client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    /// Concatenated text parts of the first candidate.
    fn extract_text(body: &str) -> Result<String> {
        let response: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| AppError::ResponseMalformed(format!("response is not JSON: {e}")))?;

        let parts = response
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| AppError::ResponseMalformed("response has no content parts".into()))?;

        let text: Vec<&str> = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();
        if text.is_empty() {
            return Err(AppError::ResponseMalformed("response has no text".into()));
        }
        Ok(text.concat())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: &'static str,
        data: &'a str,
    },
    Text(&'a str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

fn request_body(request: &InferenceRequest) -> GenerateBody<'_> {
    GenerateBody {
        contents: [Content {
            parts: [
                Part::InlineData {
                    mime_type: "image/png",
                    data: &request.image_png_base64,
                },
                Part::Text(&request.prompt),
            ],
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
            thinking_config: request
                .disable_thinking
                .then_some(ThinkingConfig { thinking_budget: 0 }),
        },
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn generate(&self, request: &InferenceRequest) -> Result<String> {
        debug!(
            model = %self.model,
            prompt = %request.prompt,
            temperature = request.temperature,
            "calling inference endpoint"
        );

        let response = self
            .http_client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| AppError::Network(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            warn!(status = %status, "inference endpoint returned an error");
            return Err(AppError::Network(format!(
                "endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        Self::extract_text(&body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
