//! Text-generation collaborator backed by the Gemini `generateContent` API.
//!
//! The collaborator is prompt-in, text-out. Two prompts are used: a one-line
//! activity suggestion and a `Title|Body` weather alert.

use async_trait::async_trait;
use nimbus_core::{Classify, FailureClass};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

/// Returned when the service answers without usable text.
pub const FALLBACK_TEXT: &str = "No suggestions available at this time.";

const REQUEST_TIMEOUT_SECS: u64 = 20;
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("No text-generation API key configured")]
    MissingApiKey,

    #[error("Text-generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode text-generation response: {0}")]
    Decode(String),

    #[error("Text-generation request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl Classify for TextGenError {
    fn class(&self) -> FailureClass {
        match self {
            TextGenError::MissingApiKey => FailureClass::Config,
            _ => FailureClass::Collaborator,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send a raw prompt and return the first candidate's text.
    async fn complete(&self, prompt: &str) -> Result<String, TextGenError>;

    /// One-line activity suggestion for a weather summary.
    async fn suggest_activity(&self, weather_summary: &str) -> Result<String, TextGenError> {
        self.complete(&suggestion_prompt(weather_summary)).await
    }

    /// Alert text formatted as `Title|Body`.
    async fn alert_text(&self, event_description: &str) -> Result<String, TextGenError> {
        self.complete(&alert_prompt(event_description)).await
    }
}

pub fn suggestion_prompt(weather_summary: &str) -> String {
    format!(
        r#"You are a weather-based activity recommender. Based on the weather summary below, suggest one perfect activity.

Response rules:
- Respond in ONE short line only.
- Start with an emoji that represents the activity or location, not the weather itself.
- Use expressive phrases like "Great day for...", "Cozy day to...", "Perfect time to...", "Stay in and...".
- Make the activity specific to the time of day (day/night), the location and the weather.
- If it is late at night, suggest resting well to start a fresh day.

Example responses:
📖 Cozy day to curl up with a book by the window.
🚴 Energetic day for biking through the lakeside trail.
🎮 Rainy day to stay in and catch up on gaming.

Weather summary:
{weather_summary}"#
    )
}

pub fn alert_prompt(event_description: &str) -> String {
    format!(
        r#"You write short, friendly push notifications about upcoming weather.

Response rules:
- Respond with ONE line formatted exactly as: Title|Body
- Use exactly one "|" character, between the title and the body.
- Title: at most 6 words, may start with one emoji.
- Body: one sentence with a practical tip (umbrella, jacket, plans indoors).
- No quotes, no markdown, no line breaks.

Example:
☔ Rain Incoming|Showers expected around 5 PM, keep an umbrella handy.

Event:
{event_description}"#
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<PartOut<'a>>,
}

#[derive(Debug, Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Debug, Deserialize)]
struct PartIn {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
            .filter(|t| !t.trim().is_empty())
    }
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        temperature: f64,
        max_output_tokens: u32,
    ) -> Result<Self, TextGenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            temperature,
            max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, prompt), level = "info")]
    async fn complete(&self, prompt: &str) -> Result<String, TextGenError> {
        let api_key = self.api_key.as_deref().ok_or(TextGenError::MissingApiKey)?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![PartOut { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        };

        tracing::debug!("Requesting text generation from {}", self.endpoint());

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("Text generation returned {}: {}", status, text);
            return Err(TextGenError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TextGenError::Decode(e.to_string()))?;

        Ok(parsed
            .first_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| FALLBACK_TEXT.to_string()))
    }
}
