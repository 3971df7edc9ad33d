//! OpenRouter chat-completions client used as the scene writer.

use crate::{
    error::{Error, Result},
    scene::{SceneBrief, SceneWriter},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 300;
const MIN_SCENE_CHARS: usize = 5;

const SYSTEM_PROMPT: &str = "You are a creative music composition assistant. Your task is to \
generate a single scene-specific prompt that will be combined with a base prompt for music \
generation.

Guidelines for creating the scene prompt:
- Focus on scene-specific elements like mood shifts, tempo changes, instrumentation variations, \
or structural developments
- Make the scene unique and creative while ensuring it flows from the previous scenes
- Use descriptive language that complements the base prompt
- Include specific musical terminology when appropriate
- Keep the scene prompt concise but evocative (1 sentence)
- Ensure smooth transitions between scenes for maximum coherence

Return only the scene-specific prompt as a plain text string (do not include the base prompt).";

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(url: &str, api_key: &str, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| Error::config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl SceneWriter for OpenRouterClient {
    #[instrument(skip(self, brief), fields(model = %self.model, ordinal = brief.ordinal))]
    async fn write_scene(&self, brief: &SceneBrief<'_>) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: user_prompt(brief) },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Connection(format!("scene request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::SceneText(format!("text model returned {status}: {}", detail.trim())));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| Error::SceneText(format!("unreadable completion: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::SceneText("completion had no choices".into()))?;

        let scene = clean_scene(&content)?;
        debug!(scene = %scene, "scene written");
        Ok(scene)
    }
}

pub fn user_prompt(brief: &SceneBrief<'_>) -> String {
    let structure_info = match (brief.structure, brief.section) {
        (Some(structure), Some(section)) => format!(
            " using a {structure} musical structure with {} sections; this scene is the {} ({})",
            brief.total,
            section.name,
            section.description.to_lowercase()
        ),
        _ => format!(" with {} sequential parts", brief.total),
    };

    let mut prompt = format!(
        "Create a scene-specific prompt for section {} of {} that will be combined with this base \
         prompt: \"{}\"{structure_info}\n\nThis is scene {} in the sequence.",
        brief.ordinal, brief.total, brief.base_prompt, brief.ordinal
    );

    if !brief.previous.is_empty() {
        prompt.push_str("\n\nPrevious scenes for continuity:\n");
        for entry in &brief.previous {
            prompt.push_str(&format!("Scene {}: {}\n", entry.ordinal, entry.description));
        }
    }

    prompt.push_str(
        "\n\nThe scene prompt should describe scene-specific elements that complement the base \
         prompt and create a cohesive musical journey.",
    );
    prompt
}

/// Trim whitespace and one layer of surrounding quotes.
pub fn clean_scene(raw: &str) -> Result<String> {
    let mut text = raw.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    if text.chars().count() < MIN_SCENE_CHARS {
        return Err(Error::SceneText(format!("scene description too short: {text:?}")));
    }
    Ok(text.to_string())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: String,
}
