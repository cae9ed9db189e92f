use super::sse::SseDecoder;
use super::{
    FragmentStream, GenerationService, InlineMedia, ModeFlags, OutputModality, ServiceError,
    ServiceResponse,
};
use crate::config::Config;
use crate::log_debug;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_AUDIO_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Kore";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Everything the Gemini backend needs to issue requests
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub audio_model: String,
    pub default_voice: String,
    pub default_aspect_ratio: String,
    /// Forwarded into `generationConfig`; numeric strings are sent as numbers
    pub additional_params: HashMap<String, String>,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            audio_model: DEFAULT_AUDIO_MODEL.to_string(),
            default_voice: DEFAULT_VOICE.to_string(),
            default_aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            additional_params: HashMap::new(),
        }
    }

    /// Build settings from the loaded configuration, requiring an API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.effective_api_key().ok_or_else(|| {
            anyhow!(
                "No API key configured. Set GEMINI_API_KEY or run 'panelgen config --api-key <KEY>'"
            )
        })?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            audio_model: config.audio_model.clone(),
            default_voice: config.default_voice.clone(),
            default_aspect_ratio: config.default_aspect_ratio.clone(),
            additional_params: config.additional_params.clone(),
        })
    }

    fn model_for(&self, modality: OutputModality) -> &str {
        match modality {
            OutputModality::Text => &self.text_model,
            OutputModality::Image => &self.image_model,
            OutputModality::Audio => &self.audio_model,
        }
    }
}

/// Gemini REST backend
pub struct GeminiService {
    settings: GeminiSettings,
    client: Client,
}

impl GeminiService {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }

    pub fn settings(&self) -> &GeminiSettings {
        &self.settings
    }

    async fn post(&self, url: String, body: &Value) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.settings.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                log_debug!("Failed to read Gemini error body: {e}");
                String::new()
            });
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationService for GeminiService {
    async fn generate(
        &self,
        prompt: &str,
        flags: &ModeFlags,
    ) -> Result<ServiceResponse, ServiceError> {
        let model = self.settings.model_for(flags.modality);
        let url = format!("{}/models/{model}:generateContent", self.settings.base_url);
        let body = request_body(prompt, flags, &self.settings);
        log_debug!("Gemini generateContent: model={model} modality={}", flags.modality);

        let response = self.post(url, &body).await?;
        let text = response.text().await?;
        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))?;

        parsed.into_service_response()
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ServiceError> {
        let model = &self.settings.text_model;
        let url = format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            self.settings.base_url
        );
        let body = request_body(prompt, &ModeFlags::text(), &self.settings);
        log_debug!("Gemini streamGenerateContent: model={model}");

        let response = self.post(url, &body).await?;
        Ok(fragment_stream(Box::pin(response.bytes_stream())))
    }
}

/// Build the `generateContent` request body for a prompt and its mode flags
pub fn request_body(prompt: &str, flags: &ModeFlags, settings: &GeminiSettings) -> Value {
    let mut body = json!({
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": prompt }]
            }
        ],
        "generationConfig": {}
    });

    let config = &mut body["generationConfig"];
    for (key, value) in &settings.additional_params {
        config[key] = value
            .parse::<f64>()
            .map_or_else(|_| json!(value), |number| json!(number));
    }

    match flags.modality {
        OutputModality::Text => {}
        OutputModality::Image => {
            let aspect_ratio = flags
                .aspect_ratio
                .as_deref()
                .unwrap_or(&settings.default_aspect_ratio);
            config["responseModalities"] = json!(["IMAGE"]);
            config["imageConfig"] = json!({ "aspectRatio": aspect_ratio });
            if let Some(count) = flags.count.filter(|&c| c > 1) {
                config["candidateCount"] = json!(count);
            }
        }
        OutputModality::Audio => {
            let voice = flags.voice.as_deref().unwrap_or(&settings.default_voice);
            config["responseModalities"] = json!(["AUDIO"]);
            config["speechConfig"] = json!({
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": voice }
                }
            });
        }
    }

    body
}

struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn an SSE response body into text fragments, one per non-empty event
fn fragment_stream<S, B>(bytes: S) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                match parse_stream_event(&data) {
                    Ok(Some(text)) => return Some((Ok(text), state)),
                    Ok(None) => continue,
                    Err(e) => {
                        state.pending.clear();
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ServiceError::Transport(e)), state));
                }
                None => {
                    state.done = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    }))
}

/// Extract the text carried by one streamed event; `None` for empty events
pub fn parse_stream_event(data: &str) -> Result<Option<String>, ServiceError> {
    if data == "[DONE]" {
        return Ok(None);
    }

    let event: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| ServiceError::Decode(e.to_string()))?;
    let text = event.first_candidate_text();
    Ok(if text.is_empty() { None } else { Some(text) })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
    }

    fn first_candidate_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    /// Collapse the wire response into text plus inline media
    pub fn into_service_response(self) -> Result<ServiceResponse, ServiceError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Err(ServiceError::EmptyResponse { reason });
        }

        if let Some(reason) = self
            .candidates
            .iter()
            .find_map(|c| c.finish_reason.as_deref())
            .filter(|r| matches!(*r, "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST"))
        {
            return Err(ServiceError::EmptyResponse {
                reason: reason.to_string(),
            });
        }

        let media = self
            .parts()
            .filter_map(|p| p.inline_data.as_ref())
            .map(|d| InlineMedia {
                mime_type: d.mime_type.clone(),
                data: d.data.clone(),
            })
            .collect();

        Ok(ServiceResponse {
            text: self.first_candidate_text(),
            media,
        })
    }
}
