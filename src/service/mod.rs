//! Generation service boundary
//!
//! The controller only ever talks to a [`GenerationService`]: one call for a
//! single response, one call for an ordered stream of text fragments. Wire
//! format, authentication and transport are owned by the implementation.

pub mod gemini;
pub mod sse;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use gemini::{GeminiService, GeminiSettings};

/// Ordered, finite, non-restartable sequence of text fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>>;

/// Which kind of output a request asks the service for
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputModality {
    #[default]
    Text,
    Image,
    Audio,
}

/// Response-shape options for a non-streaming call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeFlags {
    pub modality: OutputModality,
    /// Aspect ratio for image output, e.g. `16:9`
    pub aspect_ratio: Option<String>,
    /// Prebuilt voice name for audio output
    pub voice: Option<String>,
    /// Number of outputs to request
    pub count: Option<u32>,
}

impl ModeFlags {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn image(aspect_ratio: Option<String>, count: Option<u32>) -> Self {
        Self {
            modality: OutputModality::Image,
            aspect_ratio,
            count,
            ..Self::default()
        }
    }

    pub fn audio(voice: Option<String>) -> Self {
        Self {
            modality: OutputModality::Audio,
            voice,
            ..Self::default()
        }
    }
}

/// Media part returned inline by the service, still base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

/// Single-shot response: concatenated text plus any inline media parts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceResponse {
    pub text: String,
    pub media: Vec<InlineMedia>,
}

impl ServiceResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn from_media(media: Vec<InlineMedia>) -> Self {
        Self {
            text: String::new(),
            media,
        }
    }
}

/// Failures raised by a generation service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode service response: {0}")]
    Decode(String),
    #[error("service returned no usable content: {reason}")]
    EmptyResponse { reason: String },
}

/// Capability boundary consumed by the generation controller
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Issue one request and wait for the complete response
    async fn generate(&self, prompt: &str, flags: &ModeFlags)
    -> Result<ServiceResponse, ServiceError>;

    /// Issue one request and receive its text as ordered fragments
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ServiceError>;
}
