//! Output parsing for generated content
//!
//! Every parser here is pure and total: malformed model output degrades to a
//! fallback representation instead of failing the request. The one exception
//! is media decoding, where "nothing came back" is a distinct failure.

use crate::service::InlineMedia;
use crate::templates::{ListDelimiter, OutputFormat};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Separator between variants in multi-variant output
pub const VARIANT_SEPARATOR: &str = "---";

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*\u{2022}]|\d{1,3}[.)])(?:\s+|$)").expect("Failed to compile list marker regex")
});

/// One field of a labeled analysis; the fallback field has no label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledField {
    pub label: Option<String>,
    pub value: String,
}

impl LabeledField {
    pub fn labeled(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            value: value.into(),
        }
    }

    pub fn unlabeled(value: impl Into<String>) -> Self {
        Self {
            label: None,
            value: value.into(),
        }
    }
}

/// Decoded media ready to hand to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaPayload {
    /// File extension matching the mime type
    pub fn extension(&self) -> &'static str {
        let essence = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/ogg" => "ogg",
            "audio/l16" | "audio/pcm" => "pcm",
            _ => "bin",
        }
    }

    /// Raw 16-bit PCM is not playable on its own; wrap it in a WAV container
    pub fn into_playable(self) -> Self {
        let Some(sample_rate) = pcm_sample_rate(&self.mime_type) else {
            return self;
        };
        match wrap_pcm_as_wav(&self.bytes, sample_rate, 1) {
            Some(bytes) => Self {
                mime_type: "audio/wav".to_string(),
                bytes,
            },
            None => self,
        }
    }
}

/// Parsed result of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    List(Vec<String>),
    Fields(Vec<LabeledField>),
    Media(Vec<MediaPayload>),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Media decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("no media returned")]
    NoMedia,
    #[error("media payload is not valid base64: {0}")]
    InvalidMedia(String),
}

/// Parse textual output according to the template's output format
pub fn parse_output(format: &OutputFormat, raw: &str) -> Payload {
    match format {
        OutputFormat::List { delimiter } => Payload::List(parse_list(raw, *delimiter)),
        OutputFormat::Hashtags => Payload::List(parse_hashtags(raw)),
        OutputFormat::Variants => Payload::List(parse_variants(raw)),
        OutputFormat::Labeled { labels } => Payload::Fields(parse_labeled(raw, labels)),
        OutputFormat::LongForm => Payload::Text(raw.to_string()),
        OutputFormat::Plain | OutputFormat::Media => Payload::Text(raw.trim().to_string()),
    }
}

/// Split on the delimiter, trim, strip list markers, drop empties; order preserved
pub fn parse_list(raw: &str, delimiter: ListDelimiter) -> Vec<String> {
    raw.split(|c: char| delimiter.matches(c))
        .map(strip_list_marker)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(entry: &str) -> &str {
    let entry = entry.trim();
    match LIST_MARKER.find(entry) {
        Some(marker) => entry[marker.end()..].trim(),
        None => entry,
    }
}

/// Hashtags: any whitespace or comma separates tags; each becomes `#tag`
pub fn parse_hashtags(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_start_matches('#').trim_end_matches(['.', ';']))
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("#{tag}"))
        .collect()
}

/// Split multi-variant output on `---`, trim, drop empties
pub fn parse_variants(raw: &str) -> Vec<String> {
    raw.split(VARIANT_SEPARATOR)
        .map(str::trim)
        .filter(|variant| !variant.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract `Label: value` fields in label order.
///
/// A value runs from its label to the next expected label (so multi-line
/// explanations survive). If any label is missing, the whole raw text becomes
/// a single unlabeled field.
pub fn parse_labeled(raw: &str, labels: &[String]) -> Vec<LabeledField> {
    let fallback = || vec![LabeledField::unlabeled(raw.trim())];

    let mut positions = Vec::with_capacity(labels.len());
    for (index, label) in labels.iter().enumerate() {
        let pattern = format!(
            r"(?mi)^[ \t]*(?:\*\*)?{}(?:\*\*)?[ \t]*:(?:\*\*)?",
            regex::escape(label.trim())
        );
        let Ok(re) = Regex::new(&pattern) else {
            return fallback();
        };
        let Some(found) = re.find(raw) else {
            return fallback();
        };
        positions.push((found.start(), found.end(), index));
    }

    if positions.is_empty() {
        return fallback();
    }

    positions.sort_unstable();
    let mut values = vec![String::new(); labels.len()];
    for (i, &(_, value_start, index)) in positions.iter().enumerate() {
        let value_end = positions.get(i + 1).map_or(raw.len(), |next| next.0);
        let value = raw.get(value_start..value_end).unwrap_or_default().trim();
        if let Some(slot) = values.get_mut(index) {
            *slot = value.to_string();
        }
    }

    labels
        .iter()
        .zip(values)
        .map(|(label, value)| LabeledField::labeled(label.trim(), value))
        .collect()
}

/// Decode inline media parts, failing when nothing usable came back
pub fn decode_media(parts: &[InlineMedia]) -> Result<Vec<MediaPayload>, MediaError> {
    let mut decoded = Vec::new();
    for part in parts {
        let data = part.data.trim();
        if data.is_empty() {
            continue;
        }
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| MediaError::InvalidMedia(e.to_string()))?;
        if !bytes.is_empty() {
            decoded.push(MediaPayload {
                mime_type: part.mime_type.clone(),
                bytes,
            });
        }
    }

    if decoded.is_empty() {
        Err(MediaError::NoMedia)
    } else {
        Ok(decoded)
    }
}

/// Sample rate of a raw PCM mime type such as `audio/L16;codec=pcm;rate=24000`
const DEFAULT_PCM_RATE: u32 = 24_000;
const MAX_PCM_RATE: u32 = 384_000;

/// Sample rate of a raw PCM mime type; out-of-range rates fall back to the default
fn pcm_sample_rate(mime_type: &str) -> Option<u32> {
    let mut params = mime_type.split(';').map(str::trim);
    let essence = params.next()?.to_ascii_lowercase();
    if essence != "audio/l16" && essence != "audio/pcm" {
        return None;
    }
    let rate = params
        .filter_map(|p| p.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|rate| (1..=MAX_PCM_RATE).contains(rate));
    Some(rate.unwrap_or(DEFAULT_PCM_RATE))
}

/// Prefix 16-bit little-endian PCM samples with a RIFF/WAVE header.
///
/// Returns `None` when the header fields cannot represent the format or size.
pub fn wrap_pcm_as_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Option<Vec<u8>> {
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = channels.checked_mul(BITS_PER_SAMPLE / 8)?;
    let byte_rate = sample_rate.checked_mul(u32::from(block_align))?;
    let data_len = u32::try_from(pcm.len()).ok()?;
    let riff_len = data_len.checked_add(36)?;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&riff_len.to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    Some(wav)
}
