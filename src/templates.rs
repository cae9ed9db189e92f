//! Prompt templates
//!
//! A template is one panel's worth of configuration: which fields the form
//! collects, how they are interpolated into a prompt, and how the model's
//! output is parsed.

use crate::service::{ModeFlags, OutputModality};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

/// Named form inputs for one submission
pub type Inputs = BTreeMap<String, String>;

/// Input names that feed media mode flags instead of (or as well as) the prompt
pub const ASPECT_RATIO_INPUT: &str = "aspect_ratio";
pub const VOICE_INPUT: &str = "voice";
pub const COUNT_INPUT: &str = "count";

/// Upper bound on outputs per media request
pub const MAX_MEDIA_COUNT: u32 = 4;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Failed to compile placeholder regex")
});

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TemplateKind {
    Text,
    StreamedText,
    Image,
    Audio,
}

impl TemplateKind {
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::StreamedText)
    }

    pub const fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Audio)
    }

    pub const fn modality(self) -> OutputModality {
        match self {
            Self::Text | Self::StreamedText => OutputModality::Text,
            Self::Image => OutputModality::Image,
            Self::Audio => OutputModality::Audio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListDelimiter {
    #[default]
    Newline,
    Comma,
}

impl ListDelimiter {
    pub fn matches(self, c: char) -> bool {
        match self {
            Self::Newline => c == '\n',
            Self::Comma => c == ',' || c == '\n',
        }
    }
}

/// How the raw model output is turned into a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutputFormat {
    List {
        #[serde(default)]
        delimiter: ListDelimiter,
    },
    Hashtags,
    Variants,
    Labeled {
        labels: Vec<String>,
    },
    LongForm,
    Plain,
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Used in the prompt when an optional field is left empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            required: true,
            default: None,
            max_chars: None,
        }
    }

    pub fn optional(name: &str, label: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            required: false,
            default: Some(default.to_string()),
            max_chars: None,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }
}

/// Template-level defaults for media requests
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Rejected inputs; nothing is dispatched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Field '{field}' is longer than {max} characters")]
    TooLong { field: String, max: usize },
}

/// Inconsistent template definitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template id must not be empty")]
    EmptyId,
    #[error("Template '{id}' uses output format {format} which does not fit kind {kind}")]
    FormatMismatch {
        id: String,
        kind: TemplateKind,
        format: String,
    },
    #[error("Template '{id}' declares field '{field}' more than once")]
    DuplicateField { id: String, field: String },
    #[error("Template '{id}' never interpolates field '{field}'")]
    UnusedField { id: String, field: String },
    #[error("Template '{id}' labeled output needs at least one label")]
    NoLabels { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: TemplateKind,
    pub output: OutputFormat,
    /// Fixed instruction placed before the body
    #[serde(default)]
    pub preamble: String,
    /// Body with `{field}` interpolation points
    pub body: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub media: MediaOptions,
}

impl PromptTemplate {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// First problem with the inputs, checking fields in declaration order
    pub fn validate(&self, inputs: &Inputs) -> Result<(), InputError> {
        for field in &self.fields {
            let value = inputs.get(&field.name).map_or("", |v| v.trim());
            if field.required && value.is_empty() {
                return Err(InputError::MissingField(field.name.clone()));
            }
            if let Some(max) = field.max_chars
                && value.chars().count() > max
            {
                return Err(InputError::TooLong {
                    field: field.name.clone(),
                    max,
                });
            }
        }
        Ok(())
    }

    /// Value interpolated for a field: trimmed input, else the field default
    fn value_for<'a>(&'a self, field: &'a FieldSpec, inputs: &'a Inputs) -> &'a str {
        inputs
            .get(&field.name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .or(field.default.as_deref())
            .unwrap_or_default()
    }

    /// Build the prompt: preamble, blank line, interpolated body.
    ///
    /// Placeholders that don't name a declared field are left as written.
    pub fn build_prompt(&self, inputs: &Inputs) -> String {
        let body = PLACEHOLDER.replace_all(&self.body, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match self.field(name) {
                Some(field) => self.value_for(field, inputs).to_string(),
                None => caps[0].to_string(),
            }
        });

        let preamble = self.preamble.trim();
        if preamble.is_empty() {
            body.trim().to_string()
        } else {
            format!("{preamble}\n\n{}", body.trim())
        }
    }

    /// Mode flags for the service call; media inputs override template defaults
    pub fn mode_flags(&self, inputs: &Inputs) -> ModeFlags {
        let input = |name: &str| {
            inputs
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match self.kind {
            TemplateKind::Text | TemplateKind::StreamedText => ModeFlags::text(),
            TemplateKind::Image => {
                let count = input(COUNT_INPUT)
                    .and_then(|c| c.parse::<u32>().ok())
                    .or(self.media.count)
                    .map(|c| c.clamp(1, MAX_MEDIA_COUNT));
                ModeFlags::image(
                    input(ASPECT_RATIO_INPUT).or_else(|| self.media.aspect_ratio.clone()),
                    count,
                )
            }
            TemplateKind::Audio => {
                ModeFlags::audio(input(VOICE_INPUT).or_else(|| self.media.voice.clone()))
            }
        }
    }

    /// Structural checks, applied to user-defined templates on load
    pub fn check(&self) -> Result<(), TemplateError> {
        if self.id.trim().is_empty() {
            return Err(TemplateError::EmptyId);
        }

        let fits = match (&self.output, self.kind) {
            (OutputFormat::Media, kind) => kind.is_media(),
            (_, kind) => !kind.is_media(),
        };
        if !fits {
            return Err(TemplateError::FormatMismatch {
                id: self.id.clone(),
                kind: self.kind,
                format: format!("{:?}", self.output),
            });
        }

        if let OutputFormat::Labeled { labels } = &self.output
            && labels.iter().all(|l| l.trim().is_empty())
        {
            return Err(TemplateError::NoLabels {
                id: self.id.clone(),
            });
        }

        let placeholders: HashSet<&str> = PLACEHOLDER
            .captures_iter(&self.body)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(TemplateError::DuplicateField {
                    id: self.id.clone(),
                    field: field.name.clone(),
                });
            }
            let media_only = self.kind.is_media()
                && [ASPECT_RATIO_INPUT, VOICE_INPUT, COUNT_INPUT].contains(&field.name.as_str());
            if !media_only && !placeholders.contains(field.name.as_str()) {
                return Err(TemplateError::UnusedField {
                    id: self.id.clone(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Built-in panels plus any user-defined templates
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, PromptTemplate>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLibrary {
    pub fn new() -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Self { templates }
    }

    /// Built-ins overlaid with user templates; a user template replaces a built-in with the same id
    pub fn with_user_templates(user: &[PromptTemplate]) -> Result<Self, TemplateError> {
        let mut library = Self::new();
        for template in user {
            library.insert(template.clone())?;
        }
        Ok(library)
    }

    pub fn insert(&mut self, template: PromptTemplate) -> Result<(), TemplateError> {
        template.check()?;
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    /// Templates sorted by id
    pub fn list(&self) -> Vec<&PromptTemplate> {
        self.templates.values().collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

#[allow(clippy::too_many_lines)]
fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            id: "blog-ideas".to_string(),
            name: "Blog Post Ideas".to_string(),
            description: "A list of blog post ideas for a topic".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::List {
                delimiter: ListDelimiter::Newline,
            },
            preamble: "You are a creative content strategist.".to_string(),
            body: "Generate {count} blog post ideas about {topic} for {audience}. \
                   Return one idea per line with no numbering and no extra commentary."
                .to_string(),
            fields: vec![
                FieldSpec::required("topic", "Topic").with_max_chars(200),
                FieldSpec::optional("audience", "Audience", "a general audience"),
                FieldSpec::optional("count", "Number of ideas", "10"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "keywords".to_string(),
            name: "SEO Keywords".to_string(),
            description: "Search keywords for a topic".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::List {
                delimiter: ListDelimiter::Comma,
            },
            preamble: "You are an SEO specialist.".to_string(),
            body: "List 15 search keywords for: {topic}. \
                   Return them on a single line separated by commas."
                .to_string(),
            fields: vec![FieldSpec::required("topic", "Topic").with_max_chars(200)],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "hashtags".to_string(),
            name: "Hashtag Generator".to_string(),
            description: "Hashtags for a social media post".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::Hashtags,
            preamble: "You are a social media manager.".to_string(),
            body: "Suggest 12 relevant {platform} hashtags for a post about {topic}. \
                   Return only the hashtags separated by spaces."
                .to_string(),
            fields: vec![
                FieldSpec::required("topic", "Post topic").with_max_chars(300),
                FieldSpec::optional("platform", "Platform", "Instagram"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "social-posts".to_string(),
            name: "Social Post Variants".to_string(),
            description: "Several alternative social media posts".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::Variants,
            preamble: "You are a social media copywriter.".to_string(),
            body: "Write 3 distinct {platform} posts about {topic} in a {tone} tone. \
                   Separate the posts with a line containing only ---."
                .to_string(),
            fields: vec![
                FieldSpec::required("topic", "Topic").with_max_chars(300),
                FieldSpec::optional("platform", "Platform", "Twitter"),
                FieldSpec::optional("tone", "Tone", "friendly"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "sentiment".to_string(),
            name: "Sentiment Analysis".to_string(),
            description: "Sentiment, confidence and explanation for a text".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::Labeled {
                labels: vec![
                    "Sentiment".to_string(),
                    "Confidence".to_string(),
                    "Explanation".to_string(),
                ],
            },
            preamble: "You are a careful text analyst.".to_string(),
            body: "Analyze the sentiment of the text below. Respond exactly in this format:\n\
                   Sentiment: <Positive, Negative, Neutral or Mixed>\n\
                   Confidence: <0-100>%\n\
                   Explanation: <one short paragraph>\n\n\
                   Text:\n{text}"
                .to_string(),
            fields: vec![FieldSpec::required("text", "Text to analyze").with_max_chars(2000)],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "tone".to_string(),
            name: "Tone Check".to_string(),
            description: "Tone and formality of a draft, with suggestions".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::Labeled {
                labels: vec![
                    "Tone".to_string(),
                    "Formality".to_string(),
                    "Suggestions".to_string(),
                ],
            },
            preamble: "You are an experienced editor.".to_string(),
            body: "Assess the draft below for a {audience} audience. Respond exactly in this format:\n\
                   Tone: <a few words>\n\
                   Formality: <Casual, Neutral or Formal>\n\
                   Suggestions: <short suggestions>\n\n\
                   Draft:\n{draft}"
                .to_string(),
            fields: vec![
                FieldSpec::required("draft", "Draft").with_max_chars(4000),
                FieldSpec::optional("audience", "Audience", "general"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "product-description".to_string(),
            name: "Product Description".to_string(),
            description: "A short product description".to_string(),
            kind: TemplateKind::Text,
            output: OutputFormat::Plain,
            preamble: "You are an e-commerce copywriter.".to_string(),
            body: "Write a compelling product description of about 80 words for {product}, \
                   highlighting {features}. Return only the description."
                .to_string(),
            fields: vec![
                FieldSpec::required("product", "Product").with_max_chars(200),
                FieldSpec::optional("features", "Key features", "its key features"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "story".to_string(),
            name: "Short Story".to_string(),
            description: "A streamed short story from a premise".to_string(),
            kind: TemplateKind::StreamedText,
            output: OutputFormat::LongForm,
            preamble: "You are a gifted fiction writer.".to_string(),
            body: "Write a {length} {genre} story based on this premise: {premise}".to_string(),
            fields: vec![
                FieldSpec::required("premise", "Premise").with_max_chars(500),
                FieldSpec::optional("genre", "Genre", "fantasy"),
                FieldSpec::optional("length", "Length", "short"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "article".to_string(),
            name: "Article".to_string(),
            description: "A streamed article on a topic".to_string(),
            kind: TemplateKind::StreamedText,
            output: OutputFormat::LongForm,
            preamble: "You are a professional writer.".to_string(),
            body: "Write a well-structured {style} article about {topic}. \
                   Use short paragraphs and descriptive headings."
                .to_string(),
            fields: vec![
                FieldSpec::required("topic", "Topic").with_max_chars(300),
                FieldSpec::optional("style", "Style", "informative"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "lyrics".to_string(),
            name: "Song Lyrics".to_string(),
            description: "Streamed song lyrics".to_string(),
            kind: TemplateKind::StreamedText,
            output: OutputFormat::LongForm,
            preamble: "You are a songwriter.".to_string(),
            body: "Write {mood} {genre} song lyrics about {theme}, \
                   with verses, a chorus and a bridge."
                .to_string(),
            fields: vec![
                FieldSpec::required("theme", "Theme").with_max_chars(300),
                FieldSpec::optional("genre", "Genre", "pop"),
                FieldSpec::optional("mood", "Mood", "uplifting"),
            ],
            media: MediaOptions::default(),
        },
        PromptTemplate {
            id: "image".to_string(),
            name: "Image".to_string(),
            description: "An image from a description".to_string(),
            kind: TemplateKind::Image,
            output: OutputFormat::Media,
            preamble: String::new(),
            body: "Create a {style} image of: {description}".to_string(),
            fields: vec![
                FieldSpec::required("description", "Description").with_max_chars(1000),
                FieldSpec::optional("style", "Style", "high-quality, detailed"),
                FieldSpec::optional(ASPECT_RATIO_INPUT, "Aspect ratio", "1:1"),
                FieldSpec::optional(COUNT_INPUT, "Number of images", "1"),
            ],
            media: MediaOptions {
                aspect_ratio: Some("1:1".to_string()),
                voice: None,
                count: Some(1),
            },
        },
        PromptTemplate {
            id: "voiceover".to_string(),
            name: "Voice-over".to_string(),
            description: "Spoken audio for a script".to_string(),
            kind: TemplateKind::Audio,
            output: OutputFormat::Media,
            preamble: String::new(),
            body: "Say in a {style} voice: {script}".to_string(),
            fields: vec![
                FieldSpec::required("script", "Script").with_max_chars(3000),
                FieldSpec::optional("style", "Delivery", "warm and clear"),
                FieldSpec::optional(VOICE_INPUT, "Voice", "Kore"),
            ],
            media: MediaOptions {
                aspect_ratio: None,
                voice: Some("Kore".to_string()),
                count: None,
            },
        },
    ]
}
