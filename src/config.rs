use crate::log_debug;
use crate::service::gemini::{
    DEFAULT_ASPECT_RATIO, DEFAULT_AUDIO_MODEL, DEFAULT_BASE_URL, DEFAULT_IMAGE_MODEL,
    DEFAULT_TEXT_MODEL, DEFAULT_VOICE,
};
use crate::templates::{PromptTemplate, TemplateLibrary};

use anyhow::{Context, Result, anyhow};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variables checked, in order, when no API key is configured
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Configuration structure for panelgen
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// API key for the generation service; may be left empty in favour of the environment
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_audio_model")]
    pub audio_model: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_aspect_ratio")]
    pub default_aspect_ratio: String,
    /// Additional parameters forwarded into `generationConfig`
    #[serde(default)]
    pub additional_params: HashMap<String, String>,
    /// Whether to enable verbose logging (includes HTTP client internals)
    #[serde(default)]
    pub verbose_logging: bool,
    /// User-defined templates; these replace built-ins with the same id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<PromptTemplate>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}

fn default_audio_model() -> String {
    DEFAULT_AUDIO_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            audio_model: default_audio_model(),
            default_voice: default_voice(),
            default_aspect_ratio: default_aspect_ratio(),
            additional_params: HashMap::new(),
            verbose_logging: false,
            templates: Vec::new(),
        }
    }
}

impl Config {
    /// Load the configuration from the user's config file, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_from(&config_path)?;
        log_debug!("Configuration loaded from {}", config_path.display());
        Ok(config)
    }

    /// Load the configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            anyhow!(
                "Invalid configuration file format: {}. Please check {} for syntax errors.",
                e,
                path.display()
            )
        })?;
        Ok(config)
    }

    /// Save the configuration to the user's config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    /// Save the configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        log_debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let mut path =
            config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
        path.push("panelgen");
        path.push("config.toml");
        Ok(path)
    }

    /// Configured key, else the first non-empty key from the environment
    pub fn effective_api_key(&self) -> Option<String> {
        resolve_api_key(&self.api_key, |name| std::env::var(name).ok())
    }

    /// Check that the configuration can back a generation service
    pub fn validate(&self) -> Result<()> {
        if self.effective_api_key().is_none() {
            return Err(anyhow!(
                "No API key configured. Set {} or run 'panelgen config --api-key <KEY>'",
                API_KEY_ENV_VARS[0]
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url must not be empty"));
        }
        for (name, model) in [
            ("text_model", &self.text_model),
            ("image_model", &self.image_model),
            ("audio_model", &self.audio_model),
        ] {
            if model.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        self.template_library()?;
        Ok(())
    }

    /// Built-in templates overlaid with the user's
    pub fn template_library(&self) -> Result<TemplateLibrary> {
        TemplateLibrary::with_user_templates(&self.templates)
            .context("Invalid user template in configuration")
    }

    /// Update the configuration with new values
    pub fn update(
        &mut self,
        api_key: Option<String>,
        text_model: Option<String>,
        image_model: Option<String>,
        audio_model: Option<String>,
        default_voice: Option<String>,
        additional_params: Option<HashMap<String, String>>,
    ) {
        if let Some(key) = api_key {
            self.api_key = key;
        }
        if let Some(model) = text_model {
            self.text_model = model;
        }
        if let Some(model) = image_model {
            self.image_model = model;
        }
        if let Some(model) = audio_model {
            self.audio_model = model;
        }
        if let Some(voice) = default_voice {
            self.default_voice = voice;
        }
        if let Some(params) = additional_params {
            self.additional_params.extend(params);
        }

        log_debug!(
            "Configuration updated: text_model={} image_model={} audio_model={} voice={}",
            self.text_model,
            self.image_model,
            self.audio_model,
            self.default_voice
        );
    }
}

/// Resolve the API key from the configured value and an environment lookup
pub fn resolve_api_key(
    configured: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let configured = configured.trim();
    if !configured.is_empty() {
        return Some(configured.to_string());
    }
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
