use panelgen::config::{Config, resolve_api_key};
use panelgen::service::gemini::{DEFAULT_TEXT_MODEL, GeminiSettings};
use panelgen::templates::{
    FieldSpec, MediaOptions, OutputFormat, PromptTemplate, TemplateKind,
};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn custom_keywords() -> PromptTemplate {
    PromptTemplate {
        id: "keywords".to_string(),
        name: "Shop Keywords".to_string(),
        description: "Keywords for a product listing".to_string(),
        kind: TemplateKind::Text,
        output: OutputFormat::List {
            delimiter: panelgen::templates::ListDelimiter::Comma,
        },
        preamble: "You write product listings.".to_string(),
        body: "Keywords for {product}, comma separated.".to_string(),
        fields: vec![FieldSpec::required("product", "Product")],
        media: MediaOptions::default(),
    }
}

#[test]
fn test_config_round_trips_through_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temporary directory");
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config {
        api_key: "secret".to_string(),
        verbose_logging: true,
        templates: vec![custom_keywords()],
        ..Config::default()
    };
    config
        .additional_params
        .insert("temperature".to_string(), "0.4".to_string());

    config.save_to(&path).expect("Failed to save config");
    let loaded = Config::load_from(&path).expect("Failed to load config");

    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_loads_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temporary directory");
    let loaded =
        Config::load_from(&temp_dir.path().join("absent.toml")).expect("Defaults expected");
    assert_eq!(loaded, Config::default());
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temporary directory");
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "api_key = \"abc\"\ndefault_voice = \"Puck\"\n")
        .expect("Failed to write config");

    let loaded = Config::load_from(&path).expect("Failed to load config");
    assert_eq!(loaded.api_key, "abc");
    assert_eq!(loaded.default_voice, "Puck");
    assert_eq!(loaded.text_model, DEFAULT_TEXT_MODEL);
    assert!(loaded.templates.is_empty());
}

#[test]
fn test_invalid_file_reports_location() {
    let temp_dir = TempDir::new().expect("Failed to create temporary directory");
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "api_key = [unterminated").expect("Failed to write config");

    let err = Config::load_from(&path).expect_err("Invalid TOML must fail");
    assert!(err.to_string().contains("Invalid configuration file format"));
}

#[test]
fn test_configured_key_wins_over_environment() {
    let env = HashMap::from([("GEMINI_API_KEY", "from-env")]);
    let lookup = |name: &str| env.get(name).map(|v| (*v).to_string());

    assert_eq!(
        resolve_api_key(" configured ", lookup),
        Some("configured".to_string())
    );
    assert_eq!(resolve_api_key("", lookup), Some("from-env".to_string()));
}

#[test]
fn test_environment_keys_are_checked_in_order() {
    let env = HashMap::from([("GEMINI_API_KEY", "  "), ("GOOGLE_API_KEY", "google")]);
    let lookup = |name: &str| env.get(name).map(|v| (*v).to_string());
    assert_eq!(resolve_api_key("", lookup), Some("google".to_string()));

    assert_eq!(resolve_api_key("   ", |_| None), None);
}

#[test]
fn test_user_template_overrides_builtin() {
    let config = Config {
        templates: vec![custom_keywords()],
        ..Config::default()
    };
    let library = config.template_library().expect("Valid templates");

    let keywords = library.get("keywords").expect("keywords template");
    assert_eq!(keywords.name, "Shop Keywords");
    assert!(library.get("story").is_some());
}

#[test]
fn test_inconsistent_user_template_is_rejected() {
    let mut broken = custom_keywords();
    broken.output = OutputFormat::Media;
    let config = Config {
        api_key: "key".to_string(),
        templates: vec![broken],
        ..Config::default()
    };

    assert!(config.template_library().is_err());
    assert!(config.validate().is_err());
}

#[test]
fn test_update_merges_params() {
    let mut config = Config::default();
    config
        .additional_params
        .insert("topK".to_string(), "40".to_string());

    config.update(
        Some("new-key".to_string()),
        Some("gemini-2.5-pro".to_string()),
        None,
        None,
        Some("Puck".to_string()),
        Some(HashMap::from([("temperature".to_string(), "0.9".to_string())])),
    );

    assert_eq!(config.api_key, "new-key");
    assert_eq!(config.text_model, "gemini-2.5-pro");
    assert_eq!(config.default_voice, "Puck");
    assert_eq!(config.additional_params.len(), 2);
}

#[test]
fn test_settings_built_from_config() {
    let config = Config {
        api_key: "key".to_string(),
        base_url: "http://localhost:8080/v1beta/".to_string(),
        ..Config::default()
    };
    let settings = GeminiSettings::from_config(&config).expect("API key present");
    assert_eq!(settings.api_key, "key");
    assert_eq!(settings.base_url, "http://localhost:8080/v1beta");
    assert_eq!(settings.text_model, DEFAULT_TEXT_MODEL);
}
