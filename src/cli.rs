use crate::config::Config;
use crate::controller::{ControllerEvent, GenerationController, ResultState};
use crate::messages;
use crate::parser::{MediaPayload, Payload};
use crate::service::{GeminiService, GeminiSettings};
use crate::templates::{Inputs, PromptTemplate, TemplateLibrary};
use crate::ui;
use crate::{log_debug, log_error};

use anyhow::{Context, Result, anyhow};
use clap::builder::{Styles, styling::AnsiColor};
use clap::{Parser, Subcommand, crate_version};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const LOG_FILE: &str = "panelgen-debug.log";

/// CLI structure defining the available commands and global arguments
#[derive(Parser)]
#[command(
    author,
    version = crate_version!(),
    about = "panelgen: prompt-templated content generation",
    long_about = "panelgen fills a prompt template from your inputs, sends it to a generative-AI service and renders the streamed or single-shot text, image or audio result.",
    disable_version_flag = true,
    styles = get_styles(),
)]
pub struct Cli {
    /// Subcommands available for the CLI
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log debug messages to a file
    #[arg(
        short = 'l',
        long = "log",
        global = true,
        help = "Log debug messages to a file"
    )]
    pub log: bool,

    /// Specify a custom log file path
    #[arg(
        long = "log-file",
        global = true,
        help = "Specify a custom log file path, or - for stderr"
    )]
    pub log_file: Option<String>,

    /// Suppress non-essential output (spinners, waiting messages, etc.)
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        help = "Suppress non-essential output"
    )]
    pub quiet: bool,

    /// Display the version
    #[arg(
        short = 'v',
        long = "version",
        global = true,
        help = "Display the version"
    )]
    pub version: bool,
}

/// Enumeration of available subcommands
#[derive(Subcommand)]
#[command(subcommand_negates_reqs = true)]
#[command(subcommand_precedence_over_arg = true)]
pub enum Commands {
    /// Run one template and render its result
    #[command(
        about = "Generate content from a template",
        long_about = "Fill a template with --field values, send it to the generation service and render the result. Streaming templates print text as it arrives; media templates write a file."
    )]
    Generate {
        /// Template id, see `list-templates`
        template: String,

        /// Template input as name=value (repeatable)
        #[arg(short = 'f', long = "field", help = "Template input as name=value")]
        fields: Vec<String>,

        /// Where to write media output
        #[arg(short, long, help = "Where to write media output")]
        out: Option<PathBuf>,

        /// Print the final result only, without decoration
        #[arg(short, long, help = "Print the final result only, without decoration")]
        print: bool,
    },

    /// List the available templates
    #[command(about = "List the available templates")]
    ListTemplates,

    /// Show a template and the prompt it would build
    #[command(
        about = "Show a template and the prompt it would build",
        long_about = "Show a template's fields and kind. With --field values, also show the exact prompt that would be sent, without calling the service."
    )]
    ShowTemplate {
        /// Template id
        template: String,

        /// Template input as name=value (repeatable)
        #[arg(short = 'f', long = "field", help = "Template input as name=value")]
        fields: Vec<String>,
    },

    /// Configure panelgen settings
    #[command(
        about = "Configure panelgen settings",
        long_about = "Configure the API key, models, voice and extra generation parameters."
    )]
    Config {
        /// Set the API key
        #[arg(long, help = "Set the API key")]
        api_key: Option<String>,

        /// Set the text model
        #[arg(long, help = "Set the text model")]
        model: Option<String>,

        /// Set the image model
        #[arg(long, help = "Set the image model")]
        image_model: Option<String>,

        /// Set the audio model
        #[arg(long, help = "Set the audio model")]
        audio_model: Option<String>,

        /// Set the default voice for audio templates
        #[arg(long, help = "Set the default voice for audio templates")]
        voice: Option<String>,

        /// Set additional generation parameters
        #[arg(long, help = "Set additional generation parameters (key=value)")]
        param: Option<Vec<String>>,
    },
}

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Magenta.on_default().bold())
        .usage(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Green.on_default().bold())
        .placeholder(AnsiColor::Yellow.on_default())
        .valid(AnsiColor::Blue.on_default().bold())
        .invalid(AnsiColor::Red.on_default().bold())
        .error(AnsiColor::Red.on_default().bold())
}

/// Parse the command-line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Main function to parse arguments and handle the command
pub async fn main() -> Result<()> {
    let cli = parse_args();

    if cli.version {
        ui::print_version(crate_version!());
        return Ok(());
    }

    if cli.log {
        crate::logger::enable_logging();
        match cli.log_file.as_deref().unwrap_or(LOG_FILE) {
            "-" => crate::logger::set_log_to_stderr(true),
            log_file => crate::logger::set_log_file(log_file)?,
        }

        if let Ok(config) = Config::load() {
            crate::logger::set_verbose_logging(config.verbose_logging);
        }
    } else {
        crate::logger::disable_logging();
    }

    if cli.quiet {
        ui::set_quiet_mode(true);
    }

    if let Some(command) = cli.command {
        handle_command(command).await
    } else {
        let _ = Cli::parse_from(["panelgen", "--help"]);
        Ok(())
    }
}

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Generate {
            template,
            fields,
            out,
            print,
        } => handle_generate(&template, &fields, out, print).await,
        Commands::ListTemplates => handle_list_templates(),
        Commands::ShowTemplate { template, fields } => handle_show_template(&template, &fields),
        Commands::Config {
            api_key,
            model,
            image_model,
            audio_model,
            voice,
            param,
        } => {
            log_debug!(
                "Handling 'config' command with model: {:?}, image_model: {:?}, audio_model: {:?}, voice: {:?}, param: {:?}",
                model,
                image_model,
                audio_model,
                voice,
                param
            );
            handle_config(api_key, model, image_model, audio_model, voice, param)
        }
    }
}

/// Parse `name=value` pairs; the value may itself contain `=`
pub fn parse_key_values(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected name=value, got '{pair}'"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(anyhow!("Missing name in '{pair}'"));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_inputs(fields: &[String]) -> Result<Inputs> {
    Ok(parse_key_values(fields)?.into_iter().collect())
}

fn find_template<'a>(library: &'a TemplateLibrary, id: &str) -> Result<&'a PromptTemplate> {
    library.get(id).ok_or_else(|| {
        anyhow!(
            "Unknown template '{id}'. Available: {}",
            library.ids().join(", ")
        )
    })
}

async fn handle_generate(
    template_id: &str,
    fields: &[String],
    out: Option<PathBuf>,
    print_only: bool,
) -> Result<()> {
    let config = Config::load()?;
    let library = config.template_library()?;
    let template = find_template(&library, template_id)?;
    let inputs = parse_inputs(fields)?;

    let settings = GeminiSettings::from_config(&config)?;
    let controller = GenerationController::new(Arc::new(GeminiService::new(settings)));
    let mut events = controller.subscribe();

    let handle = controller.submit(inputs, template)?;
    let request = handle.request();
    log_debug!("Submitted request {} for '{}'", request.id, request.template_id);

    let spinner = if print_only {
        None
    } else if request.kind.is_streaming() {
        ui::print_info(&template.name);
        None
    } else {
        let waiting = messages::get_waiting_message(template.kind);
        let (r, g, b) = waiting.color;
        Some(ui::create_spinner(
            &waiting.text.truecolor(r, g, b).to_string(),
        ))
    };

    let mut streamed = false;
    let mut final_result = None;
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::Started { .. } => {}
            ControllerEvent::Fragment { fragment, .. } => {
                if !print_only {
                    ui::print_fragment(&fragment);
                    streamed = true;
                }
            }
            ControllerEvent::Finished { result, .. } => {
                final_result = Some(result);
                break;
            }
            ControllerEvent::Abandoned { .. } => break,
        }
    }
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    if streamed {
        println!();
    }
    handle.wait().await;

    let result = final_result.ok_or_else(|| anyhow!("Generation was abandoned"))?;
    if result.state == ResultState::Failed {
        let message = result
            .error
            .map_or_else(|| "Generation failed".to_string(), |e| e.message);
        return Err(anyhow!(message));
    }

    match result.payload {
        Some(Payload::Media(media)) => write_media(template_id, &media, out.as_deref())?,
        Some(Payload::Text(_)) if streamed => {}
        Some(payload) => {
            let rendered = ui::format_payload(&payload);
            if print_only {
                println!("{}", rendered.trim_end());
            } else {
                ui::print_bordered_content(rendered.trim_end());
            }
        }
        None => return Err(anyhow!("Generation finished without a result")),
    }
    Ok(())
}

/// Write each media payload to disk, numbering files when there are several
fn write_media(template_id: &str, media: &[MediaPayload], out: Option<&Path>) -> Result<()> {
    for (i, item) in media.iter().enumerate() {
        let path = media_path(template_id, item, out, i, media.len());
        std::fs::write(&path, &item.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        ui::print_success(&format!(
            "Saved {} ({} bytes) to {}",
            item.mime_type,
            item.bytes.len(),
            path.display()
        ));
    }
    Ok(())
}

fn media_path(
    template_id: &str,
    item: &MediaPayload,
    out: Option<&Path>,
    index: usize,
    total: usize,
) -> PathBuf {
    match out {
        Some(path) if total == 1 => path.to_path_buf(),
        Some(path) => {
            let stem = path
                .file_stem()
                .map_or_else(|| template_id.to_string(), |s| s.to_string_lossy().into_owned());
            let ext = path
                .extension()
                .map_or_else(|| item.extension().to_string(), |e| e.to_string_lossy().into_owned());
            path.with_file_name(format!("{stem}-{}.{ext}", index + 1))
        }
        None => PathBuf::from(format!("{template_id}-{}.{}", Uuid::new_v4(), item.extension())),
    }
}

fn handle_list_templates() -> Result<()> {
    let config = Config::load()?;
    let library = config.template_library()?;

    for template in library.list() {
        println!(
            "{:<22} {:<14} {}",
            template.id.green().bold(),
            template.kind.to_string().cyan(),
            template.description
        );
    }
    Ok(())
}

fn handle_show_template(template_id: &str, fields: &[String]) -> Result<()> {
    let config = Config::load()?;
    let library = config.template_library()?;
    let template = find_template(&library, template_id)?;

    println!("{} {}", template.name.bold(), format!("({})", template.id).dimmed());
    if !template.description.is_empty() {
        println!("{}", template.description);
    }
    println!("{} {}", "kind:".cyan(), template.kind);
    println!("{}", "fields:".cyan());
    for field in &template.fields {
        let requirement = if field.required {
            "required".yellow().to_string()
        } else {
            format!("default: {}", field.default.as_deref().unwrap_or(""))
                .dimmed()
                .to_string()
        };
        println!("  {:<14} {} ({requirement})", field.name.green(), field.label);
    }

    if !fields.is_empty() {
        let inputs = parse_inputs(fields)?;
        if let Err(e) = template.validate(&inputs) {
            ui::print_warning(&e.to_string());
        }
        ui::print_bordered_content(&template.build_prompt(&inputs));
    }
    Ok(())
}

fn handle_config(
    api_key: Option<String>,
    model: Option<String>,
    image_model: Option<String>,
    audio_model: Option<String>,
    voice: Option<String>,
    param: Option<Vec<String>>,
) -> Result<()> {
    let mut config = Config::load()?;

    let params = param.as_deref().map(parse_key_values).transpose()?;
    let changes_made = api_key.is_some()
        || model.is_some()
        || image_model.is_some()
        || audio_model.is_some()
        || voice.is_some()
        || params.is_some();

    if changes_made {
        config.update(api_key, model, image_model, audio_model, voice, params);
        config.save()?;
        ui::print_success("Configuration updated successfully.");
    }

    print_configuration(&config);
    Ok(())
}

fn print_configuration(config: &Config) {
    let key_status = match config.effective_api_key() {
        Some(_) if config.api_key.trim().is_empty() => "from environment".green(),
        Some(_) => "configured".green(),
        None => "missing".red(),
    };

    println!("{}", ui::create_gradient_text("panelgen configuration"));
    println!("  {:<16} {}", "API key".cyan(), key_status);
    println!("  {:<16} {}", "Base URL".cyan(), config.base_url);
    println!("  {:<16} {}", "Text model".cyan(), config.text_model);
    println!("  {:<16} {}", "Image model".cyan(), config.image_model);
    println!("  {:<16} {}", "Audio model".cyan(), config.audio_model);
    println!("  {:<16} {}", "Voice".cyan(), config.default_voice);
    println!("  {:<16} {}", "Aspect ratio".cyan(), config.default_aspect_ratio);

    let mut params: Vec<_> = config.additional_params.iter().collect();
    params.sort();
    for (key, value) in params {
        println!("  {:<16} {}", key.yellow(), value);
    }
    if !config.templates.is_empty() {
        println!("  {:<16} {}", "User templates".cyan(), config.templates.len());
    }

    if let Err(e) = config.validate() {
        log_error!("Configuration is incomplete: {e}");
        ui::print_warning(&e.to_string());
    }
}
