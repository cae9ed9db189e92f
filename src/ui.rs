use crate::parser::{LabeledField, Payload};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fmt::Write;
use std::io::Write as _;
use std::time::Duration;

// RGB tuple constants for use with the `colored` crate's `.truecolor()` method
pub mod rgb {
    pub const ELECTRIC_PURPLE: (u8, u8, u8) = (225, 53, 255);
    pub const NEON_CYAN: (u8, u8, u8) = (128, 255, 234);
    pub const CORAL: (u8, u8, u8) = (255, 106, 193);
    pub const ELECTRIC_YELLOW: (u8, u8, u8) = (241, 250, 140);
    pub const SUCCESS_GREEN: (u8, u8, u8) = (80, 250, 123);
    pub const DIM_WHITE: (u8, u8, u8) = (180, 180, 190);
    pub const DIM_SEPARATOR: (u8, u8, u8) = (60, 60, 70);
}

/// Track quiet mode state
static QUIET_MODE: std::sync::LazyLock<Mutex<bool>> =
    std::sync::LazyLock::new(|| Mutex::new(false));

/// Enable or disable quiet mode
pub fn set_quiet_mode(enabled: bool) {
    let mut quiet_mode = QUIET_MODE.lock();
    *quiet_mode = enabled;
}

/// Check if quiet mode is enabled
pub fn is_quiet_mode() -> bool {
    *QUIET_MODE.lock()
}

pub fn create_spinner(message: &str) -> ProgressBar {
    // Don't create a spinner in quiet mode
    if is_quiet_mode() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("✦✧✶✷✸✹✺✻✼✽")
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn print_info(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.cyan().bold());
    }
}

pub fn print_warning(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.yellow().bold());
    }
}

pub fn print_error(message: &str) {
    // Always print errors, even in quiet mode
    eprintln!("{}", message.red().bold());
}

pub fn print_success(message: &str) {
    if !is_quiet_mode() {
        println!("{}", message.green().bold());
    }
}

pub fn print_version(version: &str) {
    if !is_quiet_mode() {
        println!(
            "{} {} {}",
            create_gradient_text("panelgen"),
            "version".cyan(),
            version.green()
        );
    }
}

/// Print content with decorative borders
pub fn print_bordered_content(content: &str) {
    if !is_quiet_mode() {
        let (r, g, b) = rgb::DIM_SEPARATOR;
        println!("{}", "━".repeat(50).truecolor(r, g, b));
        println!("{content}");
        println!("{}", "━".repeat(50).truecolor(r, g, b));
    }
}

/// Write a streamed fragment straight to stdout.
///
/// Generated content is always printed, quiet mode only silences decoration.
pub fn print_fragment(fragment: &str) {
    let mut stdout = std::io::stdout().lock();
    // A closed stdout is not worth failing the generation over
    let _ = stdout.write_all(fragment.as_bytes());
    let _ = stdout.flush();
}

/// Render a text, list or fields payload; media is handled by the caller
pub fn format_payload(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => text.clone(),
        Payload::List(items) => items.iter().enumerate().fold(
            String::new(),
            |mut out, (i, item)| {
                let _ = writeln!(out, "{} {}", format!("{:>2}.", i + 1).cyan(), item);
                out
            },
        ),
        Payload::Fields(fields) => fields.iter().fold(String::new(), |mut out, field| {
            let _ = writeln!(out, "{}", format_field(field));
            out
        }),
        Payload::Media(media) => media.iter().fold(String::new(), |mut out, item| {
            let _ = writeln!(out, "{} ({} bytes)", item.mime_type, item.bytes.len());
            out
        }),
    }
}

fn format_field(field: &LabeledField) -> String {
    match &field.label {
        Some(label) => {
            let (r, g, b) = rgb::ELECTRIC_PURPLE;
            format!("{} {}", format!("{label}:").truecolor(r, g, b).bold(), field.value)
        }
        None => field.value.clone(),
    }
}

/// Create gradient text with Electric Purple -> Neon Cyan
pub fn create_gradient_text(text: &str) -> String {
    let gradient = vec![
        rgb::ELECTRIC_PURPLE,
        (200, 100, 255),
        (180, 150, 250),
        (150, 200, 245),
        rgb::NEON_CYAN,
    ];

    apply_gradient(text, &gradient)
}

fn apply_gradient(text: &str, gradient: &[(u8, u8, u8)]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let chars_len = chars.len();
    let gradient_len = gradient.len();

    let mut result = String::new();

    if chars_len == 0 || gradient_len == 0 {
        return result;
    }

    chars.iter().enumerate().fold(&mut result, |acc, (i, &c)| {
        let index = if chars_len == 1 {
            0
        } else {
            i * (gradient_len - 1) / (chars_len - 1)
        };
        let (r, g, b) = gradient.get(index).copied().unwrap_or(rgb::DIM_WHITE);
        let _ = write!(acc, "{}", c.to_string().truecolor(r, g, b));
        acc
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_payload_is_numbered_in_order() {
        colored::control::set_override(false);
        let rendered = format_payload(&Payload::List(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(rendered, " 1. a\n 2. b\n");
    }

    #[test]
    fn test_unlabeled_field_renders_value_only() {
        colored::control::set_override(false);
        let rendered = format_payload(&Payload::Fields(vec![
            LabeledField::labeled("Tone", "warm"),
            LabeledField::unlabeled("raw text"),
        ]));
        assert_eq!(rendered, "Tone: warm\nraw text\n");
    }

    #[test]
    fn test_gradient_keeps_characters() {
        colored::control::set_override(false);
        assert_eq!(create_gradient_text("panel"), "panel");
        assert_eq!(create_gradient_text(""), "");
    }
}
