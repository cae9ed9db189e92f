use crate::templates::TemplateKind;
use crate::ui::rgb;
use rand::prelude::*;

#[derive(Clone, Debug)]
pub struct ColoredMessage {
    pub text: String,
    pub color: (u8, u8, u8),
}

const fn message(text: &'static str, color: (u8, u8, u8)) -> (&'static str, (u8, u8, u8)) {
    (text, color)
}

static WAITING_MESSAGES: &[(&str, (u8, u8, u8))] = &[
    message("✨ Gathering inspiration...", rgb::ELECTRIC_PURPLE),
    message("🧠 Thinking it through...", rgb::NEON_CYAN),
    message("📝 Drafting a few options...", rgb::CORAL),
    message("🔍 Weighing every word...", rgb::ELECTRIC_YELLOW),
    message("🎯 Sharpening the wording...", rgb::SUCCESS_GREEN),
    message("💡 Turning ideas into sentences...", rgb::NEON_CYAN),
];

static MEDIA_WAITING_MESSAGES: &[(&str, (u8, u8, u8))] = &[
    message("🎨 Mixing the colors...", rgb::CORAL),
    message("🖼️ Framing the picture...", rgb::ELECTRIC_PURPLE),
    message("🎙️ Warming up the voice...", rgb::NEON_CYAN),
    message("🎬 Setting up the scene...", rgb::ELECTRIC_YELLOW),
];

fn pick(messages: &[(&str, (u8, u8, u8))]) -> ColoredMessage {
    let mut rng = rand::rng();
    messages.choose(&mut rng).map_or_else(
        || ColoredMessage {
            text: "Generating...".to_string(),
            color: rgb::NEON_CYAN,
        },
        |(text, color)| ColoredMessage {
            text: (*text).to_string(),
            color: *color,
        },
    )
}

/// Random spinner message suited to the kind of request
pub fn get_waiting_message(kind: TemplateKind) -> ColoredMessage {
    if kind.is_media() {
        pick(MEDIA_WAITING_MESSAGES)
    } else {
        pick(WAITING_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_message_comes_from_matching_pool() {
        let media = get_waiting_message(TemplateKind::Image);
        assert!(MEDIA_WAITING_MESSAGES.iter().any(|(t, _)| *t == media.text));

        let text = get_waiting_message(TemplateKind::Text);
        assert!(WAITING_MESSAGES.iter().any(|(t, _)| *t == text.text));
    }
}
