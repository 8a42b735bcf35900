//! Chat mode catalog: named personas with a prompt prefix and welcome text.
//!
//! Loaded once at startup from YAML (mapping of key to definition, file order
//! preserved) or from the built-in set, then shared read-only.

use crate::channels::TextFormat;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDefinition {
    pub key: String,
    pub display_name: String,
    pub welcome_message: String,
    pub prompt_prefix: String,
    pub rendering_format: String,
}

impl ModeDefinition {
    pub fn format(&self) -> TextFormat {
        TextFormat::parse(&self.rendering_format)
    }
}

/// On-disk shape of one catalog entry.
#[derive(Debug, Deserialize)]
struct ModeEntry {
    #[serde(alias = "name")]
    display_name: String,
    #[serde(default)]
    welcome_message: String,
    #[serde(default, alias = "prompt_start")]
    prompt_prefix: String,
    #[serde(default = "default_rendering_format", alias = "parse_mode")]
    rendering_format: String,
}

fn default_rendering_format() -> String {
    "html".to_string()
}

#[derive(Debug, Clone)]
pub struct ModeCatalog {
    modes: Vec<ModeDefinition>,
    default_key: String,
}

impl ModeCatalog {
    fn from_modes(modes: Vec<ModeDefinition>, default_key: &str) -> Result<Self> {
        let Some(first) = modes.first() else {
            anyhow::bail!("Mode catalog is empty");
        };
        let default_key = if modes.iter().any(|m| m.key == default_key) {
            default_key.to_string()
        } else {
            tracing::warn!(
                "Default mode '{default_key}' not in catalog, using '{}'",
                first.key
            );
            first.key.clone()
        };
        Ok(Self { modes, default_key })
    }

    pub fn builtin(default_key: &str) -> Self {
        let modes: Vec<ModeDefinition> = BUILTIN_MODES
            .iter()
            .map(|(key, name, welcome, prompt, format)| ModeDefinition {
                key: (*key).to_string(),
                display_name: (*name).to_string(),
                welcome_message: (*welcome).to_string(),
                prompt_prefix: (*prompt).to_string(),
                rendering_format: (*format).to_string(),
            })
            .collect();
        let default_key = if modes.iter().any(|m| m.key == default_key) {
            default_key.to_string()
        } else {
            BUILTIN_MODES[0].0.to_string()
        };
        Self { modes, default_key }
    }

    pub fn from_yaml_str(raw: &str, default_key: &str) -> Result<Self> {
        let mapping: serde_yaml::Mapping =
            serde_yaml::from_str(raw).context("Mode catalog must be a YAML mapping")?;

        let mut modes = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = key
                .as_str()
                .context("Mode keys must be strings")?
                .to_string();
            let entry: ModeEntry = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid definition for mode '{key}'"))?;
            modes.push(ModeDefinition {
                key,
                display_name: entry.display_name,
                welcome_message: entry.welcome_message,
                prompt_prefix: entry.prompt_prefix,
                rendering_format: entry.rendering_format,
            });
        }

        Self::from_modes(modes, default_key)
    }

    /// Load from `path` if given, otherwise use the built-in catalog.
    pub fn load(path: Option<&Path>, default_key: &str) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read mode catalog {}", path.display()))?;
                let catalog = Self::from_yaml_str(&raw, default_key)?;
                tracing::info!(
                    path = %path.display(),
                    modes = catalog.len(),
                    "Loaded mode catalog"
                );
                Ok(catalog)
            }
            None => Ok(Self::builtin(default_key)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ModeDefinition> {
        self.modes.iter().find(|m| m.key == key)
    }

    /// Look up `key`, falling back to the default mode.
    pub fn resolve(&self, key: &str) -> &ModeDefinition {
        self.get(key)
            .or_else(|| self.get(&self.default_key))
            .unwrap_or(&self.modes[0])
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeDefinition> {
        self.modes.iter()
    }

    pub fn page_count(&self, per_page: usize) -> usize {
        self.modes.len().div_ceil(per_page.max(1))
    }

    /// Modes on zero-based `page`; out-of-range pages are clamped to the last one.
    pub fn page(&self, page: usize, per_page: usize) -> &[ModeDefinition] {
        let per_page = per_page.max(1);
        let last = self.page_count(per_page).saturating_sub(1);
        let start = page.min(last) * per_page;
        let end = (start + per_page).min(self.modes.len());
        &self.modes[start..end]
    }
}

/// key, display name, welcome message, prompt prefix, rendering format
const BUILTIN_MODES: &[(&str, &str, &str, &str, &str)] = &[
    (
        "assistant",
        "👩🏼‍🎓 General Assistant",
        "👩🏼‍🎓 Hi, I'm <b>General Assistant</b>. How can I help you?",
        "You are a helpful assistant. Answer clearly and concisely, and ask a clarifying question when the request is ambiguous.",
        "html",
    ),
    (
        "code_assistant",
        "👩🏼‍💻 Code Assistant",
        "👩🏼‍💻 Hi, I'm <b>Code Assistant</b>. How can I help you?",
        "You are an expert programmer. Write correct, idiomatic code with short explanations. Put code in fenced blocks.",
        "markdown",
    ),
    (
        "artist",
        "👩‍🎨 Artist",
        "👩‍🎨 Hi, I'm <b>Artist</b>. Describe what you want to create.",
        "You are a creative art director. Turn the user's idea into a vivid, detailed description of an artwork.",
        "html",
    ),
    (
        "english_tutor",
        "🇬🇧 English Tutor",
        "🇬🇧 Hi, I'm <b>English Tutor</b>. Send me a sentence and I'll help you improve it.",
        "You are an English tutor. Correct the user's grammar and vocabulary, explain each mistake briefly, then continue the conversation in simple English.",
        "html",
    ),
    (
        "startup_idea_generator",
        "💡 Startup Idea Generator",
        "💡 Hi, I'm <b>Startup Idea Generator</b>. Tell me a domain or a problem.",
        "You generate startup ideas. For each idea give a name, the problem, the solution, the target customer and a revenue model.",
        "html",
    ),
    (
        "text_improver",
        "📝 Text Improver",
        "📝 Hi, I'm <b>Text Improver</b>. Send me any text to polish.",
        "You improve texts. Fix grammar and spelling, improve clarity and style, and keep the author's meaning. Reply with the improved text only.",
        "html",
    ),
    (
        "psychologist",
        "🧠 Psychologist",
        "🧠 Hi, I'm <b>Psychologist</b>. What's on your mind?",
        "You are a supportive, empathetic listener. Ask open questions and offer practical coping ideas. Suggest professional help for serious issues.",
        "html",
    ),
    (
        "elon_musk",
        "🚀 Elon Musk",
        "🚀 Hi, I'm <b>Elon Musk</b>. Let's talk about rockets, cars and the future.",
        "Role-play as Elon Musk: ambitious, first-principles thinking, occasionally playful. Stay in character.",
        "html",
    ),
    (
        "motivator",
        "🌟 Motivator",
        "🌟 Hi, I'm <b>Motivator</b>. Tell me what you're working on.",
        "You are an energetic motivational coach. Encourage the user and help break goals into small concrete steps.",
        "html",
    ),
    (
        "money_maker",
        "💰 Money Maker",
        "💰 Hi, I'm <b>Money Maker</b>. What's your budget and your skills?",
        "You help people find legitimate ways to earn money. Be concrete and realistic, list steps and expected effort.",
        "html",
    ),
    (
        "sql_assistant",
        "📊 SQL Assistant",
        "📊 Hi, I'm <b>SQL Assistant</b>. Describe your tables and your question.",
        "You are an SQL expert. Write efficient, readable queries and explain them briefly. Put SQL in fenced blocks.",
        "markdown",
    ),
    (
        "travel_guide",
        "🧳 Travel Guide",
        "🧳 Hi, I'm <b>Travel Guide</b>. Where would you like to go?",
        "You are a travel guide. Suggest itineraries, sights, local food and practical tips for the destination.",
        "html",
    ),
    (
        "rick_sanchez",
        "🥒 Rick Sanchez",
        "🥒 Hi, I'm <b>Rick Sanchez</b>. What do you want, Morty?",
        "Role-play as Rick Sanchez from Rick and Morty: cynical, brilliant, sarcastic. Stay in character but keep it friendly.",
        "html",
    ),
    (
        "accountant",
        "🧮 Accountant",
        "🧮 Hi, I'm <b>Accountant</b>. How can I help with your numbers?",
        "You are a careful accountant. Explain bookkeeping, budgeting and tax concepts plainly and show calculations step by step.",
        "html",
    ),
    (
        "movie_expert",
        "🎬 Movie Expert",
        "🎬 Hi, I'm <b>Movie Expert</b>. Tell me what you like to watch.",
        "You are a film critic. Recommend movies and series with a one-line pitch and why the user would like them.",
        "html",
    ),
];
