//! Session configuration, read from environment variables.

use crate::ai::RetryPolicy;
use crate::ai::gemini::DEFAULT_BASE_URL;
use crate::error::{CompanionError, Result};
use crate::idle::{DEFAULT_IDLE_THRESHOLD, DEFAULT_POLL_INTERVAL};
use crate::types::{AiModel, Mood, Persona};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CompanionConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub model: AiModel,
    pub persona: Persona,
    pub mood: Mood,
    pub voice_enabled: bool,
    pub autonomy_enabled: bool,
    pub idle_threshold: Duration,
    pub idle_poll_interval: Duration,
    /// Seed the conversation with the persona's greeting.
    pub greet_on_start: bool,
    /// Write spoken replies to WAV files instead of only pacing them.
    pub save_audio: bool,
    pub audio_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            model: AiModel::default(),
            persona: Persona::default(),
            mood: Mood::default(),
            voice_enabled: true,
            autonomy_enabled: true,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            idle_poll_interval: DEFAULT_POLL_INTERVAL,
            greet_on_start: true,
            save_audio: false,
            audio_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl CompanionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.gemini_api_key = get("GEMINI_API_KEY").or_else(|| get("API_KEY"));
        if let Some(url) = get("GEMINI_BASE_URL") {
            config.gemini_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("KOREMA_MODEL") {
            config.model = parse("KOREMA_MODEL", &model)?;
        }
        if let Some(persona) = get("KOREMA_PERSONA") {
            config.persona = parse("KOREMA_PERSONA", &persona)?;
        }
        if let Some(mood) = get("KOREMA_MOOD") {
            config.mood = parse("KOREMA_MOOD", &mood)?;
        }
        if let Some(voice) = get("KOREMA_VOICE") {
            config.voice_enabled = parse_bool(&voice);
        }
        if let Some(autonomy) = get("KOREMA_AUTONOMY") {
            config.autonomy_enabled = parse_bool(&autonomy);
        }
        if let Some(secs) = get("KOREMA_IDLE_THRESHOLD_SECS") {
            config.idle_threshold = parse_secs("KOREMA_IDLE_THRESHOLD_SECS", &secs)?;
        }
        if let Some(secs) = get("KOREMA_IDLE_POLL_SECS") {
            config.idle_poll_interval = parse_secs("KOREMA_IDLE_POLL_SECS", &secs)?;
        }
        if let Some(save) = get("KOREMA_SAVE_AUDIO") {
            config.save_audio = parse_bool(&save);
        }
        if let Some(dir) = get("KOREMA_AUDIO_DIR") {
            config.audio_dir = Some(PathBuf::from(dir));
            config.save_audio = true;
        }

        Ok(config)
    }
}

fn parse<T: FromStr<Err = String>>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|e| CompanionError::Config(format!("{key}: {e}")))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Upper bound for any duration read from the environment: one day.
const MAX_SECS: u64 = 24 * 60 * 60;

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    match value.parse::<u64>() {
        Ok(secs) if (1..=MAX_SECS).contains(&secs) => Ok(Duration::from_secs(secs)),
        _ => Err(CompanionError::Config(format!(
            "{key}: expected between 1 and {MAX_SECS} seconds, got {value:?}"
        ))),
    }
}
