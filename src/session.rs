//! Per-session context: the interaction clock, the voice switch, the persona
//! settings and the draft the user is composing.

use crate::ai::GenerationRequest;
use crate::config::CompanionConfig;
use crate::types::{AiModel, Mood, Persona};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Time of the last user-initiated activity.
#[derive(Clone, Copy, Debug)]
pub struct InteractionClock {
    last: Instant,
}

impl InteractionClock {
    pub fn new() -> Self {
        Self { last: Instant::now() }
    }

    pub fn touch(&mut self) {
        self.last = Instant::now();
    }

    pub fn last_interaction(&self) -> Instant {
        self.last
    }

    pub fn idle_for(&self) -> Duration {
        self.last.elapsed()
    }
}

impl Default for InteractionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Voice output toggle, shared with the playback task so it can be consulted
/// at the moment playback would start.
#[derive(Clone, Debug)]
pub struct VoiceSwitch(Arc<AtomicBool>);

impl VoiceSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SessionContext {
    clock: InteractionClock,
    voice: VoiceSwitch,
    pub persona: Persona,
    pub mood: Mood,
    pub model: AiModel,
    pub code_mode: bool,
    pub strict_code_mode: bool,
    pending_input: String,
    pending_image: Option<String>,
}

impl SessionContext {
    pub fn new(config: &CompanionConfig) -> Self {
        Self {
            clock: InteractionClock::new(),
            voice: VoiceSwitch::new(config.voice_enabled),
            persona: config.persona,
            mood: config.mood,
            model: config.model,
            code_mode: false,
            strict_code_mode: false,
            pending_input: String::new(),
            pending_image: None,
        }
    }

    pub fn clock(&self) -> &InteractionClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut InteractionClock {
        &mut self.clock
    }

    pub fn voice(&self) -> &VoiceSwitch {
        &self.voice
    }

    /// Updates the draft. Typing counts as interaction.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.pending_input = text.into();
        self.clock.touch();
    }

    /// Attaches (or with `None`, detaches) an image as a `data:` URL.
    pub fn attach_image(&mut self, image: Option<String>) {
        self.pending_image = image;
        self.clock.touch();
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn pending_image(&self) -> Option<&str> {
        self.pending_image.as_deref()
    }

    /// Takes the trimmed draft and the image, leaving both empty.
    pub fn take_pending(&mut self) -> (String, Option<String>) {
        let text = std::mem::take(&mut self.pending_input).trim().to_string();
        (text, self.pending_image.take())
    }

    /// Generation request for the current persona settings.
    pub fn request(&self, prompt: impl Into<String>, image: Option<String>) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            image,
            persona: self.persona,
            mood: self.mood,
            model: self.model,
            code_mode: self.code_mode,
            strict_code_mode: self.strict_code_mode,
        }
    }
}
