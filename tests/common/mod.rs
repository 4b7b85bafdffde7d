//! Scripted collaborators for driving a companion session in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use korema::ai::{ChatError, ChatResult, GenerationRequest, SpeechSynthesizer, StreamHandle, TextGenerator, ToolCall};
use korema::audio::{AudioClip, AudioSink};
use korema::{CompanionConfig, CompanionEvent, Persona};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

/// One scripted reply: snapshots published in order, then the outcome.
#[derive(Clone, Debug)]
pub struct Reply {
    snapshots: Vec<String>,
    tool_calls: Vec<ToolCall>,
    error: Option<ChatError>,
}

impl Reply {
    /// Publishes each entry as a full snapshot; the last one is the final text.
    pub fn snapshots(snapshots: &[&str]) -> Self {
        Self {
            snapshots: snapshots.iter().map(|s| s.to_string()).collect(),
            tool_calls: Vec::new(),
            error: None,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::snapshots(&[text])
    }

    pub fn error(message: &str) -> Self {
        Self {
            snapshots: Vec::new(),
            tool_calls: Vec::new(),
            error: Some(ChatError::new(message)),
        }
    }

    /// Publishes `snapshot`, then fails with `message`.
    pub fn fails_after(snapshot: &str, message: &str) -> Self {
        Self {
            snapshots: vec![snapshot.to_string()],
            ..Self::error(message)
        }
    }

    pub fn with_tool_call(mut self, name: &str, args: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCall {
            name: name.to_string(),
            args,
        });
        self
    }
}

/// Text generator that plays back scripted replies and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Each generation waits for one `notify_one` on the returned gate before replying.
    pub fn gated(replies: Vec<Reply>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let generator = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new(replies)
        };
        (generator, gate)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest, mut handle: StreamHandle) -> ChatResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text("Okay. [EMOTION:neutral]"));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        for call in reply.tool_calls {
            handle.tool_call(call);
        }
        for snapshot in reply.snapshots {
            handle.replace(snapshot);
        }
        match reply.error {
            Some(err) => Err(err),
            None => Ok(handle.into_text()),
        }
    }
}

/// Returns a silent clip of fixed length for every utterance, or nothing.
pub struct FixedSpeech {
    clip: Option<AudioClip>,
    spoken: Mutex<Vec<(String, Persona)>>,
}

impl FixedSpeech {
    pub fn lasting(duration: Duration) -> Self {
        let rate = 1_000;
        let samples = (duration.as_millis() as usize) * rate as usize / 1_000;
        Self {
            clip: Some(AudioClip::new(vec![0; samples], rate)),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self {
            clip: None,
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn spoken(&self) -> Vec<(String, Persona)> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FixedSpeech {
    async fn synthesize(&self, text: &str, persona: Persona) -> Option<AudioClip> {
        self.spoken.lock().unwrap().push((text.to_string(), persona));
        self.clip.clone()
    }
}

/// Paces clips like a real device and records what finished playing.
#[derive(Default)]
pub struct RecordingSink {
    started: Mutex<usize>,
    finished: Mutex<usize>,
}

impl RecordingSink {
    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }

    pub fn finished(&self) -> usize {
        *self.finished.lock().unwrap()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: AudioClip) -> korema::Result<()> {
        *self.started.lock().unwrap() += 1;
        tokio::time::sleep(clip.duration()).await;
        *self.finished.lock().unwrap() += 1;
        Ok(())
    }
}

/// Quiet config: no greeting, no voice, no autonomy.
pub fn quiet_config() -> CompanionConfig {
    CompanionConfig {
        voice_enabled: false,
        autonomy_enabled: false,
        greet_on_start: false,
        ..CompanionConfig::default()
    }
}

/// Collects events up to and including the first one matching `done`.
pub async fn collect_until(
    events: &mut broadcast::Receiver<CompanionEvent>,
    done: impl Fn(&CompanionEvent) -> bool,
) -> Vec<CompanionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .expect("timed out waiting for companion event")
            .expect("event channel closed");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

pub fn is_idle(event: &CompanionEvent) -> bool {
    matches!(event, CompanionEvent::StateChanged(korema::TurnState::Idle))
}
