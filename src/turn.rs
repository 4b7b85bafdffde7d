//! Turn orchestrator: the conversational turn lifecycle as an explicit state machine.
//!
//! `Idle → AwaitingResponse → Speaking → Idle`. `Speaking` is entered only once
//! audio actually starts; while speech is being synthesised the turn still
//! reports `AwaitingResponse`, so a reply that ends up without audio never
//! passes through `Speaking`.
//!
//! The orchestrator is synchronous and owns the conversation store. Side
//! effects (calling the generator, playing speech) are left to the caller,
//! which feeds results back in tagged with the [`TurnId`] they belong to;
//! results for a turn that is no longer current are ignored.

use crate::ai::ChatError;
use crate::emotion::EmotionCollector;
use crate::idle::PROACTIVE_DIRECTIVE;
use crate::session::SessionContext;
use crate::store::ConversationStore;
use crate::types::{Emotion, Message};
use serde::Serialize;
use tracing::{debug, info, warn};

pub type TurnId = u64;

const IMAGE_ONLY_TEXT: &str = "Shared an image.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
    Speaking,
}

/// Where the text of a new turn comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnInput {
    /// The pending draft.
    Draft,
    /// Literal user text, e.g. a voice transcript or a replayed message.
    Text(String),
    /// A system directive; no user message is shown.
    Synthetic(String),
}

impl TurnInput {
    pub fn proactive() -> Self {
        TurnInput::Synthetic(PROACTIVE_DIRECTIVE.to_string())
    }
}

/// A turn that passed the guard. Everything the caller needs to start generation.
#[derive(Clone, Debug)]
pub struct AcceptedTurn {
    pub id: TurnId,
    pub prompt: String,
    pub image: Option<String>,
    pub synthetic: bool,
    pub user_message: Option<Message>,
    pub ai_message: Message,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamCompletion {
    /// Hand the cleaned text to speech playback.
    Speak { text: String },
    /// Turn is over.
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnFailure {
    /// Credential missing or rejected: ask the user to pick one again.
    Credential,
    /// Anything else. No retry, no message.
    Terminal,
}

#[derive(Debug)]
struct OpenTurn {
    id: TurnId,
    message_id: String,
    collector: EmotionCollector,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Awaiting(OpenTurn),
    Voicing { turn: TurnId, playing: bool },
}

#[derive(Debug)]
pub struct TurnOrchestrator {
    phase: Phase,
    emotion: Emotion,
    store: ConversationStore,
    next_turn: TurnId,
}

impl TurnOrchestrator {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            phase: Phase::Idle,
            emotion: Emotion::Neutral,
            store,
            next_turn: 1,
        }
    }

    pub fn state(&self) -> TurnState {
        match self.phase {
            Phase::Idle => TurnState::Idle,
            Phase::Awaiting(_) | Phase::Voicing { playing: false, .. } => TurnState::AwaitingResponse,
            Phase::Voicing { playing: true, .. } => TurnState::Speaking,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Awaiting(open) => Some(open.id),
            Phase::Voicing { turn, .. } => Some(*turn),
        }
    }

    /// Id of the AI message currently receiving streamed text.
    pub fn open_message_id(&self) -> Option<&str> {
        match &self.phase {
            Phase::Awaiting(open) => Some(&open.message_id),
            _ => None,
        }
    }

    /// Starts a turn, or returns `None` if one is already running or there is
    /// nothing to send. The state leaves `Idle` before this returns, so a
    /// second call racing the first is always refused.
    pub fn begin_turn(&mut self, session: &mut SessionContext, input: TurnInput) -> Option<AcceptedTurn> {
        if !self.is_idle() {
            debug!(state = ?self.state(), "turn rejected: another turn is in progress");
            return None;
        }

        let synthetic = matches!(input, TurnInput::Synthetic(_));
        let text = match input {
            TurnInput::Draft => session.pending_input().trim().to_string(),
            TurnInput::Text(text) => text.trim().to_string(),
            TurnInput::Synthetic(directive) => directive,
        };
        if text.is_empty() && session.pending_image().is_none() {
            return None;
        }

        session.clock_mut().touch();
        let (_, image) = session.take_pending();
        let prompt = if text.is_empty() {
            IMAGE_ONLY_TEXT.to_string()
        } else {
            text
        };

        let user_message = if synthetic {
            None
        } else {
            let id = self.store.next_id("u");
            let message = Message::user(id, prompt.clone(), image.clone());
            self.store.push(message.clone());
            Some(message)
        };

        let message_id = self.store.next_id("ai");
        let ai_message = Message::ai(message_id.clone(), "");
        self.store.push(ai_message.clone());

        let id = self.next_turn;
        self.next_turn += 1;
        self.emotion = Emotion::Thinking;
        self.phase = Phase::Awaiting(OpenTurn {
            id,
            message_id,
            collector: EmotionCollector::new(),
        });
        info!(turn = id, synthetic, has_image = image.is_some(), "turn started");

        Some(AcceptedTurn {
            id,
            prompt,
            image,
            synthetic,
            user_message,
            ai_message,
        })
    }

    /// Applies one streamed snapshot to the open AI message.
    pub fn apply_snapshot(&mut self, turn: TurnId, snapshot: &str) -> Option<Message> {
        let Phase::Awaiting(open) = &mut self.phase else {
            return None;
        };
        if open.id != turn {
            return None;
        }
        let collected = open.collector.observe(snapshot);
        if let Some(emotion) = collected.detected {
            self.emotion = emotion;
        }
        let emotion = collected.emotion();
        self.store
            .update(&open.message_id, |message| {
                message.text = collected.text;
                message.emotion = Some(emotion);
            })
            .cloned()
    }

    /// The generator started over: forget the text and tags of the abandoned attempt.
    pub fn restart_stream(&mut self, turn: TurnId) -> Option<Message> {
        let Phase::Awaiting(open) = &mut self.phase else {
            return None;
        };
        if open.id != turn {
            return None;
        }
        open.collector = EmotionCollector::new();
        self.emotion = Emotion::Thinking;
        debug!(turn, "stream restarted");
        self.store
            .update(&open.message_id, |message| {
                message.text.clear();
                message.emotion = None;
            })
            .cloned()
    }

    /// Closes the stream. Returns the final AI message and what to do next.
    pub fn complete_stream(
        &mut self,
        turn: TurnId,
        final_text: &str,
        voice_enabled: bool,
    ) -> Option<(Message, StreamCompletion)> {
        let Phase::Awaiting(open) = &mut self.phase else {
            return None;
        };
        if open.id != turn {
            return None;
        }
        let collected = open.collector.finish(final_text);
        if let Some(emotion) = collected.detected {
            self.emotion = emotion;
        }
        let emotion = collected.emotion();
        let spoken = collected.text.clone();
        let message = self
            .store
            .update(&open.message_id, |message| {
                message.text = collected.text;
                message.emotion = Some(emotion);
            })
            .cloned()?;

        if voice_enabled && !spoken.is_empty() {
            self.phase = Phase::Voicing {
                turn,
                playing: false,
            };
            debug!(turn, "reply complete, handing over to speech");
            Some((message, StreamCompletion::Speak { text: spoken }))
        } else {
            self.phase = Phase::Idle;
            self.emotion = Emotion::Neutral;
            debug!(turn, "reply complete");
            Some((message, StreamCompletion::Done))
        }
    }

    /// Audio for `turn` has started playing.
    pub fn speech_started(&mut self, turn: TurnId) -> bool {
        match &mut self.phase {
            Phase::Voicing { turn: current, playing } if *current == turn => {
                *playing = true;
                true
            }
            _ => false,
        }
    }

    /// Speech for `turn` ended (played out, skipped or failed).
    pub fn speech_finished(&mut self, turn: TurnId) -> bool {
        match self.phase {
            Phase::Voicing { turn: current, .. } if current == turn => {
                self.phase = Phase::Idle;
                self.emotion = Emotion::Neutral;
                true
            }
            _ => false,
        }
    }

    /// Generation for `turn` failed. The placeholder message stays as it is.
    pub fn fail_turn(&mut self, turn: TurnId, err: &ChatError) -> Option<TurnFailure> {
        match &self.phase {
            Phase::Awaiting(open) if open.id == turn => {}
            _ => return None,
        }
        self.phase = Phase::Idle;
        self.emotion = Emotion::Sad;
        if err.is_credential() {
            warn!(turn, error = %err, "generation rejected the credential");
            Some(TurnFailure::Credential)
        } else {
            warn!(turn, error = %err, "generation failed");
            Some(TurnFailure::Terminal)
        }
    }

    /// Abandons speech (voice switched off, user started talking).
    pub fn interrupt_speech(&mut self) -> bool {
        if let Phase::Voicing { turn, .. } = self.phase {
            debug!(turn, "speech interrupted");
            self.phase = Phase::Idle;
            self.emotion = Emotion::Neutral;
            true
        } else {
            false
        }
    }
}
