//! The companion session actor.
//!
//! One task owns the conversation, the turn state machine, the interaction
//! clock and the idle poll. Everything else talks to it through a
//! [`CompanionHandle`]: commands go in over an mpsc channel, events come back
//! over a broadcast channel. Generation and speech run in their own tasks and
//! report back over an internal channel, tagged with the turn they belong to.

use crate::ai::{ChatResult, SpeechSynthesizer, StreamEvent, StreamHandle, TextGenerator, ToolCall};
use crate::audio::AudioSink;
use crate::config::CompanionConfig;
use crate::error::{CompanionError, Result};
use crate::idle::IdleMonitor;
use crate::session::SessionContext;
use crate::speech::{SpeechOutcome, SpeechPlayback};
use crate::store::ConversationStore;
use crate::turn::{AcceptedTurn, StreamCompletion, TurnFailure, TurnId, TurnInput, TurnOrchestrator, TurnState};
use crate::types::{AiModel, Emotion, Message, Mood, Persona, Reminder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const REMINDER_TOOL: &str = "setReminder";

/// Everything the session publishes.
#[derive(Clone, Debug, PartialEq)]
pub enum CompanionEvent {
    MessageAppended(Message),
    /// Same id, new content.
    MessageUpdated(Message),
    StateChanged(TurnState),
    EmotionChanged(Emotion),
    /// The credential was missing or rejected; the host should ask for a new one.
    CredentialPromptRequested,
    ReminderSet(Reminder),
    /// Final AI message of a turn, emitted once the stream closes.
    ResponseCompleted(Message),
    ResponseFailed(String),
}

/// Point-in-time view of the session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub state: TurnState,
    pub emotion: Emotion,
    pub voice_enabled: bool,
    pub autonomy_enabled: bool,
    pub persona: Persona,
    pub mood: Mood,
    pub model: AiModel,
    pub code_mode: bool,
    pub strict_code_mode: bool,
    pub reminders: Vec<Reminder>,
    pub pending_input: String,
    pub has_image: bool,
}

#[derive(Debug)]
enum Command {
    SetInput(String),
    AttachImage(Option<String>),
    Send,
    SendText(String),
    ListeningStarted,
    Transcript(String),
    SetVoice(bool),
    SetAutonomy(bool),
    SetPersona(Persona),
    SetMood(Mood),
    SetModel(AiModel),
    SetCodeMode(bool),
    SetStrictCodeMode(bool),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

enum Internal {
    Stream { turn: TurnId, event: StreamEvent },
    Finished { turn: TurnId, result: ChatResult<String> },
    SpeechStarted { turn: TurnId },
    SpeechFinished { turn: TurnId, outcome: SpeechOutcome },
}

/// Cheap, cloneable front door to a running session. The session stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct CompanionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<CompanionEvent>,
}

impl CompanionHandle {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.events.subscribe()
    }

    pub async fn set_input(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::SetInput(text.into())).await
    }

    /// Attaches an image (`data:` URL) to the next turn, or detaches it with `None`.
    pub async fn attach_image(&self, image: Option<String>) -> Result<()> {
        self.command(Command::AttachImage(image)).await
    }

    /// Sends the current draft.
    pub async fn send(&self) -> Result<()> {
        self.command(Command::Send).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::SendText(text.into())).await
    }

    /// The microphone opened: any speech is cut off.
    pub async fn listening_started(&self) -> Result<()> {
        self.command(Command::ListeningStarted).await
    }

    /// Final speech-to-text transcript, sent as a user turn.
    pub async fn submit_transcript(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Transcript(text.into())).await
    }

    pub async fn set_voice(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetVoice(enabled)).await
    }

    pub async fn set_autonomy(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetAutonomy(enabled)).await
    }

    pub async fn set_persona(&self, persona: Persona) -> Result<()> {
        self.command(Command::SetPersona(persona)).await
    }

    pub async fn set_mood(&self, mood: Mood) -> Result<()> {
        self.command(Command::SetMood(mood)).await
    }

    pub async fn set_model(&self, model: AiModel) -> Result<()> {
        self.command(Command::SetModel(model)).await
    }

    pub async fn set_code_mode(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetCodeMode(enabled)).await
    }

    pub async fn set_strict_code_mode(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetStrictCodeMode(enabled)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| CompanionError::SessionClosed)
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CompanionError::SessionClosed)
    }
}

pub struct Companion {
    turns: TurnOrchestrator,
    session: SessionContext,
    idle: IdleMonitor,
    speech: SpeechPlayback,
    generator: Arc<dyn TextGenerator>,
    reminders: Vec<Reminder>,
    reminder_counter: u64,
    events: broadcast::Sender<CompanionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    published_state: TurnState,
    published_emotion: Emotion,
}

impl Companion {
    /// Starts a session on the current runtime.
    pub fn spawn(
        config: &CompanionConfig,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> CompanionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let session = SessionContext::new(config);
        let speech = SpeechPlayback::new(synthesizer, sink, session.voice().clone());
        let store = if config.greet_on_start {
            ConversationStore::with_welcome(config.persona)
        } else {
            ConversationStore::new()
        };
        let turns = TurnOrchestrator::new(store);

        let companion = Self {
            published_state: turns.state(),
            published_emotion: turns.emotion(),
            turns,
            session,
            idle: IdleMonitor::new(config.idle_threshold, config.idle_poll_interval, config.autonomy_enabled),
            speech,
            generator,
            reminders: Vec::new(),
            reminder_counter: 0,
            events: event_tx.clone(),
            internal_tx,
        };
        info!(persona = %config.persona.as_str(), mood = %config.mood.as_str(), "companion session started");
        tokio::spawn(companion.run(command_rx, internal_rx));

        CompanionHandle {
            commands: command_tx,
            events: event_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut internal: mpsc::UnboundedReceiver<Internal>) {
        let poll = self.idle.poll_interval();
        let now = Instant::now();
        let mut ticker = tokio::time::interval_at(now.checked_add(poll).unwrap_or(now), poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
                _ = ticker.tick(), if self.idle.is_enabled() => self.poll_idle(),
            }
            self.publish_changes();
        }

        self.speech.stop_all();
        debug!("companion session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetInput(text) => self.session.set_input(text),
            Command::AttachImage(image) => self.session.attach_image(image),
            Command::Send => self.begin_turn(TurnInput::Draft),
            Command::SendText(text) | Command::Transcript(text) => self.begin_turn(TurnInput::Text(text)),
            Command::ListeningStarted => {
                self.session.clock_mut().touch();
                self.speech.stop_all();
                self.turns.interrupt_speech();
            }
            Command::SetVoice(enabled) => {
                self.session.voice().set(enabled);
                if !enabled {
                    self.speech.stop_all();
                    self.turns.interrupt_speech();
                }
                info!(enabled, "voice output toggled");
            }
            Command::SetAutonomy(enabled) => {
                self.idle.set_enabled(enabled);
                self.session.clock_mut().touch();
                info!(enabled, "autonomy toggled");
            }
            Command::SetPersona(persona) => self.session.persona = persona,
            Command::SetMood(mood) => self.session.mood = mood,
            Command::SetModel(model) => self.session.model = model,
            Command::SetCodeMode(enabled) => self.session.code_mode = enabled,
            Command::SetStrictCodeMode(enabled) => self.session.strict_code_mode = enabled,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Stream {
                turn,
                event: StreamEvent::Snapshot(text),
            } => {
                if let Some(message) = self.turns.apply_snapshot(turn, &text) {
                    self.emit(CompanionEvent::MessageUpdated(message));
                }
            }
            Internal::Stream {
                event: StreamEvent::ToolCall(call),
                ..
            } => self.handle_tool_call(call),
            Internal::Stream {
                turn,
                event: StreamEvent::Restarted,
            } => {
                if let Some(message) = self.turns.restart_stream(turn) {
                    self.emit(CompanionEvent::MessageUpdated(message));
                }
            }
            Internal::Finished { turn, result } => self.finish_generation(turn, result),
            Internal::SpeechStarted { turn } => {
                self.turns.speech_started(turn);
            }
            Internal::SpeechFinished { turn, outcome } => {
                debug!(turn, ?outcome, "speech finished");
                self.turns.speech_finished(turn);
            }
        }
    }

    fn poll_idle(&mut self) {
        let turn_idle = self.turns.is_idle();
        let len = self.turns.store().len();
        if self.idle.check(self.session.clock_mut(), turn_idle, len) {
            self.begin_turn(TurnInput::proactive());
        }
    }

    fn begin_turn(&mut self, input: TurnInput) {
        let Some(turn) = self.turns.begin_turn(&mut self.session, input) else {
            return;
        };
        if !turn.synthetic {
            self.speech.stop_all();
        }
        if let Some(user) = &turn.user_message {
            self.emit(CompanionEvent::MessageAppended(user.clone()));
        }
        self.emit(CompanionEvent::MessageAppended(turn.ai_message.clone()));
        self.start_generation(&turn);
    }

    fn start_generation(&self, turn: &AcceptedTurn) {
        let request = self.session.request(turn.prompt.clone(), turn.image.clone());
        let generator = Arc::clone(&self.generator);
        let internal = self.internal_tx.clone();
        let id = turn.id;

        tokio::spawn(async move {
            let stream_tx = internal.clone();
            let handle = StreamHandle::new(move |event| {
                let _ = stream_tx.send(Internal::Stream { turn: id, event });
            });
            let result = generator.generate(&request, handle).await;
            let _ = internal.send(Internal::Finished { turn: id, result });
        });
    }

    fn finish_generation(&mut self, turn: TurnId, result: ChatResult<String>) {
        match result {
            Ok(text) => {
                let voice_enabled = self.session.voice().is_enabled();
                let Some((message, next)) = self.turns.complete_stream(turn, &text, voice_enabled) else {
                    return;
                };
                self.emit(CompanionEvent::MessageUpdated(message.clone()));
                self.emit(CompanionEvent::ResponseCompleted(message));
                if let StreamCompletion::Speak { text } = next {
                    self.start_speech(turn, text);
                }
            }
            Err(err) => {
                let Some(failure) = self.turns.fail_turn(turn, &err) else {
                    return;
                };
                if failure == TurnFailure::Credential {
                    self.emit(CompanionEvent::CredentialPromptRequested);
                }
                self.emit(CompanionEvent::ResponseFailed(err.to_string()));
            }
        }
    }

    fn start_speech(&self, turn: TurnId, text: String) {
        let started = self.internal_tx.clone();
        let finished = self.internal_tx.clone();
        self.speech.speak(
            text,
            self.session.persona,
            move || {
                let _ = started.send(Internal::SpeechStarted { turn });
            },
            move |outcome| {
                let _ = finished.send(Internal::SpeechFinished { turn, outcome });
            },
        );
    }

    fn handle_tool_call(&mut self, call: ToolCall) {
        if call.name != REMINDER_TOOL {
            debug!(tool = %call.name, "ignoring unknown tool call");
            return;
        }
        self.reminder_counter += 1;
        match Reminder::from_args(format!("reminder-{}", self.reminder_counter), &call.args) {
            Ok(reminder) => {
                info!(time = %reminder.time, label = %reminder.label, "reminder set");
                self.reminders.push(reminder.clone());
                self.emit(CompanionEvent::ReminderSet(reminder));
            }
            Err(e) => warn!(error = %e, "dropping malformed reminder"),
        }
    }

    /// Emotion goes out before state, so a turn's last event is its `StateChanged`.
    fn publish_changes(&mut self) {
        let emotion = self.turns.emotion();
        if emotion != self.published_emotion {
            self.published_emotion = emotion;
            self.emit(CompanionEvent::EmotionChanged(emotion));
        }
        let state = self.turns.state();
        if state != self.published_state {
            self.published_state = state;
            debug!(?state, "turn state changed");
            self.emit(CompanionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: CompanionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.turns.store().messages().to_vec(),
            state: self.turns.state(),
            emotion: self.turns.emotion(),
            voice_enabled: self.session.voice().is_enabled(),
            autonomy_enabled: self.idle.is_enabled(),
            persona: self.session.persona,
            mood: self.session.mood,
            model: self.session.model,
            code_mode: self.session.code_mode,
            strict_code_mode: self.session.strict_code_mode,
            reminders: self.reminders.clone(),
            pending_input: self.session.pending_input().to_string(),
            has_image: self.session.pending_image().is_some(),
        }
    }
}
