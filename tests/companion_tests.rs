//! End-to-end behaviour of a companion session driven by scripted collaborators.

mod common;

use common::{FixedSpeech, RecordingSink, Reply, ScriptedGenerator, collect_until, is_idle, quiet_config};
use korema::ai::{NoSpeech, RetryPolicy, Retrying};
use korema::audio::PacedSink;
use korema::idle::PROACTIVE_DIRECTIVE;
use korema::store::WELCOME_MESSAGE_ID;
use korema::{Companion, CompanionConfig, CompanionEvent, Emotion, Persona, Role, TurnState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn spawn_quiet(generator: Arc<ScriptedGenerator>) -> korema::CompanionHandle {
    Companion::spawn(&quiet_config(), generator, Arc::new(NoSpeech), Arc::new(PacedSink::new()))
}

fn states(events: &[CompanionEvent]) -> Vec<TurnState> {
    events
        .iter()
        .filter_map(|event| match event {
            CompanionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn emotions(events: &[CompanionEvent]) -> Vec<Emotion> {
    events
        .iter()
        .filter_map(|event| match event {
            CompanionEvent::EmotionChanged(emotion) => Some(*emotion),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn rapid_sends_start_a_single_turn() {
    let (generator, gate) = ScriptedGenerator::gated(vec![Reply::text("Hello! [EMOTION:happy]")]);
    let generator = Arc::new(generator);
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    companion.send_text("hello").await.unwrap();

    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::AwaitingResponse);
    assert_eq!(snapshot.messages.len(), 2, "one user message and one placeholder");
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.messages[1].text, "");

    gate.notify_one();
    collect_until(&mut events, is_idle).await;

    assert_eq!(generator.calls(), 1);
    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].text, "Hello!");
}

#[tokio::test(start_paused = true)]
async fn streamed_emotion_tags_drive_the_avatar() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::snapshots(&[
        "Hi [EMOTION:happy]",
        "Hi there [EMOTION:happy]",
    ])]));
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion.set_input("hello").await.unwrap();
    companion.send().await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    let ai_id = seen
        .iter()
        .find_map(|event| match event {
            CompanionEvent::MessageAppended(message) if message.role == Role::Ai => Some(message.id.clone()),
            _ => None,
        })
        .unwrap();
    let updates: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            CompanionEvent::MessageUpdated(message) => Some(message),
            _ => None,
        })
        .collect();
    assert!(updates.iter().all(|message| message.id == ai_id));
    let texts: Vec<_> = updates.iter().map(|message| message.text.as_str()).collect();
    assert_eq!(texts, vec!["Hi", "Hi there", "Hi there"]);
    assert!(updates.iter().all(|message| message.emotion == Some(Emotion::Happy)));

    assert_eq!(emotions(&seen), vec![Emotion::Thinking, Emotion::Happy, Emotion::Neutral]);
    assert_eq!(states(&seen), vec![TurnState::AwaitingResponse, TurnState::Idle]);

    let completed = seen.iter().find_map(|event| match event {
        CompanionEvent::ResponseCompleted(message) => Some(message),
        _ => None,
    });
    assert_eq!(completed.map(|message| message.text.as_str()), Some("Hi there"));
}

#[tokio::test(start_paused = true)]
async fn empty_send_does_nothing() {
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = spawn_quiet(Arc::clone(&generator));

    companion.set_input("   ").await.unwrap();
    companion.send().await.unwrap();

    let snapshot = companion.snapshot().await.unwrap();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn image_only_messages_are_sent_with_the_image() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::text("Nice view [EMOTION:surprised]")]));
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion
        .attach_image(Some("data:image/png;base64,iVBORw0KGgo=".into()))
        .await
        .unwrap();
    assert!(companion.snapshot().await.unwrap().has_image);
    companion.send().await.unwrap();
    collect_until(&mut events, is_idle).await;

    let request = &generator.requests()[0];
    assert_eq!(request.image.as_deref(), Some("data:image/png;base64,iVBORw0KGgo="));
    let snapshot = companion.snapshot().await.unwrap();
    assert!(!snapshot.has_image);
    assert_eq!(snapshot.messages[0].text, "Shared an image.");
    assert_eq!(
        snapshot.messages[0].image_url.as_deref(),
        Some("data:image/png;base64,iVBORw0KGgo=")
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_prompt_once_and_keep_the_placeholder() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::error("Requested entity was not found.")]));
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    let prompts = seen
        .iter()
        .filter(|event| **event == CompanionEvent::CredentialPromptRequested)
        .count();
    assert_eq!(prompts, 1);
    assert!(seen.iter().any(|event| matches!(event, CompanionEvent::ResponseFailed(_))));

    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.emotion, Emotion::Sad);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].text, "");
}

#[tokio::test(start_paused = true)]
async fn other_failures_do_not_prompt_for_credentials() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::error("connection reset by peer")]));
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    assert!(!seen.contains(&CompanionEvent::CredentialPromptRequested));
    assert_eq!(companion.snapshot().await.unwrap().emotion, Emotion::Sad);

    companion.send_text("again").await.unwrap();
    collect_until(&mut events, is_idle).await;
    assert_eq!(generator.calls(), 2, "a failed turn leaves the session usable");
}

#[tokio::test(start_paused = true)]
async fn retried_reply_does_not_inherit_the_failed_attempts_emotion() {
    let generator = ScriptedGenerator::new(vec![
        Reply::fails_after("Grr [EMOTION:angry]", "429 quota exceeded"),
        Reply::text("Okay then."),
    ]);
    let companion = Companion::spawn(
        &quiet_config(),
        Arc::new(Retrying::new(generator, RetryPolicy::default())),
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    assert_eq!(
        emotions(&seen),
        vec![Emotion::Thinking, Emotion::Angry, Emotion::Thinking, Emotion::Neutral]
    );
    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.messages[1].text, "Okay then.");
    assert_eq!(snapshot.messages[1].emotion, Some(Emotion::Neutral));
    assert_eq!(snapshot.emotion, Emotion::Neutral);
}

#[tokio::test(start_paused = true)]
async fn spoken_reply_passes_through_speaking() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::text("Hi [EMOTION:happy]")]));
    let speech = Arc::new(FixedSpeech::lasting(Duration::from_secs(2)));
    let sink = Arc::new(RecordingSink::default());
    let config = CompanionConfig {
        voice_enabled: true,
        ..quiet_config()
    };
    let companion = Companion::spawn(&config, generator, Arc::clone(&speech) as _, Arc::clone(&sink) as _);
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    assert_eq!(
        states(&seen),
        vec![TurnState::AwaitingResponse, TurnState::Speaking, TurnState::Idle]
    );
    assert_eq!(emotions(&seen).last(), Some(&Emotion::Neutral));
    assert_eq!(speech.spoken(), vec![("Hi".to_string(), Persona::Hinata)]);
    assert_eq!(sink.finished(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_audio_skips_speaking() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::text("Hi [EMOTION:happy]")]));
    let speech = Arc::new(FixedSpeech::silent());
    let sink = Arc::new(RecordingSink::default());
    let config = CompanionConfig {
        voice_enabled: true,
        ..quiet_config()
    };
    let companion = Companion::spawn(&config, generator, Arc::clone(&speech) as _, Arc::clone(&sink) as _);
    let mut events = companion.subscribe();

    companion.send_text("hello").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    assert_eq!(states(&seen), vec![TurnState::AwaitingResponse, TurnState::Idle]);
    assert_eq!(emotions(&seen), vec![Emotion::Thinking, Emotion::Happy, Emotion::Neutral]);
    assert_eq!(speech.spoken().len(), 1);
    assert_eq!(sink.started(), 0);
}

#[tokio::test(start_paused = true)]
async fn turning_voice_off_cuts_speech_short() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Reply::text("A long story [EMOTION:caring]")]));
    let speech = Arc::new(FixedSpeech::lasting(Duration::from_secs(60)));
    let sink = Arc::new(RecordingSink::default());
    let config = CompanionConfig {
        voice_enabled: true,
        ..quiet_config()
    };
    let companion = Companion::spawn(&config, generator, speech, Arc::clone(&sink) as _);
    let mut events = companion.subscribe();

    companion.send_text("tell me a story").await.unwrap();
    collect_until(&mut events, |event| {
        *event == CompanionEvent::StateChanged(TurnState::Speaking)
    })
    .await;

    companion.set_voice(false).await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;
    assert_eq!(emotions(&seen), vec![Emotion::Neutral]);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let snapshot = companion.snapshot().await.unwrap();
    assert!(!snapshot.voice_enabled);
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(sink.started(), 1);
    assert_eq!(sink.finished(), 0, "playback was torn down, not awaited");
}

#[tokio::test(start_paused = true)]
async fn listening_interrupts_speech_and_the_transcript_becomes_a_turn() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Reply::text("Let me explain at length [EMOTION:neutral]"),
        Reply::text("Sure! [EMOTION:happy]"),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let config = CompanionConfig {
        voice_enabled: true,
        ..quiet_config()
    };
    let companion = Companion::spawn(
        &config,
        Arc::clone(&generator) as _,
        Arc::new(FixedSpeech::lasting(Duration::from_secs(60))),
        Arc::clone(&sink) as _,
    );
    let mut events = companion.subscribe();

    companion.send_text("explain").await.unwrap();
    collect_until(&mut events, |event| {
        *event == CompanionEvent::StateChanged(TurnState::Speaking)
    })
    .await;

    companion.listening_started().await.unwrap();
    collect_until(&mut events, is_idle).await;
    companion.submit_transcript("  shorter please ").await.unwrap();
    collect_until(&mut events, |event| matches!(event, CompanionEvent::ResponseCompleted(_))).await;

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].prompt, "shorter please");
    assert_eq!(sink.finished(), 0, "the first utterance never finished");
}

#[tokio::test(start_paused = true)]
async fn reminder_tool_calls_are_recorded() {
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Reply::text("Alarm set! [EMOTION:happy]")
            .with_tool_call("setReminder", json!({"time": "7:05", "label": "gym", "type": "alarm"})),
    ]));
    let companion = spawn_quiet(Arc::clone(&generator));
    let mut events = companion.subscribe();

    companion.send_text("wake me up at 7:05 for the gym").await.unwrap();
    let seen = collect_until(&mut events, is_idle).await;

    let reminder = seen
        .iter()
        .find_map(|event| match event {
            CompanionEvent::ReminderSet(reminder) => Some(reminder.clone()),
            _ => None,
        })
        .expect("reminder event");
    assert_eq!(reminder.time, "07:05");
    assert_eq!(reminder.label, "gym");
    assert!(reminder.active);
    assert_eq!(companion.snapshot().await.unwrap().reminders, vec![reminder]);
}

#[tokio::test(start_paused = true)]
async fn persona_changes_apply_to_the_next_turn() {
    let generator = Arc::new(ScriptedGenerator::default());
    let config = CompanionConfig {
        greet_on_start: true,
        ..quiet_config()
    };
    let companion = Companion::spawn(
        &config,
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );
    let mut events = companion.subscribe();

    companion.set_persona(Persona::Kurama).await.unwrap();
    companion.set_mood(korema::Mood::Strict).await.unwrap();
    companion.set_strict_code_mode(true).await.unwrap();
    companion.send_text("review my code").await.unwrap();
    collect_until(&mut events, is_idle).await;

    let request = &generator.requests()[0];
    assert_eq!(request.persona, Persona::Kurama);
    assert_eq!(request.mood, korema::Mood::Strict);
    assert_eq!(request.effective_model(), korema::AiModel::Pro);

    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.messages[0].id, WELCOME_MESSAGE_ID, "conversation is kept");
    assert_eq!(snapshot.messages[0].text, Persona::Hinata.greeting());
}

// Idle monitor

fn autonomous_config(greet: bool) -> CompanionConfig {
    CompanionConfig {
        autonomy_enabled: true,
        greet_on_start: greet,
        ..quiet_config()
    }
}

#[tokio::test(start_paused = true)]
async fn idle_check_in_waits_for_a_conversation() {
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = Companion::spawn(
        &autonomous_config(false),
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );

    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(generator.calls(), 0);
    assert!(companion.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_check_in_fires_once_per_quiet_window() {
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = Companion::spawn(
        &autonomous_config(true),
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );

    tokio::time::sleep(Duration::from_secs(47)).await;
    assert_eq!(generator.calls(), 0, "45s of silence is not enough");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(generator.calls(), 1);
    let request = &generator.requests()[0];
    assert_eq!(request.prompt, PROACTIVE_DIRECTIVE);

    let snapshot = companion.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2, "welcome plus the check-in, no user message");
    assert!(snapshot.messages.iter().all(|message| message.role == Role::Ai));

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(generator.calls(), 1, "the clock restarted when the check-in fired");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(generator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn user_activity_postpones_the_check_in() {
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = Companion::spawn(
        &autonomous_config(true),
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );

    tokio::time::sleep(Duration::from_secs(32)).await;
    companion.set_input("typing...").await.unwrap();
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(generator.calls(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabling_autonomy_stops_check_ins() {
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = Companion::spawn(
        &autonomous_config(true),
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );

    companion.set_autonomy(false).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(generator.calls(), 0);
    assert!(!companion.snapshot().await.unwrap().autonomy_enabled);

    companion.set_autonomy(true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(52)).await;
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn huge_poll_interval_leaves_the_session_running() {
    let config = CompanionConfig {
        idle_poll_interval: Duration::MAX,
        ..autonomous_config(false)
    };
    let generator = Arc::new(ScriptedGenerator::default());
    let companion = Companion::spawn(
        &config,
        Arc::clone(&generator) as _,
        Arc::new(NoSpeech),
        Arc::new(PacedSink::new()),
    );
    let mut events = companion.subscribe();

    companion.send_text("still there?").await.unwrap();
    collect_until(&mut events, is_idle).await;

    assert_eq!(generator.calls(), 1);
    assert_eq!(companion.snapshot().await.unwrap().messages.len(), 2);
}
