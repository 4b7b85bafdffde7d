use base64::Engine;
use korema::ai::{ProviderClient, Retrying};
use korema::audio::{AudioSink, CpalSink, PacedSink, WavFileSink};
use korema::{Companion, CompanionConfig, CompanionEvent, CompanionHandle, Message, Role};
use std::path::Path;
use std::sync::Arc;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Bundled defaults, used when no .env file is present
const BUNDLED_CONFIG: &str = include_str!("../assets/config.env");

const MESSAGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:zero]:[minute padding:zero] [period case:upper]");

const HELP: &str = "\
commands:
  /voice on|off       toggle spoken replies
  /autonomy on|off    toggle proactive check-ins
  /persona <name>     hinata | kurama
  /mood <name>        soft | friend | normal | strict | girlfriend | boyfriend
  /model <name>       flash | pro
  /code on|off        coding assistance
  /strict on|off      strict coding (forces the pro model)
  /image <path>       attach an image to the next message
  /listen <text>      simulate a voice transcript
  /history            print the conversation
  /quit               leave
anything else is sent as a message";

fn load_dotenv() {
    // First try to load from .env file
    if dotenvy::dotenv().is_ok() {
        return;
    }
    load_bundled_config();
}

fn load_bundled_config() {
    for line in BUNDLED_CONFIG.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            // Only set if not already set (allow env override)
            if std::env::var(key).is_err() {
                // SAFETY: called from main before the runtime spawns any threads
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("korema=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = CompanionConfig::from_env()?;
    let provider = ProviderClient::from_env(&config)?;
    let synthesizer = provider.synthesizer();
    let generator = Arc::new(Retrying::new(provider, config.retry));

    let sink: Arc<dyn AudioSink> = if config.save_audio {
        let dir = config.audio_dir.clone().unwrap_or_else(WavFileSink::default_dir);
        Arc::new(WavFileSink::new(dir))
    } else {
        match CpalSink::new() {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::warn!(error = %e, "no speaker output, replies will be paced silently");
                Arc::new(PacedSink::new())
            }
        }
    };

    let companion = Companion::spawn(&config, generator, synthesizer, sink);
    let printer = tokio::spawn(print_events(companion.subscribe(), config.persona.display_name()));

    for message in companion.snapshot().await?.messages {
        print_message(&message);
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&companion, line).await {
            eprintln!("{e}");
        }
    }

    drop(companion);
    printer.abort();
    Ok(())
}

async fn handle_line(companion: &CompanionHandle, line: &str) -> anyhow::Result<()> {
    let Some(command) = line.strip_prefix('/') else {
        companion.set_input(line).await?;
        companion.send().await?;
        return Ok(());
    };
    let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
    let arg = arg.trim();

    match name {
        "voice" => companion.set_voice(parse_switch(arg)?).await?,
        "autonomy" => companion.set_autonomy(parse_switch(arg)?).await?,
        "persona" => companion.set_persona(arg.parse().map_err(anyhow::Error::msg)?).await?,
        "mood" => companion.set_mood(arg.parse().map_err(anyhow::Error::msg)?).await?,
        "model" => companion.set_model(arg.parse().map_err(anyhow::Error::msg)?).await?,
        "code" => companion.set_code_mode(parse_switch(arg)?).await?,
        "strict" => companion.set_strict_code_mode(parse_switch(arg)?).await?,
        "image" => {
            let url = image_data_url(Path::new(arg)).await?;
            companion.attach_image(Some(url)).await?;
            println!("image attached");
        }
        "listen" => {
            companion.listening_started().await?;
            companion.submit_transcript(arg).await?;
        }
        "history" => {
            for message in companion.snapshot().await?.messages {
                print_message(&message);
            }
        }
        _ => println!("{HELP}"),
    }
    Ok(())
}

fn parse_switch(arg: &str) -> anyhow::Result<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected on or off, got '{other}'"),
    }
}

async fn image_data_url(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime = match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

async fn print_events(mut events: broadcast::Receiver<CompanionEvent>, name: &'static str) {
    loop {
        match events.recv().await {
            Ok(CompanionEvent::ResponseCompleted(message)) => print_message(&message),
            Ok(CompanionEvent::EmotionChanged(emotion)) => tracing::debug!(%emotion, "{name} feels"),
            Ok(CompanionEvent::ReminderSet(reminder)) => {
                println!("  ⏰ {} at {}", reminder.label, reminder.time);
            }
            Ok(CompanionEvent::CredentialPromptRequested) => {
                eprintln!("The API key was rejected. Set GEMINI_API_KEY and restart.");
            }
            Ok(CompanionEvent::ResponseFailed(error)) => eprintln!("reply failed: {error}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_message(message: &Message) {
    let time = format_timestamp(message.timestamp).unwrap_or_default();
    let who = match message.role {
        Role::User => "you",
        Role::Ai => "ai",
    };
    match message.emotion {
        Some(emotion) => println!("[{time}] {who} ({emotion}): {}", message.text),
        None => println!("[{time}] {who}: {}", message.text),
    }
}

fn format_timestamp(millis: i64) -> Option<String> {
    let mut datetime = OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()?;
    if let Ok(offset) = UtcOffset::current_local_offset() {
        datetime = datetime.to_offset(offset);
    }
    datetime.format(MESSAGE_TIME_FORMAT).ok()
}
