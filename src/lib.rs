//! Korema: an AI companion core.
//!
//! A session streams replies from a text generator, pulls `[EMOTION:x]` tags
//! out of them to drive the avatar, optionally speaks the reply, and checks in
//! by itself when the user has been quiet for a while.
//!
//! Start a session with [`Companion::spawn`] and drive it through the
//! returned [`CompanionHandle`].

pub mod ai;
pub mod audio;
pub mod companion;
pub mod config;
pub mod emotion;
pub mod error;
pub mod idle;
pub mod session;
pub mod speech;
pub mod store;
pub mod turn;
pub mod types;

pub use companion::{Companion, CompanionEvent, CompanionHandle, SessionSnapshot};
pub use config::CompanionConfig;
pub use error::{CompanionError, Result};
pub use turn::TurnState;
pub use types::{AiModel, Emotion, Message, Mood, Persona, Reminder, Role};
