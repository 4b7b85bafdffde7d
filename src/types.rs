use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

/// Affect attached to the avatar and to AI messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Thinking,
    Sad,
    Angry,
    Surprised,
    Jealous,
    Caring,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Thinking,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Jealous,
        Emotion::Caring,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Thinking => "thinking",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Jealous => "jealous",
            Emotion::Caring => "caring",
        }
    }

    /// Case-insensitive keyword lookup, surrounding whitespace ignored.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let keyword = keyword.trim();
        Self::ALL
            .into_iter()
            .find(|emotion| emotion.as_str().eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            timestamp: now_millis(),
            emotion: None,
            image_url,
        }
    }

    pub fn ai(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Ai,
            text: text.into(),
            timestamp: now_millis(),
            emotion: None,
            image_url: None,
        }
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Named behavioural profile: selects the system instruction and the TTS voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Hinata,
    Kurama,
}

impl Persona {
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Hinata => "hinata",
            Persona::Kurama => "kurama",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Persona::Hinata => "Hinata",
            Persona::Kurama => "Kurama",
        }
    }

    /// Prebuilt TTS voice for this persona.
    pub fn voice_name(self) -> &'static str {
        match self {
            Persona::Hinata => "Kore",
            Persona::Kurama => "Fenrir",
        }
    }

    pub fn greeting(self) -> &'static str {
        match self {
            Persona::Hinata => "হিনাটা এখানে! তোমার দিনটি কেমন যাচ্ছে? ✨",
            Persona::Kurama => "আমি কুরামা। বলো কি সাহায্য করতে পারি? 🔥",
        }
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hinata" => Ok(Persona::Hinata),
            "kurama" => Ok(Persona::Kurama),
            other => Err(format!("unknown persona '{other}' (expected hinata or kurama)")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Soft,
    Friend,
    #[default]
    Normal,
    Strict,
    Girlfriend,
    Boyfriend,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Soft => "soft",
            Mood::Friend => "friend",
            Mood::Normal => "normal",
            Mood::Strict => "strict",
            Mood::Girlfriend => "girlfriend",
            Mood::Boyfriend => "boyfriend",
        }
    }

    pub fn is_romantic(self) -> bool {
        matches!(self, Mood::Girlfriend | Mood::Boyfriend)
    }
}

impl FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(Mood::Soft),
            "friend" => Ok(Mood::Friend),
            "normal" => Ok(Mood::Normal),
            "strict" => Ok(Mood::Strict),
            "girlfriend" | "gf" => Ok(Mood::Girlfriend),
            "boyfriend" | "bf" => Ok(Mood::Boyfriend),
            other => Err(format!("unknown mood '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiModel {
    #[default]
    #[serde(rename = "gemini-3-flash-preview")]
    Flash,
    #[serde(rename = "gemini-3-pro-preview")]
    Pro,
}

impl AiModel {
    pub fn id(self) -> &'static str {
        match self {
            AiModel::Flash => "gemini-3-flash-preview",
            AiModel::Pro => "gemini-3-pro-preview",
        }
    }
}

impl FromStr for AiModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flash" | "gemini-3-flash-preview" => Ok(AiModel::Flash),
            "pro" | "gemini-3-pro-preview" => Ok(AiModel::Pro),
            other => Err(format!("unknown model '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Alarm,
    Sleep,
    General,
}

/// Alarm or reminder requested by the model through the `setReminder` tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// 24h `HH:mm`.
    pub time: String,
    pub label: String,
    pub active: bool,
}

#[derive(Deserialize)]
struct ReminderArgs {
    time: String,
    label: String,
    #[serde(rename = "type")]
    kind: ReminderKind,
}

impl Reminder {
    /// Builds a reminder from `setReminder` call arguments, normalising the time to `HH:mm`.
    pub fn from_args(id: impl Into<String>, args: &serde_json::Value) -> Result<Self, String> {
        let args: ReminderArgs = serde_json::from_value(args.clone())
            .map_err(|e| format!("invalid setReminder arguments: {e}"))?;
        let invalid = || format!("invalid reminder time '{}'", args.time);
        let (hour, minute) = args.time.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u8 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = minute.trim().parse().map_err(|_| invalid())?;
        let parsed = time::Time::from_hms(hour, minute, 0).map_err(|e| format!("{}: {e}", invalid()))?;
        Ok(Self {
            id: id.into(),
            kind: args.kind,
            time: format!("{:02}:{:02}", parsed.hour(), parsed.minute()),
            label: args.label,
            active: true,
        })
    }
}
