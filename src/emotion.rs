//! Streaming text collector: pulls `[EMOTION:x]` tags out of streamed replies.
//!
//! Generators publish full-so-far snapshots. For every snapshot the collector
//! strips tag markup from the displayed text and remembers the last recognised
//! tag; the detected emotion is last-write-wins across the whole stream. One
//! collector serves exactly one turn.

use crate::types::Emotion;
use once_cell::sync::Lazy;
use regex::Regex;

static EMOTION_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[EMOTION:([^\]]*)\]").expect("emotion tag pattern is valid"));

static EMOTION_TAG_WITH_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\[EMOTION:[^\]]*\]").expect("emotion tag pattern is valid"));

const TAG_OPEN: &str = "[EMOTION:";

/// Text with all tags removed and surrounding whitespace trimmed.
pub fn strip_emotion_tags(text: &str) -> String {
    EMOTION_TAG_WITH_SPACE.replace_all(text, "").trim().to_string()
}

/// Last tag in `text` naming a known emotion.
pub fn last_emotion_tag(text: &str) -> Option<Emotion> {
    EMOTION_TAG
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).and_then(|m| Emotion::from_keyword(m.as_str())))
        .last()
}

/// Drops a trailing, not yet closed tag such as `"[EMOT"` or `"[EMOTION:ha"`.
fn strip_partial_tag(text: &str) -> &str {
    let Some(start) = text.rfind('[') else {
        return text;
    };
    let tail = &text[start..];
    if tail.contains(']') {
        return text;
    }
    let open_len = tail.len().min(TAG_OPEN.len());
    let is_tag_prefix = tail.is_char_boundary(open_len)
        && tail[..open_len].eq_ignore_ascii_case(&TAG_OPEN[..open_len]);
    if is_tag_prefix { &text[..start] } else { text }
}

/// What the collector publishes after each snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Collected {
    /// Display text, tag markup removed.
    pub text: String,
    /// Last emotion tag seen so far in this stream, if any.
    pub detected: Option<Emotion>,
}

impl Collected {
    /// Emotion to attach to the message: the detected one, or neutral.
    pub fn emotion(&self) -> Emotion {
        self.detected.unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct EmotionCollector {
    detected: Option<Emotion>,
}

impl EmotionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes an in-flight snapshot. A dangling partial tag at the end is hidden.
    pub fn observe(&mut self, snapshot: &str) -> Collected {
        self.collect(strip_partial_tag(snapshot))
    }

    /// Processes the final text of the stream.
    pub fn finish(&mut self, final_text: &str) -> Collected {
        self.collect(final_text)
    }

    pub fn detected(&self) -> Option<Emotion> {
        self.detected
    }

    fn collect(&mut self, text: &str) -> Collected {
        if let Some(emotion) = last_emotion_tag(text) {
            self.detected = Some(emotion);
        }
        Collected {
            text: strip_emotion_tags(text),
            detected: self.detected,
        }
    }
}
