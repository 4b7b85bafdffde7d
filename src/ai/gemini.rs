use super::{ChatError, ChatResult, GenerationRequest, SpeechSynthesizer, StreamHandle, TextGenerator, ToolCall};
use crate::audio::{AudioClip, TTS_SAMPLE_RATE};
use crate::emotion::strip_emotion_tags;
use crate::types::Persona;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
const TEMPERATURE: f32 = 0.9;

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Gemini REST client: streamed text generation and speech synthesis.
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

// Gemini request/response types
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    Text(&'a str),
    InlineData(InlineData<'a>),
}

#[derive(Serialize)]
struct RequestContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<RequestContent<'a>>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInlineData {
    pub data: String,
}

#[derive(Deserialize)]
pub struct ResponseFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    pub text: Option<String>,
    pub function_call: Option<ResponseFunctionCall>,
    pub inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize)]
pub struct ResponseContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
pub struct Candidate {
    pub content: Option<ResponseContent>,
}

#[derive(Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Text and tool calls carried by one streamed chunk.
#[derive(Debug, Default, PartialEq)]
pub struct GeminiChunk {
    pub text: String,
    pub calls: Vec<ToolCall>,
}

pub fn parse_gemini_sse_data(data: &str) -> Option<GeminiChunk> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = serde_json::from_str::<GenerateResponse>(trimmed).ok()?;
    let mut chunk = GeminiChunk::default();
    for part in parsed
        .candidates
        .into_iter()
        .take(1)
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
    {
        if let Some(text) = part.text {
            chunk.text.push_str(&text);
        }
        if let Some(call) = part.function_call {
            chunk.calls.push(ToolCall {
                name: call.name,
                args: call.args,
            });
        }
    }
    Some(chunk)
}

/// Splits a `data:<mime>;base64,<payload>` URL. Bare payloads are treated as JPEG.
pub fn split_data_url(url: &str) -> (&str, &str) {
    match url.split_once(',') {
        Some((header, payload)) => {
            let mime = header
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .filter(|mime| !mime.is_empty())
                .unwrap_or("image/jpeg");
            (mime, payload)
        }
        None => ("image/jpeg", url),
    }
}

fn reminder_tool() -> Value {
    json!([{
        "functionDeclarations": [{
            "name": "setReminder",
            "description": "Sets an alarm or reminder for the user.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "time": { "type": "STRING", "description": "The time for the reminder in HH:mm format (24h)." },
                    "label": { "type": "STRING", "description": "The description of the reminder." },
                    "type": { "type": "STRING", "enum": ["alarm", "sleep", "general"], "description": "The type of reminder." }
                },
                "required": ["time", "label", "type"]
            }
        }]
    }])
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ChatError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => ChatError::new(format!(
            "Gemini error {status} {}: {}",
            parsed.error.status.unwrap_or_default(),
            parsed.error.message
        )),
        Err(_) => ChatError::new(format!("Gemini error {status}: {body}")),
    }
}

fn decode_line(bytes: &[u8]) -> ChatResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| ChatError::new(format!("Gemini stream is not valid UTF-8: {e}")))
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:{method}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn apply_chunk(chunk: GeminiChunk, handle: &mut StreamHandle) {
        for call in chunk.calls {
            debug!(tool = %call.name, "model requested tool call");
            handle.tool_call(call);
        }
        handle.append(&chunk.text);
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest, mut handle: StreamHandle) -> ChatResult<String> {
        let system = request.system_instruction();
        let mut parts = vec![RequestPart::Text(&request.prompt)];
        if let Some(image) = &request.image {
            let (mime_type, data) = split_data_url(image);
            parts.push(RequestPart::InlineData(InlineData { mime_type, data }));
        }
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: Some("user"),
                parts,
            }],
            system_instruction: Some(RequestContent {
                role: None,
                parts: vec![RequestPart::Text(&system)],
            }),
            generation_config: json!({ "temperature": TEMPERATURE }),
            tools: Some(reminder_tool()),
        };

        let model = request.effective_model();
        let response = self
            .client
            .post(self.endpoint(model.id(), "streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.config.api_key)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        // raw bytes: a multi-byte character may straddle two network chunks
        let mut buffer: Vec<u8> = Vec::new();
        let mut data_acc: Option<String> = None;
        let mut stream = response.bytes_stream();
        while let Some(item) = stream.next().await {
            let bytes = item.map_err(ChatError::from)?;
            buffer.extend_from_slice(&bytes);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = decode_line(&raw[..pos])?;
                let line = line.strip_suffix('\r').unwrap_or(line);

                if line.is_empty() {
                    if let Some(data) = data_acc.take()
                        && let Some(chunk) = parse_gemini_sse_data(&data)
                    {
                        Self::apply_chunk(chunk, &mut handle);
                    }
                    continue;
                }

                if let Some(rest) = line.strip_prefix("data:") {
                    let fragment = rest.trim_start();
                    match &mut data_acc {
                        Some(existing) => existing.push_str(fragment),
                        None => data_acc = Some(fragment.to_string()),
                    }
                }
            }
        }

        // stream may end without a trailing blank line
        if let Some(rest) = decode_line(&buffer)?.trim().strip_prefix("data:") {
            data_acc.get_or_insert_with(String::new).push_str(rest.trim_start());
        }
        if let Some(data) = data_acc.take()
            && let Some(chunk) = parse_gemini_sse_data(&data)
        {
            Self::apply_chunk(chunk, &mut handle);
        }

        Ok(handle.into_text())
    }
}

impl GeminiClient {
    async fn request_speech(&self, text: &str, persona: Persona) -> ChatResult<Option<AudioClip>> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: None,
                parts: vec![RequestPart::Text(text)],
            }],
            system_instruction: None,
            generation_config: json!({
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": persona.voice_name() } }
                }
            }),
            tools: None,
        };
        let response = self
            .client
            .post(self.endpoint(TTS_MODEL, "generateContent"))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        let data = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.inline_data)
            .map(|inline| inline.data);
        match data {
            Some(data) => AudioClip::from_base64_pcm(&data, TTS_SAMPLE_RATE)
                .map(Some)
                .map_err(|e| ChatError::new(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str, persona: Persona) -> Option<AudioClip> {
        let spoken = strip_emotion_tags(text);
        if spoken.is_empty() {
            return None;
        }
        match self.request_speech(&spoken, persona).await {
            Ok(clip) => clip.filter(|clip| !clip.is_empty()),
            Err(err) => {
                warn!(error = %err, "speech synthesis failed, continuing text-only");
                None
            }
        }
    }
}
