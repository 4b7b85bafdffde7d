use super::{
    ChatError, ChatResult, GeminiClient, GeminiConfig, GenerationRequest, NoSpeech, SpeechSynthesizer,
    StreamHandle, TextGenerator,
};
use crate::config::CompanionConfig;
use crate::error::{CompanionError, Result};
use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// Enum to hold different provider clients
pub enum ProviderClient {
    Gemini(Arc<GeminiClient>),
    OpenAI(providers::openai::Client),
    Anthropic(providers::anthropic::Client),
    Ollama(providers::ollama::Client),
}

impl ProviderClient {
    /// Auto-detect and configure provider from configuration and environment variables
    pub fn from_env(config: &CompanionConfig) -> Result<Self> {
        // Priority order:
        // 1. GEMINI_API_KEY / API_KEY → Gemini (text + speech)
        // 2. OPENAI_API_KEY → OpenAI
        // 3. ANTHROPIC_API_KEY → Claude
        // 4. LLM_USE_OLLAMA=true → Ollama

        if let Some(key) = &config.gemini_api_key {
            let gemini = GeminiConfig::new(key.clone()).with_base_url(config.gemini_base_url.clone());
            info!("using Gemini provider");
            return Ok(Self::Gemini(Arc::new(GeminiClient::new(gemini))));
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            info!("using OpenAI provider");
            return Ok(Self::OpenAI(providers::openai::Client::new(&key)));
        }

        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            info!("using Anthropic provider");
            return Ok(Self::Anthropic(providers::anthropic::Client::new(&key)));
        }

        let use_ollama = env::var("LLM_USE_OLLAMA")
            .unwrap_or_else(|_| "false".into())
            .to_ascii_lowercase();

        if matches!(use_ollama.as_str(), "1" | "true" | "yes" | "on") {
            // Ollama endpoint is configured via OLLAMA_HOST environment variable
            // The Rig client reads this automatically (defaults to http://localhost:11434)
            info!("using Ollama provider");
            return Ok(Self::Ollama(providers::ollama::Client::new()));
        }

        Err(CompanionError::Config(
            "No AI provider configured. Set GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY, or LLM_USE_OLLAMA=true".to_string(),
        ))
    }

    /// Speech backend matching this provider. Only Gemini can speak; the rest are text-only.
    pub fn synthesizer(&self) -> Arc<dyn SpeechSynthesizer> {
        match self {
            ProviderClient::Gemini(client) => Arc::clone(client) as Arc<dyn SpeechSynthesizer>,
            _ => Arc::new(NoSpeech),
        }
    }

    /// Non-streaming completion through a rig agent.
    async fn prompt_rig(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        let preamble = request.system_instruction();
        let prompt = request.prompt.as_str();
        match self {
            ProviderClient::OpenAI(client) => {
                let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

                let agent = client
                    .agent(&model)
                    .preamble(&preamble)
                    .max_tokens(4096)
                    .temperature(0.9)
                    .build();

                Ok(agent.prompt(prompt).await?)
            }
            ProviderClient::Anthropic(client) => {
                let model = env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string());

                let agent = client
                    .agent(&model)
                    .preamble(&preamble)
                    .max_tokens(4096)
                    .temperature(0.9)
                    .build();

                Ok(agent.prompt(prompt).await?)
            }
            ProviderClient::Ollama(client) => {
                let model = env::var("LLM_MODEL").unwrap_or_else(|_| "llama3.1:latest".to_string());

                let agent = client.agent(&model).preamble(&preamble).build();

                Ok(agent.prompt(prompt).await?)
            }
            ProviderClient::Gemini(_) => Err(anyhow::anyhow!("Gemini is not served through rig")),
        }
    }
}

#[async_trait]
impl TextGenerator for ProviderClient {
    async fn generate(&self, request: &GenerationRequest, mut handle: StreamHandle) -> ChatResult<String> {
        if let ProviderClient::Gemini(client) = self {
            return client.generate(request, handle).await;
        }
        if request.image.is_some() {
            warn!("attached image dropped: only the Gemini provider accepts images");
        }
        let content = self.prompt_rig(request).await.map_err(ChatError::from)?;
        handle.replace(content.clone());
        Ok(content)
    }
}
