use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::{LlmSettings, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationLimits {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationLimits {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, prompt: &str, limits: &GenerationLimits) -> Result<String>;
}

pub fn build_provider(settings: &LlmSettings) -> Result<Box<dyn LlmProvider>> {
    let timeout = Duration::from_secs(settings.timeout_secs.max(1));
    let provider: Box<dyn LlmProvider> = match settings.provider {
        ProviderKind::Ollama => Box::new(OllamaProvider::new(
            &settings.base_url,
            &settings.model,
            timeout,
        )?),
        ProviderKind::OpenAi => {
            let api_key = std::env::var(&settings.api_key_env).with_context(|| {
                format!("missing API key environment variable {}", settings.api_key_env)
            })?;
            Box::new(OpenAiCompatibleProvider::new(
                &settings.base_url,
                &settings.model,
                api_key,
                timeout,
            )?)
        }
    };
    Ok(provider)
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to create HTTP client")
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http_client(timeout)?,
        })
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn generate(&self, prompt: &str, limits: &GenerationLimits) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                num_predict: limits.max_tokens,
                temperature: limits.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("ollama request failed: {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("ollama returned {status}: {body}");
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .context("failed to decode ollama response")?;
        Ok(parsed.response)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: http_client(timeout)?,
        })
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, prompt: &str, limits: &GenerationLimits) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: limits.max_tokens,
            temperature: limits.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("chat completion request failed: {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("chat completion returned {status}: {body}");
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .context("failed to decode chat completion response")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}
