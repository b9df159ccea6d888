//! Language model providers and the models offered for each.

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub const DEFAULT_PROVIDER: &str = "DEFAULT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[strum(serialize = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Groq,
    #[strum(serialize = "openrouter")]
    OpenRouter,
    #[strum(serialize = "aigateway")]
    AiGateway,
    Ollama,
}

impl LlmProvider {
    pub fn label(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::Google => "Google",
            LlmProvider::Groq => "Groq",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::AiGateway => "AI Gateway",
            LlmProvider::Ollama => "Ollama",
        }
    }

    /// OpenAI-compatible chat completions endpoint.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1/chat/completions",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1/chat/completions",
            LlmProvider::Google => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
            LlmProvider::Groq => "https://api.groq.com/openai/v1/chat/completions",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            LlmProvider::AiGateway => "https://ai-gateway.vercel.sh/v1/chat/completions",
            LlmProvider::Ollama => "http://localhost:11434/v1/chat/completions",
        }
    }

    pub fn models(&self) -> &'static [&'static str] {
        match self {
            LlmProvider::OpenAi => &["gpt-4o", "gpt-4o-mini", "gpt-5"],
            LlmProvider::Anthropic => &[
                "claude-3-7-sonnet-20250219",
                "claude-sonnet-4-20250514",
                "claude-sonnet-4-5-20250929",
                "claude-haiku-4-5-20251001",
                "claude-opus-4-20250514",
                "claude-opus-4-1-20250805",
            ],
            LlmProvider::Google => &[
                "gemini-1.5-pro-latest",
                "gemini-1.5-flash-latest",
                "gemini-2.0-flash-lite",
                "gemini-2.0-flash",
                "gemini-2.5-pro",
            ],
            LlmProvider::Groq => &["llama-3.3-70b-versatile"],
            LlmProvider::OpenRouter => &[
                "anthropic/claude-3.5-sonnet",
                "anthropic/claude-3.7-sonnet",
                "anthropic/claude-sonnet-4",
                "anthropic/claude-sonnet-4.5",
                "anthropic/claude-haiku-4.5",
                "anthropic/claude-opus-4",
                "anthropic/claude-opus-4.1",
                "google/gemini-2.0-flash",
                "google/gemini-2.5-pro",
                "moonshotai/kimi-k2",
            ],
            LlmProvider::AiGateway => &["anthropic/claude-sonnet-4.5", "openai/gpt-4o"],
            // Configured at deploy time
            LlmProvider::Ollama => &[],
        }
    }

    /// Providers usable in this deployment. Ollama needs a configured model.
    pub fn available(ollama_model: Option<&str>) -> Vec<LlmProvider> {
        LlmProvider::iter()
            .filter(|p| *p != LlmProvider::Ollama || ollama_model.is_some())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderOption {
    pub label: &'static str,
    pub value: String,
}

/// Options shown when choosing a provider, starting with the deployment default.
pub fn provider_options(ollama_model: Option<&str>) -> Vec<ProviderOption> {
    let order = [
        LlmProvider::Anthropic,
        LlmProvider::OpenAi,
        LlmProvider::Google,
        LlmProvider::Groq,
        LlmProvider::OpenRouter,
        LlmProvider::AiGateway,
        LlmProvider::Ollama,
    ];
    let available = LlmProvider::available(ollama_model);

    std::iter::once(ProviderOption {
        label: "Default",
        value: DEFAULT_PROVIDER.to_string(),
    })
    .chain(
        order
            .into_iter()
            .filter(|p| available.contains(p))
            .map(|p| ProviderOption {
                label: p.label(),
                value: p.to_string(),
            }),
    )
    .collect()
}

/// Resolves the configured provider name. `DEFAULT` and unknown names fall back to OpenAI.
pub fn resolve_provider(name: &str) -> LlmProvider {
    if name.eq_ignore_ascii_case(DEFAULT_PROVIDER) {
        return LlmProvider::OpenAi;
    }
    name.to_lowercase().parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown LLM provider '{}', using openai", name);
        LlmProvider::OpenAi
    })
}
