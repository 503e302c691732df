use crate::error::RewriteError;
use crate::favsync::source::Rewriter;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const DEFAULT_MODEL: &str = "glm-4.6";

const TOPIC_PLACEHOLDER: &str = "{{Topic}}";
const CONTENTS_PLACEHOLDER: &str = "{{contents}}";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an editor who turns raw, unpunctuated video captions about \"{{Topic}}\" into readable Markdown. Keep the speaker's wording and language, restore punctuation, split paragraphs at topic changes, and add short section headings where helpful. Never summarise, translate, or invent content.";
const DEFAULT_USER_PROMPT: &str = "Video topic: {{Topic}}\n\nReformat the following captions:\n\n{{contents}}";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptTemplates {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: PromptTemplates = toml::from_str(&raw)
            .with_context(|| format!("failed to parse prompt file {}", path.display()))?;
        if !parsed.user_prompt.contains(CONTENTS_PLACEHOLDER) {
            anyhow::bail!(
                "prompt file {} has no {CONTENTS_PLACEHOLDER} placeholder in user_prompt",
                path.display()
            );
        }
        Ok(parsed)
    }

    pub fn render(&self, topic: &str, text: &str) -> (String, String) {
        let system = self.system_prompt.replace(TOPIC_PLACEHOLDER, topic);
        let user = self
            .user_prompt
            .replace(TOPIC_PLACEHOLDER, topic)
            .replace(CONTENTS_PLACEHOLDER, text);
        (system, user)
    }
}

/// When rewriting is worth a remote call. `0` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteLimits {
    pub max_source_chars: usize,
    pub max_duration_secs: u64,
}

impl RewriteLimits {
    pub fn admits(&self, duration_secs: Option<u64>, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if self.max_source_chars > 0 && text.chars().count() > self.max_source_chars {
            return false;
        }
        match duration_secs {
            Some(secs) if self.max_duration_secs > 0 => secs <= self.max_duration_secs,
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRewriterSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub prompts: PromptTemplates,
}

/// Rewriter backed by an OpenAI-compatible chat completions endpoint.
pub struct ChatCompletionsRewriter {
    settings: ChatRewriterSettings,
    client: Client,
}

impl ChatCompletionsRewriter {
    pub fn new(settings: ChatRewriterSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build rewrite http client")?;
        Ok(Self { settings, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

fn extract_chat_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let chunks = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

impl Rewriter for ChatCompletionsRewriter {
    fn rewrite(&self, topic: &str, text: &str) -> std::result::Result<String, RewriteError> {
        let (system, user) = self.settings.prompts.render(topic, text);
        let payload = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "thinking": {"type": "disabled"},
            "temperature": self.settings.temperature,
            "stream": false
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    RewriteError::Timeout(self.settings.timeout_secs)
                } else {
                    RewriteError::Transport(err.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(RewriteError::Status(response.status().as_u16()));
        }

        let json: Value = response
            .json()
            .map_err(|err| RewriteError::MalformedResponse(err.to_string()))?;
        extract_chat_text(&json)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| RewriteError::MalformedResponse("missing choices[0].message.content".to_string()))
    }
}
