//! Title resolution through an external text-completion capability.
//!
//! A [`TitleResolver`] turns a first-page snippet into a raw completion.
//! [`resolve_title`] wraps it: failures of any kind are logged and become
//! "no title", and the raw completion is reduced by [`clean_title`].
//!
//! # Providers
//!
//! | Config Value | Resolver |
//! |-------------|----------|
//! | `"disabled"` | [`DisabledResolver`] |
//! | `"openai"` | [`OpenAiResolver`], or [`DisabledResolver`] when `OPENAI_API_KEY` is unset |

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TitleConfig;

/// Sentinel a resolver returns when it cannot name the document.
pub const UNKNOWN_TITLE: &str = "Unknown";
/// Longest title accepted from a resolver.
pub const MAX_TITLE_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You extract concise titles from documents.";

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("title request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("title API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid title response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait TitleResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Raw completion for a document snippet.
    async fn complete(&self, snippet: &str) -> Result<String, TitleError>;
}

/// Always answers [`UNKNOWN_TITLE`].
pub struct DisabledResolver;

#[async_trait]
impl TitleResolver for DisabledResolver {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _snippet: &str) -> Result<String, TitleError> {
        Ok(UNKNOWN_TITLE.to_string())
    }
}

/// OpenAI-compatible chat completions (`POST {base_url}/chat/completions`).
pub struct OpenAiResolver {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiResolver {
    pub fn new(config: &TitleConfig, api_key: String) -> Result<Self, TitleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| config.base_url.clone());
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

fn user_prompt(snippet: &str) -> String {
    format!(
        "Extract the document's title from the following first page text.\n\
         Return ONLY the title (no quotes, no extra words). If you cannot confidently \
         identify a distinct title, respond exactly with: {}\n\n\
         --- PAGE TEXT START ---\n{}\n--- PAGE TEXT END ---",
        UNKNOWN_TITLE, snippet
    )
}

#[async_trait]
impl TitleResolver for OpenAiResolver {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, snippet: &str) -> Result<String, TitleError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt(snippet)},
            ],
            "temperature": 0,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TitleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String, TitleError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .map(|c| c.as_str().unwrap_or_default().to_string())
        .ok_or_else(|| TitleError::InvalidResponse("missing choices[0].message.content".into()))
}

/// Reduce a completion to a usable title: first non-empty line, stripped
/// of quotes and spaces. Empty, [`UNKNOWN_TITLE`] (any case) and anything
/// over [`MAX_TITLE_CHARS`] characters mean no title.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let title = line.trim_matches(['"', '\'', ' ']);
    if title.is_empty()
        || title.eq_ignore_ascii_case(UNKNOWN_TITLE)
        || title.chars().count() > MAX_TITLE_CHARS
    {
        return None;
    }
    Some(title.to_string())
}

/// Resolve a title for `snippet`, truncated to `max_chars` characters.
/// Never fails: resolver errors are logged and yield `None`.
pub async fn resolve_title(
    resolver: &dyn TitleResolver,
    snippet: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let snippet = snippet.map(str::trim).filter(|s| !s.is_empty())?;
    let snippet: String = snippet.chars().take(max_chars).collect();

    match resolver.complete(&snippet).await {
        Ok(raw) => {
            let title = clean_title(&raw);
            debug!(resolver = resolver.name(), title = ?title, "title resolved");
            title
        }
        Err(e) => {
            warn!(resolver = resolver.name(), error = %e, "title resolution failed");
            None
        }
    }
}

/// Create the resolver selected by configuration.
pub fn create_resolver(config: &TitleConfig) -> Box<dyn TitleResolver> {
    if !config.is_enabled() {
        return Box::new(DisabledResolver);
    }
    let Some(api_key) = std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
    else {
        debug!("OPENAI_API_KEY not set, titles disabled");
        return Box::new(DisabledResolver);
    };
    match OpenAiResolver::new(config, api_key) {
        Ok(resolver) => Box::new(resolver),
        Err(e) => {
            warn!(error = %e, "title client unavailable, titles disabled");
            Box::new(DisabledResolver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<&'static str, ()>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<&'static str, ()>) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TitleResolver for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, snippet: &str) -> Result<String, TitleError> {
            self.seen.lock().unwrap().push(snippet.to_string());
            match self.reply {
                Ok(r) => Ok(r.to_string()),
                Err(()) => Err(TitleError::Api {
                    status: 503,
                    body: "overloaded".into(),
                }),
            }
        }
    }

    #[test]
    fn clean_title_rules() {
        assert_eq!(clean_title("  \"Annual Report 2024\"  ").as_deref(), Some("Annual Report 2024"));
        assert_eq!(clean_title("\n\n'Budget'\nextra words").as_deref(), Some("Budget"));
        assert_eq!(clean_title("Unknown"), None);
        assert_eq!(clean_title("UNKNOWN"), None);
        assert_eq!(clean_title("\"\""), None);
        assert_eq!(clean_title("   \n  "), None);
        assert_eq!(clean_title(&"x".repeat(201)), None);
        assert!(clean_title(&"x".repeat(200)).is_some());
    }

    #[test]
    fn parses_chat_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Site Survey"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Site Survey");
        assert!(parse_completion(&serde_json::json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn failures_absorbed() {
        let resolver = Scripted::new(Err(()));
        assert_eq!(resolve_title(&resolver, Some("text"), 8000).await, None);
    }

    #[tokio::test]
    async fn snippet_truncated_and_skipped_when_empty() {
        let resolver = Scripted::new(Ok("Field Notes"));
        let long = "é".repeat(50);
        assert_eq!(
            resolve_title(&resolver, Some(&long), 10).await.as_deref(),
            Some("Field Notes")
        );
        assert_eq!(resolver.seen.lock().unwrap()[0].chars().count(), 10);

        assert_eq!(resolve_title(&resolver, Some("  "), 10).await, None);
        assert_eq!(resolve_title(&resolver, None, 10).await, None);
        assert_eq!(resolver.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_resolves_nothing() {
        let config = TitleConfig {
            provider: "disabled".into(),
            ..TitleConfig::default()
        };
        let resolver = create_resolver(&config);
        assert_eq!(resolver.name(), "disabled");
        assert_eq!(resolve_title(resolver.as_ref(), Some("Report"), 100).await, None);
    }

    #[test]
    fn prompt_embeds_snippet() {
        let prompt = user_prompt("FIRST PAGE");
        assert!(prompt.contains("FIRST PAGE"));
        assert!(prompt.contains("respond exactly with: Unknown"));
    }
}
