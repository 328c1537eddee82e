use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SummarizerConfig;
use crate::error::Result;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condensed digest of `document`, or `None` when unavailable.
    async fn summarize(&self, document: &str) -> Option<String>;
}

const SYSTEM_PROMPT: &str = "\
You are a senior project manager. The input is the aggregated text of this week's team \
status reports (columns: member, this week's work, next week's plan, risks and issues). \
Reply using exactly the template below with no greeting, preamble or closing remarks:

Work this week
Person A
- item 1
- item 2
Person B
- item 1
Next week
Person A
- todo 1
Person B
- todo 1
Current risks
- risk 1
- risk 2

Rules:
- Be concise and actionable; 1-4 bullets per person per section; merge similar items.
- Keep only names and items; omit departments, positions and project names unless needed.
- Write \"None\" where there is no information or no risk.
- Keep the headings and dash format exactly; no extra blank lines or commentary.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: ChatChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmSummarizer {
    config: SummarizerConfig,
    client: reqwest::Client,
}

impl LlmSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn request_digest(&self, api_key: &str, text: &str) -> Result<Option<String>> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let user_prompt = format!(
            "Below is the aggregated text of this week's reports. Extract each member's work, \
             next week's plan and the overall risks, and answer using the template:\n\n{text}"
        );
        let payload = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            warn!(%status, body = %preview, "summary request rejected");
            return Ok(None);
        }

        let parsed: ChatResponse = response.json().await?;
        let digest = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty());

        Ok(digest)
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, document: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty())
        else {
            warn!("LLM API key missing, skipping summary");
            return None;
        };

        let text = strip_html(document);
        match self.request_digest(api_key, &text).await {
            Ok(Some(digest)) => {
                info!(len = digest.len(), "summary generated");
                Some(digest)
            }
            Ok(None) => {
                warn!("summary response was empty");
                None
            }
            Err(e) => {
                warn!(error = %e, "summary request failed");
                None
            }
        }
    }
}

fn markup_patterns() -> &'static [(Regex, &'static str); 4] {
    static PATTERNS: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (Regex::new(r"(?i)<br\s*/?>").expect("valid br regex"), "\n"),
            (
                Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid style regex"),
                "",
            ),
            (
                Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid script regex"),
                "",
            ),
            (Regex::new(r"<[^>]+>").expect("valid tag regex"), ""),
        ]
    })
}

/// Reduces a markup document to its text: line breaks kept, style and
/// script blocks dropped, every other tag removed.
pub fn strip_html(document: &str) -> String {
    let mut text = document.to_string();
    for (pattern, replacement) in markup_patterns() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text
}
