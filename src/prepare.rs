//! Turning article HTML into narration-ready text.

use async_trait::async_trait;
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::article::Article;
use crate::chunker::normalize_whitespace;
use crate::error::{PodcastError, Result};

#[async_trait]
pub trait TextPreparer: Send + Sync {
    /// Plain text to read aloud. Empty output is treated as a failure by the caller.
    async fn prepare(&self, article: &Article) -> Result<String>;
}

fn spoken_date(article: &Article) -> String {
    article.published.format("%B %d, %Y").to_string()
}

/// Elements whose text is never read aloud.
const SILENT_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Strip tags and keep the visible text of an HTML fragment.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let silent = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|element| SILENT_ELEMENTS.contains(&element.name()))
            });
            (!silent).then_some(&**text)
        })
        .collect::<Vec<_>>()
        .join(" ");
    normalize_whitespace(&text)
}

/// Reads the article as-is, without rewriting.
#[derive(Debug, Default)]
pub struct PlainPreparer;

#[async_trait]
impl TextPreparer for PlainPreparer {
    async fn prepare(&self, article: &Article) -> Result<String> {
        let body = html_to_text(&article.content);
        if body.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "Article Title: {}\n\nDate of publication: {}.\n\n{}",
            article.title,
            spoken_date(article),
            body
        ))
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "Rewrite the blog article you receive as a transcript \
to be read aloud by a text-to-speech system. Keep only spoken text: no markup, links, code or \
tables (summarize them briefly instead). Start with the article title and publication date. \
Return the transcript inside a ```markdown block and nothing else.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Rewrites articles with a chat-completions model (OpenAI-compatible API).
pub struct LlmPreparer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl std::fmt::Debug for LlmPreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmPreparer")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl LlmPreparer {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    async fn complete(&self, user: &str) -> reqwest::Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.01,
        };
        self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Take the text out of a ```markdown fenced block if the model wrapped it in one.
pub fn strip_markdown_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let inner = trimmed
        .strip_prefix("```markdown")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl TextPreparer for LlmPreparer {
    async fn prepare(&self, article: &Article) -> Result<String> {
        info!("Preprocessing article '{}' with {}", article.title, self.model);
        let user = format!(
            "Article Title: {}\n\nDate of publication: {}\n\nContent:\n{}",
            article.title,
            spoken_date(article),
            article.content
        );
        let failed = |message: String| PodcastError::PreparationFailed {
            title: article.title.clone(),
            message,
        };

        let response = self.complete(&user).await.map_err(|e| failed(e.to_string()))?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| failed("model returned no text".to_string()))?;

        let text = strip_markdown_fence(&reply).to_string();
        debug!("Prepared {} chars of narration", text.chars().count());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::articles_from_entries;
    use crate::feed::FeedEntry;

    fn article(content: &str) -> Article {
        let mut articles = articles_from_entries(vec![FeedEntry {
            title: "Hello".to_string(),
            link: "https://blog.example/hello".to_string(),
            summary: String::new(),
            content: format!("{}{}", content, " ".repeat(120)),
            published: "2024-03-05T10:00:00Z".to_string(),
        }]);
        articles.remove(0)
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<h1>Title</h1>\n<p>Some <em>emphasis</em>&amp; more.</p><script></script>"),
            "Title Some emphasis & more."
        );
    }

    #[test]
    fn test_html_to_text_skips_scripts_and_styles() {
        let html = "<style>p { color: red; }</style><p>Read this.</p>\
                    <script>window.track('visit');</script><p>And <noscript>enable js</noscript>this.</p>";
        assert_eq!(html_to_text(html), "Read this. And this.");
    }

    #[tokio::test]
    async fn test_plain_preparer_adds_header() {
        let text = PlainPreparer
            .prepare(&article("<p>Body text.</p>"))
            .await
            .unwrap();
        assert_eq!(
            text,
            "Article Title: Hello.\n\nDate of publication: March 05, 2024.\n\nBody text."
        );
    }

    #[tokio::test]
    async fn test_plain_preparer_empty_body() {
        let text = PlainPreparer.prepare(&article("<p> </p>")).await.unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_strip_markdown_fence() {
        assert_eq!(strip_markdown_fence("```markdown\nHello.\n```"), "Hello.");
        assert_eq!(strip_markdown_fence("```\nHi.\n```\n"), "Hi.");
        assert_eq!(strip_markdown_fence("  plain  "), "plain");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let preparer = LlmPreparer::new("https://llm.example/v1", "secret", "some-model");
        let debug = format!("{:?}", preparer);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("some-model"));
    }
}
