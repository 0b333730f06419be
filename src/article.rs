use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::feed::FeedEntry;

/// Articles with this much content or less are not worth narrating.
pub const MIN_CONTENT_CHARS: usize = 100;

/// One blog post eligible for narration.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub content: String,
    pub published: DateTime<FixedOffset>,
    /// Hex SHA-256 of the link. Join key between feed entries and stored audio.
    pub id: String,
    /// 1-based chronological position among every known entry.
    pub number: usize,
    pub is_valid: bool,
    /// Speech-ready text, filled in by the preparation step.
    pub narration: Option<String>,
}

impl Article {
    pub fn new(entry: FeedEntry, published: DateTime<FixedOffset>, number: usize) -> Self {
        let title = entry.title.trim();
        let title = if title.ends_with('.') {
            title.to_string()
        } else {
            format!("{}.", title)
        };
        let link = entry.link.trim().to_string();
        Self {
            is_valid: entry.content.chars().count() > MIN_CONTENT_CHARS,
            id: article_id(&link),
            title,
            summary: entry.summary,
            link,
            content: entry.content,
            published,
            number,
            narration: None,
        }
    }

    /// Title as shown in the podcast feed, e.g. `#12 Some post`.
    pub fn episode_title(&self) -> String {
        format!("#{} {}", self.number, self.title.trim_end_matches('.'))
    }

    pub fn with_narration(mut self, narration: String) -> Self {
        self.narration = Some(narration);
        self
    }
}

/// Content-addressed identifier for an article link.
pub fn article_id(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse an entry timestamp. Atom feeds use RFC 3339, RSS uses RFC 2822.
pub fn parse_published(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
}

/// Turn raw feed entries into numbered articles, oldest first.
///
/// Numbers are assigned before invalid articles are dropped so that episode
/// numbers stay stable when a short post sits between two long ones.
pub fn articles_from_entries(entries: Vec<FeedEntry>) -> Vec<Article> {
    let mut dated: Vec<(DateTime<FixedOffset>, FeedEntry)> = entries
        .into_iter()
        .filter_map(|entry| match parse_published(&entry.published) {
            Some(date) => Some((date, entry)),
            None => {
                warn!(
                    "Skipping entry '{}' with unparseable date '{}'",
                    entry.title, entry.published
                );
                None
            }
        })
        .collect();
    dated.sort_by(|a, b| a.0.cmp(&b.0));

    dated
        .into_iter()
        .enumerate()
        .map(|(index, (date, entry))| Article::new(entry, date, index + 1))
        .filter(|article| article.is_valid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, link: &str, published: &str, content_len: usize) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            link: link.to_string(),
            summary: String::new(),
            content: "x".repeat(content_len),
            published: published.to_string(),
        }
    }

    #[test]
    fn test_id_is_a_pure_function_of_the_link() {
        let a = Article::new(
            entry("A", "https://blog.example/a", "2024-01-01T00:00:00Z", 200),
            parse_published("2024-01-01T00:00:00Z").unwrap(),
            1,
        );
        let b = Article::new(
            entry("Other title", " https://blog.example/a ", "2025-01-01T00:00:00Z", 10),
            parse_published("2025-01-01T00:00:00Z").unwrap(),
            7,
        );
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
        assert_ne!(a.id, article_id("https://blog.example/b"));
    }

    #[test]
    fn test_title_gets_trailing_period() {
        let a = Article::new(
            entry("  Hello world ", "l", "2024-01-01T00:00:00Z", 200),
            parse_published("2024-01-01T00:00:00Z").unwrap(),
            3,
        );
        assert_eq!(a.title, "Hello world.");
        assert_eq!(a.episode_title(), "#3 Hello world");
    }

    #[test]
    fn test_short_content_is_invalid() {
        let date = parse_published("2024-01-01T00:00:00Z").unwrap();
        assert!(!Article::new(entry("t", "l", "", 100), date, 1).is_valid);
        assert!(Article::new(entry("t", "l", "", 101), date, 1).is_valid);
    }

    #[test]
    fn test_parse_published_accepts_rfc3339_and_rfc2822() {
        assert!(parse_published("2024-03-05T10:00:00+01:00").is_some());
        assert!(parse_published("Tue, 05 Mar 2024 10:00:00 +0100").is_some());
        assert!(parse_published("last tuesday").is_none());
    }

    #[test]
    fn test_articles_are_numbered_chronologically_before_filtering() {
        let entries = vec![
            entry("Third", "c", "2024-03-01T00:00:00Z", 200),
            entry("First", "a", "2024-01-01T00:00:00Z", 200),
            entry("Short", "b", "2024-02-01T00:00:00Z", 5),
            entry("Broken", "d", "not a date", 200),
        ];
        let articles = articles_from_entries(entries);
        let summary: Vec<(&str, usize)> = articles
            .iter()
            .map(|a| (a.title.as_str(), a.number))
            .collect();
        assert_eq!(summary, vec![("First.", 1), ("Third.", 3)]);
    }
}
