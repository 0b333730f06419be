use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::header::USER_AGENT;
use tracing::{debug, info};

use crate::error::{PodcastError, Result};

/// One raw entry from the blog feed, before any derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: String,
    /// HTML body of the post.
    pub content: String,
    /// Timestamp exactly as written in the feed.
    pub published: String,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FeedEntry>>;
}

pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn download(&self) -> reqwest::Result<String> {
        self.client
            .get(&self.url)
            .header(USER_AGENT, concat!("blogcast/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Vec<FeedEntry>> {
        info!("Fetching blog feed from {}", self.url);
        let body = self
            .download()
            .await
            .map_err(|e| PodcastError::SourceUnavailable {
                message: format!("{}: {}", self.url, e),
            })?;
        let entries = parse_feed(&body)?;
        info!("Found {} entries in feed", entries.len());
        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Summary,
    Content,
    Published,
}

fn field_for(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"summary" | b"description" => Some(Field::Summary),
        // content:encoded in RSS, content in Atom
        b"content" | b"encoded" => Some(Field::Content),
        b"published" | b"pubDate" | b"updated" | b"date" => Some(Field::Published),
        _ => None,
    }
}

fn atom_link_href(e: &BytesStart) -> Result<Option<String>> {
    let rel = e
        .try_get_attribute("rel")
        .map_err(parse_error)?
        .map(|a| a.unescape_value().map(|v| v.into_owned()))
        .transpose()
        .map_err(parse_error)?;
    if rel.as_deref().is_some_and(|rel| rel != "alternate") {
        return Ok(None);
    }
    e.try_get_attribute("href")
        .map_err(parse_error)?
        .map(|a| a.unescape_value().map(|v| v.into_owned()))
        .transpose()
        .map_err(parse_error)
}

fn parse_error(e: impl std::fmt::Display) -> PodcastError {
    PodcastError::FeedParse {
        message: e.to_string(),
    }
}

impl FeedEntry {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
            Field::Published => &mut self.published,
        };
        // first occurrence wins (Atom has both published and updated)
        if slot.is_empty() {
            *slot = value;
        }
    }
}

/// Parse an RSS 2.0 or Atom document into entries, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => current = Some(FeedEntry::default()),
                    other if current.is_some() && field.is_none() => {
                        if other == b"link" {
                            if let (Some(entry), Some(href)) = (current.as_mut(), atom_link_href(&e)?) {
                                entry.set(Field::Link, href);
                            }
                        }
                        field = field_for(other);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"link" {
                    if let (Some(entry), Some(href)) = (current.as_mut(), atom_link_href(&e)?) {
                        entry.set(Field::Link, href);
                    }
                }
            }
            Event::Text(e) => {
                if field.is_some() {
                    text.push_str(&e.unescape().map_err(parse_error)?);
                }
            }
            Event::CData(e) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => {
                        if let Some(entry) = current.take() {
                            debug!("Parsed feed entry '{}'", entry.title);
                            entries.push(entry);
                        }
                        field = None;
                    }
                    other => {
                        if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                            if field_for(other) == Some(f) {
                                entry.set(f, text.trim().to_string());
                                field = None;
                                text.clear();
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <link href="https://blog.example/" rel="alternate"/>
  <entry>
    <title>First &amp; foremost</title>
    <link href="https://blog.example/first" rel="alternate"/>
    <published>2024-01-02T10:00:00+01:00</published>
    <updated>2024-02-02T10:00:00+01:00</updated>
    <summary type="html">A summary</summary>
    <content type="html">&lt;p&gt;Hello &lt;em&gt;there&lt;/em&gt;.&lt;/p&gt;</content>
  </entry>
  <entry>
    <title>Second</title>
    <link href="https://blog.example/second.atom" rel="self"/>
    <link href="https://blog.example/second"/>
    <updated>2024-03-02T10:00:00Z</updated>
    <content type="html"><![CDATA[<p>Body</p>]]></content>
  </entry>
</feed>"#;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Blog</title>
    <link>https://blog.example/</link>
    <item>
      <title>Post</title>
      <link>https://blog.example/post</link>
      <description>Short description</description>
      <content:encoded><![CDATA[<p>Full <b>text</b></p>]]></content:encoded>
      <pubDate>Tue, 05 Mar 2024 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_atom_feed() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title, "First & foremost");
        assert_eq!(first.link, "https://blog.example/first");
        assert_eq!(first.published, "2024-01-02T10:00:00+01:00");
        assert_eq!(first.summary, "A summary");
        assert_eq!(first.content, "<p>Hello <em>there</em>.</p>");

        let second = &entries[1];
        assert_eq!(second.link, "https://blog.example/second");
        assert_eq!(second.published, "2024-03-02T10:00:00Z");
        assert_eq!(second.content, "<p>Body</p>");
    }

    #[test]
    fn test_parse_rss_feed() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(
            entries,
            vec![FeedEntry {
                title: "Post".to_string(),
                link: "https://blog.example/post".to_string(),
                summary: "Short description".to_string(),
                content: "<p>Full <b>text</b></p>".to_string(),
                published: "Tue, 05 Mar 2024 10:00:00 +0000".to_string(),
            }]
        );
    }

    #[test]
    fn test_channel_metadata_is_not_an_entry() {
        let entries = parse_feed("<rss><channel><title>Only</title></channel></rss>").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let result = parse_feed("<rss><channel><item><title>x</item></channel></rss>");
        assert!(matches!(result, Err(PodcastError::FeedParse { .. })));
    }
}
