//! Podcast RSS rendering.
//!
//! The document is rebuilt from scratch every time and contains no build
//! timestamps, so the same episodes always render to the same bytes.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

use crate::article::Article;
use crate::error::{PodcastError, Result};

/// Channel-level metadata of the published podcast.
#[derive(Debug, Clone, PartialEq)]
pub struct PodcastMeta {
    pub title: String,
    pub description: String,
    pub website: String,
    pub image: Option<String>,
    pub author: String,
    pub email: Option<String>,
    pub category: String,
    pub language: String,
    pub explicit: bool,
    /// Public base URL the storage namespace is served from.
    pub public_url: String,
}

/// One published episode.
#[derive(Debug, Clone, Copy)]
pub struct Episode<'a> {
    pub article: &'a Article,
    pub key: &'a str,
    pub bytes: u64,
    pub mime_type: &'a str,
}

impl PodcastMeta {
    pub fn episode_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), key)
    }
}

struct FeedWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

fn write_error(e: impl std::fmt::Display) -> PodcastError {
    PodcastError::Storage {
        message: format!("cannot render podcast feed: {}", e),
    }
}

impl FeedWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(write_error)
    }

    fn open(&mut self, start: BytesStart<'_>) -> Result<()> {
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, start: BytesStart<'_>) -> Result<()> {
        self.event(Event::Empty(start))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.open(BytesStart::new(name))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner().into_inner()
    }
}

/// Render the full feed for `episodes`, oldest first. `feed_key` is where the
/// document itself is stored, for the `atom:link rel="self"` element.
pub fn render_feed(meta: &PodcastMeta, feed_key: &str, episodes: &[Episode<'_>]) -> Result<Vec<u8>> {
    let mut w = FeedWriter::new();
    w.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.open(BytesStart::new("rss").with_attributes([
        ("version", "2.0"),
        ("xmlns:itunes", "http://www.itunes.com/dtds/podcast-1.0.dtd"),
        ("xmlns:atom", "http://www.w3.org/2005/Atom"),
    ]))?;
    w.open(BytesStart::new("channel"))?;

    w.text_element("title", &meta.title)?;
    w.text_element("link", &meta.website)?;
    w.text_element("description", &meta.description)?;
    w.text_element("language", &meta.language)?;
    let self_url = meta.episode_url(feed_key);
    w.empty(BytesStart::new("atom:link").with_attributes([
        ("href", self_url.as_str()),
        ("rel", "self"),
        ("type", "application/rss+xml"),
    ]))?;
    w.text_element("itunes:author", &meta.author)?;
    w.text_element("itunes:explicit", if meta.explicit { "true" } else { "false" })?;
    w.empty(BytesStart::new("itunes:category").with_attributes([("text", meta.category.as_str())]))?;
    if let Some(image) = &meta.image {
        w.empty(BytesStart::new("itunes:image").with_attributes([("href", image.as_str())]))?;
        w.open(BytesStart::new("image"))?;
        w.text_element("url", image)?;
        w.text_element("title", &meta.title)?;
        w.text_element("link", &meta.website)?;
        w.close("image")?;
    }
    if let Some(email) = &meta.email {
        w.open(BytesStart::new("itunes:owner"))?;
        w.text_element("itunes:name", &meta.author)?;
        w.text_element("itunes:email", email)?;
        w.close("itunes:owner")?;
    }

    for episode in episodes {
        let article = episode.article;
        let url = meta.episode_url(episode.key);
        let length = episode.bytes.to_string();

        w.open(BytesStart::new("item"))?;
        w.text_element("title", &article.episode_title())?;
        w.text_element("link", &article.link)?;
        w.text_element("description", &article.summary)?;
        w.open(BytesStart::new("guid").with_attributes([("isPermaLink", "false")]))?;
        w.event(Event::Text(BytesText::new(&url)))?;
        w.close("guid")?;
        w.empty(BytesStart::new("enclosure").with_attributes([
            ("url", url.as_str()),
            ("length", length.as_str()),
            ("type", episode.mime_type),
        ]))?;
        w.text_element("pubDate", &article.published.to_rfc2822())?;
        w.text_element("itunes:episode", &article.number.to_string())?;
        w.close("item")?;
    }

    w.close("channel")?;
    w.close("rss")?;
    Ok(w.finish())
}
