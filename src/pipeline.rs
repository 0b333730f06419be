//! The incremental blog-to-podcast run.
//!
//! Scan the blog feed, find articles without an episode, and for each one
//! (oldest first) prepare text, synthesize, stitch, persist and republish the
//! podcast feed. Article-level failures are logged and counted; only a run-wide
//! failure aborts before any article is processed.

use clap::ValueEnum;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::article::{Article, articles_from_entries};
use crate::audio::{AudioFormat, encode, stitch, wav_duration_seconds};
use crate::chunker::chunk_text;
use crate::detect::{EpisodeIndex, unsynthesized};
use crate::error::{PodcastError, Result};
use crate::feed::FeedSource;
use crate::notify::RebuildNotifier;
use crate::podcast::{Episode, PodcastMeta, render_feed};
use crate::prepare::TextPreparer;
use crate::retry::{RetryPolicy, with_retry};
use crate::storage::ObjectStore;
use crate::tts::SynthesisClient;

/// What to do with an article when only some of its chunks synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PartialPolicy {
    /// Publish a shorter episode made of the chunks that worked.
    #[default]
    Keep,
    /// Treat the article as failed.
    Discard,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_chars: usize,
    pub crossfade: Duration,
    /// Only the most recent `recent` valid articles are considered.
    pub recent: usize,
    pub partial_policy: PartialPolicy,
    pub audio_format: AudioFormat,
    pub feed_key: String,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chars: 300,
            crossfade: Duration::from_millis(50),
            recent: 25,
            partial_policy: PartialPolicy::Keep,
            audio_format: AudioFormat::Mp3,
            feed_key: "podcast.xml".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Done,
    /// Every article went through, but the podcast feed or the episode index
    /// could not be written. The next run repairs both.
    Stale,
    /// Some articles failed; everything else was still published.
    Failed { failed: usize },
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scanned: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub synthesized: usize,
    pub failed: usize,
    /// Ids of the articles published by this run, in order.
    pub published: Vec<String>,
    /// The stored podcast feed does not reflect every stored episode.
    pub feed_stale: bool,
    /// The stored episode index misses episodes written by this run.
    pub index_stale: bool,
}

impl RunSummary {
    pub fn rebuild_needed(&self) -> bool {
        self.synthesized > 0
    }

    pub fn state(&self) -> RunState {
        if self.failed > 0 {
            RunState::Failed {
                failed: self.failed,
            }
        } else if self.feed_stale || self.index_stale {
            RunState::Stale
        } else {
            RunState::Done
        }
    }
}

struct StoredEpisode {
    key: String,
    bytes: u64,
}

pub struct Podcaster {
    source: Arc<dyn FeedSource>,
    preparer: Arc<dyn TextPreparer>,
    synthesis: SynthesisClient,
    store: Arc<dyn ObjectStore>,
    notifier: Option<Arc<dyn RebuildNotifier>>,
    meta: PodcastMeta,
    config: PipelineConfig,
}

fn mime_for_key(key: &str) -> &'static str {
    if key.ends_with(".wav") {
        AudioFormat::Wav.mime_type()
    } else {
        AudioFormat::Mp3.mime_type()
    }
}

impl Podcaster {
    pub fn new(
        source: Arc<dyn FeedSource>,
        preparer: Arc<dyn TextPreparer>,
        synthesis: SynthesisClient,
        store: Arc<dyn ObjectStore>,
        meta: PodcastMeta,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            preparer,
            synthesis,
            store,
            notifier: None,
            meta,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RebuildNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Every known article, oldest first.
    async fn scan(&self) -> Result<Vec<Article>> {
        let entries = self.source.fetch().await?;
        let articles = articles_from_entries(entries);
        info!("Found {} articles", articles.len());
        Ok(articles)
    }

    /// The most recent articles, the only ones considered for synthesis.
    fn window<'a>(&self, articles: &'a [Article]) -> &'a [Article] {
        &articles[articles.len().saturating_sub(self.config.recent)..]
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let articles = self.scan().await?;
        let mut index = EpisodeIndex::load(self.store.as_ref()).await?;

        let window = self.window(&articles);
        let existing = index.ids();
        let mut candidates: Vec<Article> = unsynthesized(window, &existing)
            .into_iter()
            .cloned()
            .collect();
        candidates.sort_by_key(|article| article.published);
        info!("Found {} articles to synthesize", candidates.len());

        let mut summary = RunSummary {
            scanned: window.len(),
            up_to_date: window.len() - candidates.len(),
            ..RunSummary::default()
        };

        let mut index_dirty = false;
        for article in candidates {
            info!("Processing #{} '{}'", article.number, article.title);
            match self.process(article.clone()).await {
                Ok(stored) => {
                    summary.synthesized += 1;
                    summary.published.push(article.id.clone());
                    index.record(&article.id, &stored.key, stored.bytes);
                    index_dirty = match self.save_index(&index).await {
                        Ok(()) => false,
                        Err(e) => {
                            warn!("Failed to save episode index, retrying at the end of the run: {}", e);
                            true
                        }
                    };
                    if let Err(e) = self.publish(&articles, &index).await {
                        warn!("Failed to publish podcast feed, retrying at the end of the run: {}", e);
                    }
                }
                Err(e @ PodcastError::PreparationFailed { .. }) => {
                    warn!("Skipping '{}': {}", article.title, e);
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to synthesize '{}': {}", article.title, e);
                    summary.failed += 1;
                }
            }
        }

        if index_dirty {
            if let Err(e) = self.save_index(&index).await {
                error!("Episode index is missing new episodes: {}", e);
                summary.index_stale = true;
            }
        }
        if let Err(e) = self.sync_feed(&articles, &index).await {
            error!("Podcast feed is out of date: {}", e);
            summary.feed_stale = true;
        }

        if summary.rebuild_needed() {
            if let Some(notifier) = &self.notifier {
                if let Err(e) = notifier.notify(summary.synthesized).await {
                    warn!("Rebuild notification failed: {}", e);
                }
            }
        }

        info!(
            "Run finished: {} scanned, {} up to date, {} skipped, {} synthesized, {} failed",
            summary.scanned, summary.up_to_date, summary.skipped, summary.synthesized, summary.failed
        );
        Ok(summary)
    }

    /// Prepare, synthesize, stitch and persist one article.
    async fn process(&self, article: Article) -> Result<StoredEpisode> {
        let article = self.prepare(article).await?;
        let narration = article.narration.as_deref().unwrap_or_default();

        let chunks = chunk_text(narration, self.config.max_chars);
        info!("Split narration into {} chunks", chunks.len());
        let batch = self.synthesis.synthesize(&chunks).await;

        if batch.all_failed() {
            return Err(PodcastError::AllChunksFailed { chunks: batch.len() });
        }
        if batch.any_failed() {
            let failed = batch.failed_indices().len();
            match self.config.partial_policy {
                PartialPolicy::Keep => warn!(
                    "Publishing '{}' without {} of {} chunks",
                    article.title,
                    failed,
                    batch.len()
                ),
                PartialPolicy::Discard => {
                    return Err(PodcastError::PartialSynthesis {
                        failed,
                        chunks: batch.len(),
                    });
                }
            }
        }

        let segments = batch.into_audio();
        let crossfade = self.config.crossfade;
        let track = tokio::task::spawn_blocking(move || stitch(&segments, crossfade))
            .await
            .map_err(|e| PodcastError::InvalidAudio {
                message: format!("stitching task failed: {}", e),
            })??;
        if let Ok(seconds) = wav_duration_seconds(&track) {
            info!("Stitched episode is {:.1} seconds long", seconds);
        }
        let audio = encode(track, self.config.audio_format).await?;

        self.persist(&article, &audio).await
    }

    async fn prepare(&self, article: Article) -> Result<Article> {
        let preparer = self.preparer.as_ref();
        let target = &article;
        let text = with_retry(&self.config.retry, "text preparation", move || preparer.prepare(target))
            .await
            .map_err(|e| match e {
                e @ PodcastError::PreparationFailed { .. } => e,
                other => PodcastError::PreparationFailed {
                    title: article.title.clone(),
                    message: other.to_string(),
                },
            })?;
        if text.trim().is_empty() {
            return Err(PodcastError::PreparationFailed {
                title: article.title.clone(),
                message: "no narration text produced".to_string(),
            });
        }
        debug!("Narration for '{}' is {} chars", article.title, text.chars().count());
        Ok(article.with_narration(text))
    }

    /// Write the finished episode. Only called with the complete track in hand.
    async fn persist(&self, article: &Article, audio: &[u8]) -> Result<StoredEpisode> {
        let key = format!("{}.{}", article.id, self.config.audio_format.extension());
        let store = self.store.as_ref();
        let target = key.as_str();
        with_retry(&self.config.retry, "episode upload", move || store.put(target, audio)).await?;
        info!("Uploaded episode {} ({} bytes)", key, audio.len());
        Ok(StoredEpisode {
            key,
            bytes: audio.len() as u64,
        })
    }

    async fn save_index(&self, index: &EpisodeIndex) -> Result<()> {
        let store = self.store.as_ref();
        with_retry(&self.config.retry, "episode index upload", move || index.save(store)).await
    }

    /// Render the whole podcast feed from the articles with an episode.
    fn render(&self, articles: &[Article], index: &EpisodeIndex) -> Result<(Vec<u8>, usize)> {
        let episodes: Vec<Episode> = articles
            .iter()
            .filter_map(|article| {
                let record = index.get(&article.id)?;
                Some(Episode {
                    article,
                    key: &record.key,
                    bytes: record.bytes,
                    mime_type: mime_for_key(&record.key),
                })
            })
            .collect();
        let xml = render_feed(&self.meta, &self.config.feed_key, &episodes)?;
        Ok((xml, episodes.len()))
    }

    async fn upload_feed(&self, xml: &[u8], episodes: usize) -> Result<()> {
        let store = self.store.as_ref();
        let key = self.config.feed_key.as_str();
        with_retry(&self.config.retry, "podcast feed upload", move || store.put(key, xml)).await?;
        info!("Published podcast feed with {} episodes", episodes);
        Ok(())
    }

    async fn publish(&self, articles: &[Article], index: &EpisodeIndex) -> Result<()> {
        let (xml, episodes) = self.render(articles, index)?;
        self.upload_feed(&xml, episodes).await
    }

    /// Make the stored feed match the index, writing only when it differs.
    async fn sync_feed(&self, articles: &[Article], index: &EpisodeIndex) -> Result<()> {
        let stored = self.store.get(&self.config.feed_key).await?;
        if stored.is_none() && index.is_empty() {
            return Ok(());
        }
        let (xml, episodes) = self.render(articles, index)?;
        if stored.as_deref() == Some(xml.as_slice()) {
            debug!("Podcast feed is up to date");
            return Ok(());
        }
        self.upload_feed(&xml, episodes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_state() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.state(), RunState::Done);
        assert!(!summary.rebuild_needed());

        summary.synthesized = 2;
        summary.feed_stale = true;
        assert_eq!(summary.state(), RunState::Stale);
        assert!(summary.rebuild_needed());

        summary.failed = 1;
        assert_eq!(summary.state(), RunState::Failed { failed: 1 });
    }

    #[test]
    fn test_mime_for_key() {
        assert_eq!(mime_for_key("abc.wav"), "audio/wav");
        assert_eq!(mime_for_key("abc.mp3"), "audio/mpeg");
    }
}
