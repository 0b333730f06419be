//! Change detection: which articles still need an episode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::article::Article;
use crate::error::{PodcastError, Result};
use crate::storage::ObjectStore;

/// Key of the episode index document.
pub const INDEX_KEY: &str = "episodes.json";

/// Extensions recognised when rebuilding the index from a storage listing.
const AUDIO_EXTENSIONS: [&str; 2] = ["mp3", "wav"];

/// Articles whose id has no stored episode, in their original order.
pub fn unsynthesized<'a>(articles: &'a [Article], existing_ids: &HashSet<String>) -> Vec<&'a Article> {
    articles
        .iter()
        .filter(|article| !existing_ids.contains(&article.id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Storage key of the audio object.
    pub key: String,
    /// Size of the audio object, 0 when unknown.
    pub bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Index of synthesized episodes keyed by article id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeIndex {
    episodes: BTreeMap<String, EpisodeRecord>,
}

impl EpisodeIndex {
    /// Load the index snapshot for this run.
    ///
    /// Falls back to deriving ids from `{id}.{ext}` keys when no index has
    /// been written yet.
    pub async fn load(store: &dyn ObjectStore) -> Result<Self> {
        if let Some(bytes) = store.get(INDEX_KEY).await? {
            let index: Self = serde_json::from_slice(&bytes).map_err(|e| PodcastError::Storage {
                message: format!("corrupt {}: {}", INDEX_KEY, e),
            })?;
            info!("Loaded episode index with {} episodes", index.len());
            return Ok(index);
        }

        let keys = store.list().await?;
        let index = Self::from_keys(keys.iter().map(String::as_str));
        if !index.is_empty() {
            warn!(
                "No {} found; rebuilt index from storage listing ({} episodes)",
                INDEX_KEY,
                index.len()
            );
        }
        Ok(index)
    }

    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let now = Utc::now();
        let episodes = keys
            .into_iter()
            .filter_map(|key| {
                let (stem, ext) = key.rsplit_once('.')?;
                if stem.is_empty() || !AUDIO_EXTENSIONS.contains(&ext) {
                    return None;
                }
                Some((
                    stem.to_string(),
                    EpisodeRecord {
                        key: key.to_string(),
                        bytes: 0,
                        created_at: now,
                    },
                ))
            })
            .collect();
        Self { episodes }
    }

    pub async fn save(&self, store: &dyn ObjectStore) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| PodcastError::Storage {
            message: format!("cannot serialize episode index: {}", e),
        })?;
        store.put(INDEX_KEY, &bytes).await
    }

    pub fn record(&mut self, id: &str, key: &str, bytes: u64) {
        self.episodes.insert(
            id.to_string(),
            EpisodeRecord {
                key: key.to_string(),
                bytes,
                created_at: Utc::now(),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.episodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&EpisodeRecord> {
        self.episodes.get(id)
    }

    pub fn ids(&self) -> HashSet<String> {
        self.episodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{articles_from_entries, article_id};
    use crate::feed::FeedEntry;
    use crate::storage::MemoryStore;

    fn articles(links: &[&str]) -> Vec<Article> {
        let entries = links
            .iter()
            .enumerate()
            .map(|(i, link)| FeedEntry {
                title: link.to_string(),
                link: link.to_string(),
                summary: String::new(),
                content: "x".repeat(200),
                published: format!("2024-01-{:02}T00:00:00Z", i + 1),
            })
            .collect();
        articles_from_entries(entries)
    }

    #[test]
    fn test_unsynthesized_returns_missing_ids_in_order() {
        let all = articles(&["a", "b", "c", "d"]);
        let existing = HashSet::from([article_id("b"), article_id("zzz")]);
        let before = all.clone();

        let missing: Vec<&str> = unsynthesized(&all, &existing)
            .iter()
            .map(|a| a.link.as_str())
            .collect();

        assert_eq!(missing, vec!["a", "c", "d"]);
        assert_eq!(all, before);
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn test_unsynthesized_with_everything_done_is_empty() {
        let all = articles(&["a", "b"]);
        let existing: HashSet<String> = all.iter().map(|a| a.id.clone()).collect();
        assert!(unsynthesized(&all, &existing).is_empty());
    }

    #[test]
    fn test_index_from_keys_only_takes_audio() {
        let index = EpisodeIndex::from_keys(["abc.mp3", "def.wav", "podcast.xml", "episodes.json", "noext"]);
        assert_eq!(index.ids(), HashSet::from(["abc".to_string(), "def".to_string()]));
        assert_eq!(index.get("abc").unwrap().key, "abc.mp3");
    }

    #[tokio::test]
    async fn test_index_bootstraps_from_listing_then_prefers_saved_index() {
        let store = MemoryStore::new();
        store.put("abc.mp3", b"audio").await.unwrap();

        let mut index = EpisodeIndex::load(&store).await.unwrap();
        assert!(index.contains("abc"));

        index.record("def", "def.mp3", 42);
        index.save(&store).await.unwrap();

        // an orphaned object no longer counts once the index exists
        store.put("ghi.mp3", b"audio").await.unwrap();
        let reloaded = EpisodeIndex::load(&store).await.unwrap();
        assert_eq!(reloaded, index);
        assert!(!reloaded.contains("ghi"));
        assert_eq!(reloaded.get("def").unwrap().bytes, 42);
    }

    #[tokio::test]
    async fn test_corrupt_index_is_an_error() {
        let store = MemoryStore::new();
        store.put(INDEX_KEY, b"{not json").await.unwrap();
        assert!(EpisodeIndex::load(&store).await.is_err());
    }
}
