use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::{PodcastError, Result};

/// Told once per run when new episodes were published.
#[async_trait]
pub trait RebuildNotifier: Send + Sync {
    async fn notify(&self, new_episodes: usize) -> Result<()>;
}

/// POSTs to a deploy/build hook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RebuildNotifier for WebhookNotifier {
    async fn notify(&self, new_episodes: usize) -> Result<()> {
        info!("Triggering rebuild hook for {} new episodes", new_episodes);
        self.client
            .post(&self.url)
            .json(&json!({ "new_episodes": new_episodes }))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PodcastError::Notify {
                message: e.to_string(),
            })?;
        Ok(())
    }
}
