use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use blogcast::PartialPolicy;
use blogcast::audio::AudioFormat;
use blogcast::pipeline::PipelineConfig;
use blogcast::podcast::PodcastMeta;
use blogcast::retry::RetryPolicy;
use blogcast::tts::SynthesisParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TtsBackend {
    /// Remote voice-cloning service (multipart POST, WAV response)
    Http,
    /// Local piper executable
    Piper,
}

#[derive(Parser, Debug)]
#[command(name = "blogcast", version, about = "Narrate new blog posts and publish them as a podcast")]
pub struct Args {
    /// Blog RSS or Atom feed to narrate
    #[arg(long, env = "BLOGCAST_FEED_URL")]
    pub feed_url: String,

    /// Only consider this many of the most recent articles
    #[arg(long, default_value_t = 25)]
    pub recent: usize,

    /// Directory episodes, the episode index and the podcast feed are written to
    #[arg(long, env = "BLOGCAST_STORAGE_DIR", default_value = "./podcast")]
    pub storage_dir: PathBuf,

    /// Public URL the storage directory is served from
    #[arg(long, env = "BLOGCAST_PUBLIC_URL")]
    pub public_url: String,

    /// Object name of the podcast feed
    #[arg(long, default_value = "podcast.xml")]
    pub feed_name: String,

    #[arg(long, value_enum, default_value_t = AudioFormat::Mp3)]
    pub audio_format: AudioFormat,

    // Text preparation
    /// Read articles verbatim instead of rewriting them with an LLM
    #[arg(long)]
    pub no_llm: bool,

    #[arg(long, env = "BLOGCAST_LLM_URL", default_value = "https://openrouter.ai/api/v1")]
    pub llm_url: String,

    #[arg(long, env = "BLOGCAST_LLM_MODEL", default_value = "openai/gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    // Synthesis
    #[arg(long, value_enum, default_value_t = TtsBackend::Http)]
    pub tts_backend: TtsBackend,

    /// Synthesis endpoint for the http backend
    #[arg(long, env = "BLOGCAST_TTS_URL")]
    pub tts_url: Option<String>,

    #[arg(long, env = "BLOGCAST_TTS_API_KEY", hide_env_values = true)]
    pub tts_api_key: Option<String>,

    /// Reference recording of the narrator's voice (http backend)
    #[arg(long, default_value = "./data/reference.wav")]
    pub voice_reference: PathBuf,

    /// Voice model for the piper backend
    #[arg(long, default_value = "./tts/en_US-hfc_male-medium.onnx")]
    pub piper_model: PathBuf,

    #[arg(long, default_value = "piper")]
    pub piper_bin: String,

    #[arg(long, default_value_t = 300)]
    pub chunk_chars: usize,

    #[arg(long, default_value_t = 0.2)]
    pub exaggeration: f32,

    #[arg(long, default_value_t = 0.6)]
    pub cfg_weight: f32,

    #[arg(long, default_value_t = 0.5)]
    pub temperature: f32,

    /// Give up on a chunk after this many seconds
    #[arg(long, default_value_t = 300)]
    pub chunk_timeout_secs: u64,

    /// Chunks synthesized at the same time
    #[arg(long, default_value_t = 5)]
    pub max_parallel_chunks: usize,

    /// Extra attempts per chunk
    #[arg(long, default_value_t = 1)]
    pub chunk_retries: u32,

    /// Extra attempts for text preparation and storage writes
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    #[arg(long, value_enum, default_value_t = PartialPolicy::Keep)]
    pub on_partial_failure: PartialPolicy,

    #[arg(long, default_value_t = 50)]
    pub crossfade_ms: u64,

    // Publishing
    /// URL to POST to when new episodes were published
    #[arg(long, env = "BLOGCAST_REBUILD_HOOK")]
    pub rebuild_hook: Option<String>,

    #[arg(long, default_value = "Blog articles")]
    pub podcast_title: String,

    #[arg(long, default_value = "Narrated articles from the blog.")]
    pub podcast_description: String,

    /// Defaults to the feed's site
    #[arg(long)]
    pub podcast_website: Option<String>,

    #[arg(long)]
    pub podcast_image: Option<String>,

    #[arg(long, default_value = "Unknown author")]
    pub podcast_author: String,

    #[arg(long)]
    pub podcast_email: Option<String>,

    #[arg(long, default_value = "Technology")]
    pub podcast_category: String,

    #[arg(long, default_value = "en")]
    pub language: String,

    #[arg(long)]
    pub explicit: bool,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_chars: self.chunk_chars,
            crossfade: Duration::from_millis(self.crossfade_ms),
            recent: self.recent,
            partial_policy: self.on_partial_failure,
            audio_format: self.audio_format,
            feed_key: self.feed_name.clone(),
            retry: RetryPolicy::default().with_max_retries(self.retries),
        }
    }

    pub fn synthesis_params(&self) -> SynthesisParams {
        SynthesisParams {
            exaggeration: self.exaggeration,
            cfg_weight: self.cfg_weight,
            temperature: self.temperature,
        }
    }

    pub fn podcast_meta(&self) -> PodcastMeta {
        let website = self.podcast_website.clone().unwrap_or_else(|| site_of(&self.feed_url));
        PodcastMeta {
            title: self.podcast_title.clone(),
            description: self.podcast_description.clone(),
            website,
            image: self.podcast_image.clone(),
            author: self.podcast_author.clone(),
            email: self.podcast_email.clone(),
            category: self.podcast_category.clone(),
            language: self.language.clone(),
            explicit: self.explicit,
            public_url: self.public_url.clone(),
        }
    }
}

/// `https://blog.example/feed.xml` -> `https://blog.example`
fn site_of(feed_url: &str) -> String {
    match feed_url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{}://{}", scheme, host)
        }
        None => feed_url.to_string(),
    }
}
