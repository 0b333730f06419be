//! Turn a blog feed into a narrated podcast, one new article at a time.

pub mod article;
pub mod audio;
pub mod chunker;
pub mod detect;
pub mod error;
pub mod feed;
pub mod notify;
pub mod pipeline;
pub mod podcast;
pub mod prepare;
pub mod retry;
pub mod storage;
pub mod tts;

pub use error::{PodcastError, Result};
pub use pipeline::{PartialPolicy, PipelineConfig, Podcaster, RunState, RunSummary};
