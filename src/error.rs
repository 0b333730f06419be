//! Error types for blogcast.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodcastError {
    // Run-wide failures
    #[error("Feed source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("Failed to parse feed: {message}")]
    FeedParse { message: String },

    // Per-article failures
    #[error("Text preparation failed for '{title}': {message}")]
    PreparationFailed { title: String, message: String },

    #[error("Synthesis failed for chunk {index}: {message}")]
    ChunkSynthesisFailed { index: usize, message: String },

    #[error("Speech backend error: {message}")]
    Backend { message: String },

    #[error("Timed out after {after:?}")]
    Timeout { after: std::time::Duration },

    #[error("All {chunks} chunks failed to synthesize")]
    AllChunksFailed { chunks: usize },

    #[error("{failed} of {chunks} chunks failed to synthesize")]
    PartialSynthesis { failed: usize, chunks: usize },

    // Audio errors
    #[error("Cannot stitch an empty list of audio segments")]
    EmptyInput,

    #[error("Audio format mismatch in segment {index}: expected {expected}, got {actual}")]
    FormatMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Invalid audio: {message}")]
    InvalidAudio { message: String },

    #[error("Audio encoding failed: {message}")]
    Encoding { message: String },

    // Storage and downstream
    #[error("Failed to write '{key}' to storage: {message}")]
    StorageWriteFailed { key: String, message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Rebuild notification failed: {message}")]
    Notify { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PodcastError>;

impl From<hound::Error> for PodcastError {
    fn from(e: hound::Error) -> Self {
        PodcastError::InvalidAudio {
            message: e.to_string(),
        }
    }
}
