//! Speech synthesis: backends and the per-article chunk batch client.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::{PodcastError, Result};
use crate::retry::{RetryPolicy, with_retry};

/// Tuning knobs forwarded to the backend untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParams {
    pub exaggeration: f32,
    pub cfg_weight: f32,
    pub temperature: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            exaggeration: 0.2,
            cfg_weight: 0.6,
            temperature: 0.5,
        }
    }
}

/// The voice to speak with.
#[derive(Debug, Clone)]
pub enum VoiceReference {
    /// A reference recording for voice-cloning backends.
    Sample { name: String, wav: Arc<Vec<u8>> },
    /// A voice model file for local engines.
    Model(PathBuf),
}

impl VoiceReference {
    pub async fn load_sample(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let wav = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference.wav".to_string());
        info!("Loaded reference voice {} ({} bytes)", path.display(), wav.len());
        Ok(VoiceReference::Sample {
            name,
            wav: Arc::new(wav),
        })
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Speak `text`, returning WAV bytes.
    async fn synthesize(&self, text: &str, voice: &VoiceReference, params: &SynthesisParams) -> Result<Vec<u8>>;
}

/// Outcome of one chunk, tagged with the chunk's position.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisResult {
    Audio { index: usize, bytes: Vec<u8> },
    Failed { index: usize, reason: String },
}

impl SynthesisResult {
    pub fn index(&self) -> usize {
        match self {
            SynthesisResult::Audio { index, .. } | SynthesisResult::Failed { index, .. } => *index,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SynthesisResult::Failed { .. })
    }
}

/// Results for every chunk of one article, aligned with the chunks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkBatch {
    pub results: Vec<SynthesisResult>,
}

impl ChunkBatch {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| r.is_failed())
            .map(SynthesisResult::index)
            .collect()
    }

    pub fn any_failed(&self) -> bool {
        self.results.iter().any(SynthesisResult::is_failed)
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(SynthesisResult::is_failed)
    }

    /// Audio of the successful chunks, in chunk order.
    pub fn into_audio(self) -> Vec<Vec<u8>> {
        self.results
            .into_iter()
            .filter_map(|r| match r {
                SynthesisResult::Audio { bytes, .. } => Some(bytes),
                SynthesisResult::Failed { .. } => None,
            })
            .collect()
    }
}

/// Synthesizes all chunks of an article concurrently.
pub struct SynthesisClient {
    backend: Arc<dyn SpeechBackend>,
    voice: VoiceReference,
    params: SynthesisParams,
    chunk_timeout: Duration,
    max_parallel: usize,
    retry: RetryPolicy,
}

impl SynthesisClient {
    pub fn new(backend: Arc<dyn SpeechBackend>, voice: VoiceReference, params: SynthesisParams) -> Self {
        Self {
            backend,
            voice,
            params,
            chunk_timeout: Duration::from_secs(300),
            max_parallel: 5,
            retry: RetryPolicy::default().with_max_retries(1),
        }
    }

    pub fn with_chunk_timeout(mut self, chunk_timeout: Duration) -> Self {
        self.chunk_timeout = chunk_timeout;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Synthesize every chunk. Failures are recorded per position, never raised;
    /// the batch is only returned once every chunk has settled.
    pub async fn synthesize(&self, chunks: &[String]) -> ChunkBatch {
        info!(
            "Synthesizing {} chunks ({} in parallel)",
            chunks.len(),
            self.max_parallel
        );
        let results = stream::iter(chunks.iter().enumerate())
            .map(|(index, text)| self.synthesize_chunk(index, text, chunks.len()))
            .buffered(self.max_parallel)
            .collect::<Vec<_>>()
            .await;
        let batch = ChunkBatch { results };
        if batch.any_failed() {
            error!(
                "{} of {} chunks failed: {:?}",
                batch.failed_indices().len(),
                batch.len(),
                batch.failed_indices()
            );
        }
        batch
    }

    async fn synthesize_chunk(&self, index: usize, text: &str, total: usize) -> SynthesisResult {
        debug!(
            "Generating TTS chunk {}/{} ({} chars)",
            index + 1,
            total,
            text.chars().count()
        );
        let label = format!("TTS chunk {}", index + 1);
        let attempt = || async move {
            match timeout(self.chunk_timeout, self.backend.synthesize(text, &self.voice, &self.params)).await {
                Ok(result) => result,
                Err(_) => Err(PodcastError::Timeout {
                    after: self.chunk_timeout,
                }),
            }
        };
        match with_retry(&self.retry, &label, attempt).await {
            Ok(bytes) => {
                debug!("Finished TTS chunk {} ({} bytes)", index + 1, bytes.len());
                SynthesisResult::Audio { index, bytes }
            }
            Err(e) => {
                let failure = PodcastError::ChunkSynthesisFailed {
                    index,
                    message: e.to_string(),
                };
                error!("{}", failure);
                SynthesisResult::Failed {
                    index,
                    reason: failure.to_string(),
                }
            }
        }
    }
}

/// Remote synthesis service taking a multipart form and answering with WAV.
pub struct HttpSpeechBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSpeechBackend {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }

    async fn request(&self, text: &str, name: &str, wav: &[u8], params: &SynthesisParams) -> reqwest::Result<Vec<u8>> {
        let voice = Part::bytes(wav.to_vec())
            .file_name(name.to_string())
            .mime_str("audio/wav")?;
        let form = Form::new()
            .text("text", text.to_string())
            .text("exaggeration", params.exaggeration.to_string())
            .text("cfg_weight", params.cfg_weight.to_string())
            .text("temperature", params.temperature.to_string())
            .part("voice", voice);

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body = request.send().await?.error_for_status()?.bytes().await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    async fn synthesize(&self, text: &str, voice: &VoiceReference, params: &SynthesisParams) -> Result<Vec<u8>> {
        let VoiceReference::Sample { name, wav } = voice else {
            return Err(PodcastError::Backend {
                message: "HTTP backend needs a reference voice sample".to_string(),
            });
        };
        self.request(text, name, wav, params)
            .await
            .map_err(|e| PodcastError::Backend {
                message: e.to_string(),
            })
    }
}

static PIPER_OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local Piper engine. Ignores the tuning parameters it has no equivalent for.
pub struct PiperBackend {
    binary: String,
    work_dir: PathBuf,
}

impl PiperBackend {
    pub fn new(binary: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
        }
    }

    async fn run(&self, model: &Path, text: &str, out_path: &Path) -> Result<Vec<u8>> {
        let failed = |message: String| PodcastError::Backend { message };

        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(model)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to spawn {}: {}", self.binary, e)))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| failed("piper stdin unavailable".to_string()))?;
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(failed(format!(
                "piper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(tokio::fs::read(out_path).await?)
    }
}

#[async_trait]
impl SpeechBackend for PiperBackend {
    async fn synthesize(&self, text: &str, voice: &VoiceReference, _params: &SynthesisParams) -> Result<Vec<u8>> {
        let VoiceReference::Model(model) = voice else {
            return Err(PodcastError::Backend {
                message: "piper needs a voice model path".to_string(),
            });
        };
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let out_path = self.work_dir.join(format!(
            "part_{}_{:06}.wav",
            std::process::id(),
            PIPER_OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result = self.run(model, text, &out_path).await;
        if let Err(e) = tokio::fs::remove_file(&out_path).await {
            debug!("Could not remove {}: {}", out_path.display(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Echoes the chunk text back as bytes, failing chunks that contain a marker.
    struct ScriptedBackend {
        fail_marker: &'static str,
        hang_marker: &'static str,
        seen: Mutex<Vec<String>>,
        params: Mutex<Option<SynthesisParams>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                fail_marker: "FAIL",
                hang_marker: "HANG",
                seen: Mutex::new(Vec::new()),
                params: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SpeechBackend for ScriptedBackend {
        async fn synthesize(&self, text: &str, _voice: &VoiceReference, params: &SynthesisParams) -> Result<Vec<u8>> {
            self.seen.lock().unwrap().push(text.to_string());
            *self.params.lock().unwrap() = Some(*params);
            if text.contains(self.hang_marker) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if text.contains(self.fail_marker) {
                return Err(PodcastError::Backend {
                    message: "scripted failure".to_string(),
                });
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    fn voice() -> VoiceReference {
        VoiceReference::Sample {
            name: "ref.wav".to_string(),
            wav: Arc::new(Vec::new()),
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> SynthesisClient {
        SynthesisClient::new(backend, voice(), SynthesisParams::default())
            .with_retry(RetryPolicy::none())
            .with_chunk_timeout(Duration::from_millis(200))
            .with_max_parallel(3)
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_results_are_aligned_with_chunks() {
        let backend = Arc::new(ScriptedBackend::new());
        let batch = client(backend.clone())
            .synthesize(&chunks(&["one", "two", "three", "four", "five"]))
            .await;

        assert_eq!(batch.len(), 5);
        for (i, result) in batch.results.iter().enumerate() {
            assert_eq!(result.index(), i);
        }
        assert!(!batch.any_failed());
        assert_eq!(
            batch.into_audio(),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec(), b"four".to_vec(), b"five".to_vec()]
        );
        let seen: HashSet<String> = backend.seen.lock().unwrap().iter().cloned().collect();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_abort_siblings() {
        let backend = Arc::new(ScriptedBackend::new());
        let batch = client(backend)
            .synthesize(&chunks(&["a", "b", "FAIL c", "d", "e"]))
            .await;

        assert!(batch.any_failed());
        assert!(!batch.all_failed());
        assert_eq!(batch.failed_indices(), vec![2]);
        assert_eq!(
            batch.results[2],
            SynthesisResult::Failed {
                index: 2,
                reason: "Synthesis failed for chunk 2: Speech backend error: scripted failure".to_string(),
            }
        );
        assert_eq!(
            batch.into_audio(),
            vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec(), b"e".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_all_failed() {
        let backend = Arc::new(ScriptedBackend::new());
        let batch = client(backend).synthesize(&chunks(&["FAIL", "FAIL"])).await;
        assert!(batch.all_failed());
        assert!(batch.into_audio().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_marks_chunk_failed() {
        let backend = Arc::new(ScriptedBackend::new());
        let batch = client(backend).synthesize(&chunks(&["fine", "HANG"])).await;
        assert_eq!(batch.failed_indices(), vec![1]);
        match &batch.results[1] {
            SynthesisResult::Failed { reason, .. } => assert_eq!(reason, "Synthesis failed for chunk 1: Timed out after 200ms"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_params_are_passed_through() {
        let backend = Arc::new(ScriptedBackend::new());
        let params = SynthesisParams {
            exaggeration: 0.9,
            cfg_weight: 0.1,
            temperature: 1.3,
        };
        SynthesisClient::new(backend.clone(), voice(), params)
            .synthesize(&chunks(&["x"]))
            .await;
        assert_eq!(*backend.params.lock().unwrap(), Some(params));
    }

    #[tokio::test]
    async fn test_empty_chunk_list() {
        let backend = Arc::new(ScriptedBackend::new());
        let batch = client(backend).synthesize(&[]).await;
        assert!(batch.is_empty());
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn test_backends_reject_wrong_voice_kind() {
        let http = HttpSpeechBackend::new("http://127.0.0.1:9/tts", None);
        let model = VoiceReference::Model(PathBuf::from("voice.onnx"));
        assert!(http.synthesize("hi", &model, &SynthesisParams::default()).await.is_err());

        let piper = PiperBackend::new("piper", std::env::temp_dir());
        assert!(piper.synthesize("hi", &voice(), &SynthesisParams::default()).await.is_err());
    }
}
