mod args;

use anyhow::{Context, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, TtsBackend};
use blogcast::RunState;
use blogcast::feed::HttpFeedSource;
use blogcast::notify::WebhookNotifier;
use blogcast::pipeline::Podcaster;
use blogcast::prepare::{LlmPreparer, PlainPreparer, TextPreparer};
use blogcast::retry::RetryPolicy;
use blogcast::storage::LocalStore;
use blogcast::tts::{HttpSpeechBackend, PiperBackend, SpeechBackend, SynthesisClient, VoiceReference};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting blog-to-podcast run for {}", args.feed_url);

    let preparer: Arc<dyn TextPreparer> = if args.no_llm {
        info!("Reading articles verbatim (LLM rewriting disabled)");
        Arc::new(PlainPreparer)
    } else {
        let api_key = args
            .llm_api_key
            .clone()
            .context("an LLM API key is required unless --no-llm is set")?;
        Arc::new(LlmPreparer::new(&args.llm_url, api_key, &args.llm_model))
    };

    let (backend, voice): (Arc<dyn SpeechBackend>, VoiceReference) = match args.tts_backend {
        TtsBackend::Http => {
            let Some(url) = &args.tts_url else {
                bail!("--tts-url is required for the http backend");
            };
            let voice = VoiceReference::load_sample(&args.voice_reference)
                .await
                .with_context(|| format!("cannot read reference voice {}", args.voice_reference.display()))?;
            let backend: Arc<dyn SpeechBackend> = Arc::new(HttpSpeechBackend::new(url, args.tts_api_key.clone()));
            (backend, voice)
        }
        TtsBackend::Piper => {
            if !args.piper_model.exists() {
                error!("Piper model not found: {}", args.piper_model.display());
                bail!("piper model {} does not exist", args.piper_model.display());
            }
            let work_dir = std::env::temp_dir().join("blogcast");
            let backend: Arc<dyn SpeechBackend> = Arc::new(PiperBackend::new(&args.piper_bin, work_dir));
            (backend, VoiceReference::Model(args.piper_model.clone()))
        }
    };

    let synthesis = SynthesisClient::new(backend, voice, args.synthesis_params())
        .with_chunk_timeout(Duration::from_secs(args.chunk_timeout_secs))
        .with_max_parallel(args.max_parallel_chunks)
        .with_retry(RetryPolicy::default().with_max_retries(args.chunk_retries));

    let store = LocalStore::open(&args.storage_dir).await?;
    let mut podcaster = Podcaster::new(
        Arc::new(HttpFeedSource::new(&args.feed_url)),
        preparer,
        synthesis,
        Arc::new(store),
        args.podcast_meta(),
        args.pipeline_config(),
    );
    if let Some(hook) = &args.rebuild_hook {
        podcaster = podcaster.with_notifier(Arc::new(WebhookNotifier::new(hook)));
    }

    let summary = podcaster.run().await?;
    info!(
        "Scanned {}, up to date {}, skipped {}, synthesized {}, failed {}",
        summary.scanned, summary.up_to_date, summary.skipped, summary.synthesized, summary.failed
    );
    match summary.state() {
        RunState::Done => info!("Process complete."),
        RunState::Stale => {
            warn!("Podcast feed or episode index could not be written; the next run repairs them");
            std::process::exit(2);
        }
        RunState::Failed { failed } => {
            warn!("{} articles failed; they will be retried on the next run", failed);
            std::process::exit(2);
        }
    }
    Ok(())
}
