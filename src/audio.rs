//! WAV stitching and episode encoding.

use clap::ValueEnum;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PodcastError, Result};

/// Container format of the published episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }
}

pub fn wav_duration_seconds(wav: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    let frames = reader.len() as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}

fn describe(spec: &WavSpec) -> String {
    let kind = match spec.sample_format {
        SampleFormat::Int => "int",
        SampleFormat::Float => "float",
    };
    format!(
        "{}ch {}Hz {}bit {}",
        spec.channels, spec.sample_rate, spec.bits_per_sample, kind
    )
}

enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

struct Segment {
    spec: WavSpec,
    samples: Samples,
}

fn decode(wav: &[u8]) -> Result<Segment> {
    let mut reader = WavReader::new(Cursor::new(wav))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Int => Samples::Int(reader.samples::<i32>().collect::<std::result::Result<_, _>>()?),
        SampleFormat::Float => Samples::Float(reader.samples::<f32>().collect::<std::result::Result<_, _>>()?),
    };
    Ok(Segment { spec, samples })
}

fn encode_wav(segment: &Segment) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, segment.spec)?;
        match &segment.samples {
            Samples::Int(samples) => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
            Samples::Float(samples) => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

trait Mix: Copy {
    /// Blend a fading-out sample with a fading-in one; `t` is the fade-in gain.
    fn mix(out: Self, inn: Self, t: f64) -> Self;
}

impl Mix for i32 {
    fn mix(out: Self, inn: Self, t: f64) -> Self {
        (out as f64 * (1.0 - t) + inn as f64 * t).round() as i32
    }
}

impl Mix for f32 {
    fn mix(out: Self, inn: Self, t: f64) -> Self {
        (out as f64 * (1.0 - t) + inn as f64 * t) as f32
    }
}

/// Append `next` to `track`, overlapping up to `overlap_frames` frames with a
/// linear fade-out of the tail and fade-in of the head.
fn append_crossfaded<S: Mix>(track: &mut Vec<S>, next: &[S], overlap_frames: usize, channels: usize) {
    let overlap = overlap_frames
        .min(track.len() / channels)
        .min(next.len() / channels);
    let overlap_samples = overlap * channels;
    let start = track.len() - overlap_samples;
    for frame in 0..overlap {
        let t = (frame + 1) as f64 / (overlap + 1) as f64;
        for ch in 0..channels {
            let i = frame * channels + ch;
            track[start + i] = S::mix(track[start + i], next[i], t);
        }
    }
    track.extend_from_slice(&next[overlap_samples..]);
}

/// Join WAV segments in order, crossfading every boundary.
///
/// All segments must share one sample format; nothing is resampled. A single
/// segment comes back unchanged.
pub fn stitch(segments: &[Vec<u8>], crossfade: Duration) -> Result<Vec<u8>> {
    let (first_bytes, rest) = segments.split_first().ok_or(PodcastError::EmptyInput)?;
    let mut track = decode(first_bytes)?;
    if rest.is_empty() {
        return Ok(first_bytes.clone());
    }

    let channels = track.spec.channels.max(1) as usize;
    let overlap_frames =
        (crossfade.as_micros() * track.spec.sample_rate as u128 / 1_000_000) as usize;

    for (offset, bytes) in rest.iter().enumerate() {
        let index = offset + 1;
        let next = decode(bytes)?;
        if next.spec != track.spec {
            return Err(PodcastError::FormatMismatch {
                index,
                expected: describe(&track.spec),
                actual: describe(&next.spec),
            });
        }
        match (&mut track.samples, &next.samples) {
            (Samples::Int(acc), Samples::Int(more)) => append_crossfaded(acc, more, overlap_frames, channels),
            (Samples::Float(acc), Samples::Float(more)) => append_crossfaded(acc, more, overlap_frames, channels),
            // equal specs imply equal sample formats
            _ => unreachable!("sample format checked above"),
        }
    }

    let stitched = encode_wav(&track)?;
    debug!(
        "Stitched {} segments ({} frame crossfade) into {} bytes",
        segments.len(),
        overlap_frames,
        stitched.len()
    );
    Ok(stitched)
}

/// Convert a stitched WAV track into the published format.
pub async fn encode(wav: Vec<u8>, format: AudioFormat) -> Result<Vec<u8>> {
    match format {
        AudioFormat::Wav => Ok(wav),
        AudioFormat::Mp3 => wav_to_mp3(wav).await,
    }
}

async fn wav_to_mp3(wav: Vec<u8>) -> Result<Vec<u8>> {
    info!("Encoding {} bytes of WAV to MP3 with ffmpeg", wav.len());
    let mut child = Command::new("ffmpeg")
        .args([
            "-hide_banner", "-loglevel", "error", "-f", "wav", "-i", "pipe:0", "-map_metadata", "-1",
            "-codec:a", "libmp3lame", "-q:a", "2", "-bitexact", "-f", "mp3", "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PodcastError::Encoding {
            message: format!("failed to spawn ffmpeg: {}", e),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| PodcastError::Encoding {
        message: "ffmpeg stdin unavailable".to_string(),
    })?;
    let feeder = tokio::spawn(async move {
        stdin.write_all(&wav).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(PodcastError::Encoding {
            message: format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    feeder
        .await
        .map_err(|e| PodcastError::Encoding {
            message: format!("ffmpeg input task failed: {}", e),
        })??;

    debug!("ffmpeg produced {} bytes of MP3", output.stdout.len());
    Ok(output.stdout)
}
