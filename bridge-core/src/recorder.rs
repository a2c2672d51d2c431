//! Call recorder (C3): writes per-call WAV tracks, transcripts, and events.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::resample;
use crate::error::{BridgeError, BridgeResult};

const RECORDING_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptChannel {
    Caller,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptRecord {
    pub timestamp: DateTime<Utc>,
    pub channel: TranscriptChannel,
    pub kind: TranscriptKind,
    pub text: String,
    pub confidence: Option<f32>,
    pub duration_ms: Option<u64>,
}

fn mono_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: RECORDING_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn stereo_spec() -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate: RECORDING_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

struct Inner {
    dir: PathBuf,
    caller_writer: Option<WavWriter<BufWriter<std::fs::File>>>,
    bot_writer: Option<WavWriter<BufWriter<std::fs::File>>>,
    caller_samples: Vec<i16>,
    bot_samples: Vec<i16>,
    transcripts: Vec<TranscriptRecord>,
    function_events: Vec<serde_json::Value>,
    session_events: Vec<serde_json::Value>,
    stopped: bool,
}

/// Per-call recorder. One instance per active call, owned by the bridge core.
pub struct CallRecorder {
    inner: Mutex<Inner>,
    bot_source_rate: u32,
}

impl CallRecorder {
    /// Opens the mono WAV writers for `caller.wav` and `bot.wav` under `dir`.
    /// `bot_source_rate` is the AI service's audio sample rate (e.g. 24000);
    /// bot frames are resampled to 16kHz before being written.
    pub fn start(dir: impl Into<PathBuf>, bot_source_rate: u32) -> BridgeResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let caller_writer = WavWriter::create(dir.join("caller.wav"), mono_spec())?;
        let bot_writer = WavWriter::create(dir.join("bot.wav"), mono_spec())?;
        Ok(Self {
            inner: Mutex::new(Inner {
                dir,
                caller_writer: Some(caller_writer),
                bot_writer: Some(bot_writer),
                caller_samples: Vec::new(),
                bot_samples: Vec::new(),
                transcripts: Vec::new(),
                function_events: Vec::new(),
                session_events: Vec::new(),
                stopped: false,
            }),
            bot_source_rate,
        })
    }

    /// Appends 16kHz PCM16LE caller audio.
    pub fn record_caller_frame(&self, pcm16: &[u8]) -> BridgeResult<()> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Ok(());
        }
        let samples = bytes_to_samples(pcm16);
        if let Some(writer) = inner.caller_writer.as_mut() {
            for &s in &samples {
                writer.write_sample(s)?;
            }
        }
        inner.caller_samples.extend_from_slice(&samples);
        Ok(())
    }

    /// Appends AI-service-rate PCM16LE bot audio, resampling to 16kHz first.
    pub fn record_bot_frame(&self, pcm16_at_source_rate: &[u8]) -> BridgeResult<()> {
        let resampled = resample(pcm16_at_source_rate, self.bot_source_rate, RECORDING_SAMPLE_RATE);
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Ok(());
        }
        let samples = bytes_to_samples(&resampled);
        if let Some(writer) = inner.bot_writer.as_mut() {
            for &s in &samples {
                writer.write_sample(s)?;
            }
        }
        inner.bot_samples.extend_from_slice(&samples);
        Ok(())
    }

    pub fn record_transcript(&self, record: TranscriptRecord) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.transcripts.push(record);
    }

    pub fn record_function_event(&self, event: serde_json::Value) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.function_events.push(event);
    }

    pub fn record_session_event(&self, event: serde_json::Value) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.session_events.push(event);
    }

    /// Finalizes the recording: closes mono writers, writes the balanced
    /// stereo mixdown, and flushes transcript/event/metadata JSON. Calling
    /// this more than once is a no-op.
    pub fn stop(&self, metadata: serde_json::Value) -> BridgeResult<()> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Ok(());
        }
        inner.stopped = true;

        if let Some(writer) = inner.caller_writer.take() {
            writer.finalize()?;
        }
        if let Some(writer) = inner.bot_writer.take() {
            writer.finalize()?;
        }

        write_stereo_mix(&inner.dir, &inner.caller_samples, &inner.bot_samples)?;
        write_json(&inner.dir.join("transcript.json"), &inner.transcripts)?;
        let events = serde_json::json!({
            "function_events": inner.function_events,
            "session_events": inner.session_events,
        });
        write_json(&inner.dir.join("events.json"), &events)?;
        write_json(&inner.dir.join("metadata.json"), &metadata)?;
        Ok(())
    }
}

fn bytes_to_samples(pcm16: &[u8]) -> Vec<i16> {
    pcm16
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn write_stereo_mix(dir: &Path, caller: &[i16], bot: &[i16]) -> BridgeResult<()> {
    let len = caller.len().max(bot.len());
    let mut writer = WavWriter::create(dir.join("stereo.wav"), stereo_spec())?;
    for i in 0..len {
        let l = caller.get(i).copied().unwrap_or(0);
        let r = bot.get(i).copied().unwrap_or(0);
        writer.write_sample(l)?;
        writer.write_sample(r)?;
    }
    writer.finalize()?;

    // final_stereo.wav mirrors stereo.wav: the live file plus a definitive,
    // fully zero-padded final artifact written once at stop.
    std::fs::copy(dir.join("stereo.wav"), dir.join("final_stereo.wav"))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> BridgeResult<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| BridgeError::Internal(format!("write {}: {e}", path.display())))?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn silence(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let recorder = CallRecorder::start(dir.path(), 24_000).unwrap();
        recorder.record_caller_frame(&silence(100)).unwrap();
        recorder.stop(serde_json::json!({})).unwrap();
        recorder.stop(serde_json::json!({})).unwrap();
        assert!(dir.path().join("stereo.wav").exists());
    }

    #[test]
    fn stereo_mix_pads_shorter_track_with_zero() {
        let dir = tempdir().unwrap();
        let recorder = CallRecorder::start(dir.path(), 16_000).unwrap();
        recorder.record_caller_frame(&silence(200)).unwrap();
        recorder.record_bot_frame(&silence(50)).unwrap();
        recorder.stop(serde_json::json!({})).unwrap();

        let mut reader = hound::WavReader::open(dir.path().join("stereo.wav")).unwrap();
        let sample_count = reader.len() as usize;
        // interleaved stereo: total samples / 2 channels == frame count
        assert_eq!(sample_count / 2, 200);
        let _ = reader.samples::<i16>().count();
    }

    #[test]
    fn transcript_json_is_written_on_stop() {
        let dir = tempdir().unwrap();
        let recorder = CallRecorder::start(dir.path(), 24_000).unwrap();
        recorder.record_transcript(TranscriptRecord {
            timestamp: Utc::now(),
            channel: TranscriptChannel::Caller,
            kind: TranscriptKind::Input,
            text: "hello".to_string(),
            confidence: None,
            duration_ms: None,
        });
        recorder.stop(serde_json::json!({})).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("transcript.json")).unwrap();
        assert!(contents.contains("hello"));
    }
}
