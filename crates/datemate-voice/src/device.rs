//! Real audio hardware: microphone recognizer and speaker playback.
//!
//! `MicrophoneRecognizer` captures 16 kHz mono through cpal on a dedicated thread
//! (cpal streams and the WebRTC VAD are `!Send`), cuts speech into segments with
//! the VAD, transcribes each segment through an OpenAI-compatible
//! `/audio/transcriptions` endpoint and reports the growing transcript as
//! partial updates. Frames the VAD flags as speech are reported as voice
//! activity so the silence gap stays open while a segment is being transcribed.
//!
//! Transcription runs on its own thread, so the capture thread only ever waits
//! on audio frames. `close` flags both threads and returns at once; the capture
//! thread is joined off the runtime before the device is opened again.

use crate::capture::{RecognitionUpdate, Recognizer};
use crate::error::{VoiceError, VoiceResult};
use crate::player::AudioPlayer;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Microphone + transcription settings.
#[derive(Debug, Clone)]
pub struct MicrophoneConfig {
    /// 8000, 16000, 32000 or 48000 (WebRTC VAD rates)
    pub sample_rate: u32,
    /// 0-3, 3 most aggressive
    pub vad_mode: u8,
    /// Silence that closes a speech segment (sent for transcription).
    pub segment_gap_ms: u64,
    /// Segments shorter than this are dropped.
    pub min_speech_ms: u64,
    pub stt_url: String,
    pub stt_api_key: String,
    pub stt_model: String,
    pub timeout: Duration,
}

impl MicrophoneConfig {
    pub fn new(stt_url: impl Into<String>, stt_api_key: impl Into<String>) -> Self {
        Self {
            sample_rate: 16000,
            vad_mode: 2,
            segment_gap_ms: 600,
            min_speech_ms: 200,
            stt_url: stt_url.into(),
            stt_api_key: stt_api_key.into(),
            stt_model: "whisper-1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from `STT_API_URL`, `STT_API_KEY` and `STT_MODEL`.
    pub fn from_env() -> VoiceResult<Self> {
        let url = std::env::var("STT_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let key = std::env::var("STT_API_KEY")
            .map_err(|_| VoiceError::Config("microphone transcription requires STT_API_KEY".to_string()))?;
        let mut cfg = Self::new(url, key);
        if let Ok(model) = std::env::var("STT_MODEL") {
            cfg.stt_model = model;
        }
        Ok(cfg)
    }

    /// Samples per 30ms VAD frame.
    fn frame_len(&self) -> usize {
        (self.sample_rate as usize * 30) / 1000
    }

    fn frames(&self, ms: u64) -> usize {
        (ms / 30).max(1) as usize
    }
}

/// Activity is reported at most once per this many speech frames (~300ms).
const ACTIVITY_EVERY_FRAMES: usize = 10;

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Streaming recognizer over the default input device.
pub struct MicrophoneRecognizer {
    config: MicrophoneConfig,
    worker: Option<Worker>,
    /// Capture threads told to stop but not yet joined.
    retiring: Vec<JoinHandle<()>>,
}

impl MicrophoneRecognizer {
    pub fn new(config: MicrophoneConfig) -> VoiceResult<Self> {
        if !matches!(config.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(VoiceError::Config(format!(
                "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                config.sample_rate
            )));
        }
        if config.vad_mode > 3 {
            return Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", config.vad_mode)));
        }
        Ok(Self {
            config,
            worker: None,
            retiring: Vec::new(),
        })
    }

    /// Wait for stopped capture threads so the device is free again.
    async fn reap(&mut self) -> VoiceResult<()> {
        let retiring = std::mem::take(&mut self.retiring);
        if retiring.is_empty() {
            return Ok(());
        }
        tokio::task::spawn_blocking(move || join_all(retiring))
            .await
            .map_err(|e| VoiceError::CaptureUnavailable(format!("microphone release failed: {}", e)))
    }
}

fn join_all(threads: Vec<JoinHandle<()>>) {
    for thread in threads {
        if thread.join().is_err() {
            error!("Microphone thread panicked");
        }
    }
    debug!("Microphone released");
}

#[async_trait]
impl Recognizer for MicrophoneRecognizer {
    async fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionUpdate>> {
        self.close();
        self.reap().await?;
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let config = self.config.clone();
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("datemate-mic".to_string())
            .spawn(move || microphone_thread(config, thread_stop, ready_tx, update_tx))?;

        let ready = ready_rx
            .await
            .map_err(|_| VoiceError::CaptureUnavailable("microphone thread exited".to_string()));
        match ready.and_then(|r| r) {
            Ok(()) => {
                self.worker = Some(Worker { stop, thread });
                Ok(update_rx)
            }
            Err(e) => {
                // the thread returns right after reporting its setup failure
                self.retiring.push(thread);
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            self.retiring.push(worker.thread);
        }
    }
}

impl Drop for MicrophoneRecognizer {
    fn drop(&mut self) {
        self.close();
        // bounded by one frame wait; transcription never runs on these threads
        join_all(std::mem::take(&mut self.retiring));
    }
}

fn open_stream(
    config: &MicrophoneConfig,
    chunk_tx: std::sync::mpsc::Sender<Vec<f32>>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::CaptureUnavailable("No input device available".to_string()))?;
    info!("📱 Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let frame_len = config.frame_len();
    let mut frame = Vec::with_capacity(frame_len);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                frame.push(sample);
                if frame.len() == frame_len {
                    let _ = chunk_tx.send(std::mem::replace(&mut frame, Vec::with_capacity(frame_len)));
                }
            }
        },
        move |err| warn!("Audio stream error: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn build_vad(config: &MicrophoneConfig) -> Vad {
    let mode = match config.vad_mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    };
    let rate = match config.sample_rate {
        8000 => SampleRate::Rate8kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        _ => SampleRate::Rate16kHz,
    };
    let mut vad = Vad::new();
    vad.set_mode(mode);
    vad.set_sample_rate(rate);
    vad
}

fn microphone_thread(
    config: MicrophoneConfig,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<VoiceResult<()>>,
    updates: mpsc::UnboundedSender<RecognitionUpdate>,
) {
    let (chunk_tx, chunk_rx) = std::sync::mpsc::channel::<Vec<f32>>();
    let (segment_tx, segment_rx) = std::sync::mpsc::channel::<Vec<f32>>();
    let setup = spawn_transcriber(&config, Arc::clone(&stop), segment_rx, updates.clone())
        .and_then(|()| open_stream(&config, chunk_tx));
    let _stream = match setup {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    info!("🎤 Microphone listening ({} Hz)", config.sample_rate);

    let mut vad = build_vad(&config);
    let gap_frames = config.frames(config.segment_gap_ms);
    let min_frames = config.frames(config.min_speech_ms);
    let mut segment: Vec<f32> = Vec::new();
    let mut speech_frames = 0usize;
    let mut quiet_frames = 0usize;

    while !stop.load(Ordering::SeqCst) {
        let frame = match chunk_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                let _ = updates.send(RecognitionUpdate::Failed("audio stream closed".to_string()));
                break;
            }
        };
        let pcm: Vec<i16> = frame
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        let is_speech = vad.is_voice_segment(&pcm).unwrap_or(false);

        if is_speech {
            if speech_frames % ACTIVITY_EVERY_FRAMES == 0 && updates.send(RecognitionUpdate::Speaking).is_err() {
                break;
            }
            speech_frames += 1;
            quiet_frames = 0;
            segment.extend_from_slice(&frame);
        } else if speech_frames > 0 {
            quiet_frames += 1;
            segment.extend_from_slice(&frame);
            if quiet_frames >= gap_frames {
                if speech_frames >= min_frames {
                    let _ = updates.send(RecognitionUpdate::Speaking);
                    if segment_tx.send(std::mem::take(&mut segment)).is_err() {
                        break;
                    }
                }
                segment.clear();
                speech_frames = 0;
                quiet_frames = 0;
            }
        }
    }
    debug!("Microphone thread exiting");
}

/// Start the detached transcription thread. It ends when the capture thread
/// drops its segment sender, and drops any result that lands after `stop`.
fn spawn_transcriber(
    config: &MicrophoneConfig,
    stop: Arc<AtomicBool>,
    segments: std::sync::mpsc::Receiver<Vec<f32>>,
    updates: mpsc::UnboundedSender<RecognitionUpdate>,
) -> VoiceResult<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| VoiceError::Config(e.to_string()))?;
    let config = config.clone();
    std::thread::Builder::new()
        .name("datemate-stt".to_string())
        .spawn(move || {
            let mut transcript = String::new();
            for segment in segments {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let result = transcribe(&client, &config, &segment);
                if stop.load(Ordering::SeqCst) {
                    debug!("Capture closed during transcription, result dropped");
                    break;
                }
                match result {
                    Ok(text) if !text.is_empty() => {
                        if !transcript.is_empty() {
                            transcript.push(' ');
                        }
                        transcript.push_str(&text);
                        if updates.send(RecognitionUpdate::Partial(transcript.clone())).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Transcription failed: {}", e),
                }
            }
            debug!("Transcription thread exiting");
        })?;
    Ok(())
}

/// Encode mono f32 PCM as 16-bit WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|e| VoiceError::Io(e.to_string()))?;
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .map_err(|e| VoiceError::Io(e.to_string()))?;
        }
        writer.finalize().map_err(|e| VoiceError::Io(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

fn transcribe(
    client: &reqwest::blocking::Client,
    config: &MicrophoneConfig,
    samples: &[f32],
) -> VoiceResult<String> {
    let wav = encode_wav(samples, config.sample_rate)?;
    let url = format!("{}/audio/transcriptions", config.stt_url.trim_end_matches('/'));
    let part = reqwest::blocking::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    let form = reqwest::blocking::multipart::Form::new()
        .part("file", part)
        .text("model", config.stt_model.clone());
    let res = client
        .post(&url)
        .bearer_auth(&config.stt_api_key)
        .multipart(form)
        .send()
        .map_err(|e| VoiceError::Io(e.to_string()))?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().unwrap_or_default();
        return Err(VoiceError::Io(format!("STT API error {}: {}", status, body)));
    }
    let json: serde_json::Value = res.json().map_err(|e| VoiceError::Io(e.to_string()))?;
    Ok(json
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string())
}

/// Plays mp3/wav on the default output device.
#[derive(Debug, Clone, Default)]
pub struct RodioPlayer;

#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        tokio::task::spawn_blocking(move || -> VoiceResult<()> {
            let (_stream, handle) = rodio::OutputStream::try_default()
                .map_err(|e| VoiceError::Playback(e.to_string()))?;
            let sink = rodio::Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
            let source = rodio::Decoder::new(Cursor::new(audio))
                .map_err(|e| VoiceError::Playback(format!("decode failed: {}", e)))?;
            sink.append(source);
            sink.sleep_until_end();
            Ok(())
        })
        .await
        .map_err(|e| VoiceError::Playback(e.to_string()))?
    }
}
