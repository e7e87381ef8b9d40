//! **Speech synthesis**: reply text to audio, playback, completion.
//!
//! `HttpSynthesizer` calls an ElevenLabs-style `/text-to-speech/{voice_id}` endpoint
//! and hands the audio to an `AudioPlayer`. The vendor reports exhausted quota
//! inside an otherwise ordinary response body, so the payload is inspected before
//! the status code: any UTF-8 body mentioning `quota_exceeded` is
//! `SynthesisQuotaExceeded`.

use crate::error::{VoiceError, VoiceResult};
use crate::player::AudioPlayer;
use async_trait::async_trait;
use datemate_core::SynthesisSettings;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const QUOTA_EXCEEDED_MARKER: &str = "quota_exceeded";

/// Speaks reply text. Resolves once playback has finished.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> VoiceResult<()>;
}

/// True if the payload is the vendor's in-band quota error rather than audio.
pub fn is_quota_exceeded(payload: &[u8]) -> bool {
    std::str::from_utf8(payload)
        .map(|s| s.contains(QUOTA_EXCEEDED_MARKER))
        .unwrap_or(false)
}

/// Classify a TTS response into audio bytes or a synthesis error.
pub fn classify_response(status: u16, payload: Vec<u8>) -> VoiceResult<Vec<u8>> {
    if is_quota_exceeded(&payload) {
        return Err(VoiceError::SynthesisQuotaExceeded);
    }
    if !(200..300).contains(&status) {
        let body = String::from_utf8_lossy(&payload);
        return Err(VoiceError::SynthesisUnavailable(format!(
            "TTS API error {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }
    if payload.is_empty() {
        return Err(VoiceError::SynthesisUnavailable("empty audio payload".to_string()));
    }
    Ok(payload)
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// Text-to-speech over HTTP, played through `P`.
pub struct HttpSynthesizer<P: AudioPlayer> {
    base_url: String,
    api_key: String,
    voice_id: String,
    model_id: String,
    stability: f32,
    similarity_boost: f32,
    player: P,
    client: reqwest::Client,
}

impl<P: AudioPlayer> HttpSynthesizer<P> {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        voice_id: impl Into<String>,
        player: P,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into().trim().to_string(),
            voice_id: voice_id.into(),
            model_id: "eleven_monolingual_v1".to_string(),
            stability: 0.5,
            similarity_boost: 0.5,
            player,
            client,
        })
    }

    /// Build from `[synthesis]` settings. Requires an API key.
    pub fn from_settings(settings: &SynthesisSettings, player: P) -> VoiceResult<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("synthesis.api_key is not set".to_string()))?;
        let mut synth = Self::new(
            &settings.api_url,
            api_key,
            &settings.voice_id,
            player,
            Duration::from_secs(settings.timeout_secs),
        )?;
        synth.model_id = settings.model_id.clone();
        synth.stability = settings.stability;
        synth.similarity_boost = settings.similarity_boost;
        Ok(synth)
    }

    /// Request audio for `text` without playing it.
    pub async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!(
            "{}/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        );
        let body = TtsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
        };
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::SynthesisUnavailable(e.to_string()))?;
        let status = res.status().as_u16();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::SynthesisUnavailable(e.to_string()))?;
        debug!("TTS response {}: {} bytes", status, bytes.len());
        classify_response(status, bytes.to_vec())
    }
}

#[async_trait]
impl<P: AudioPlayer> SpeechSynthesizer for HttpSynthesizer<P> {
    async fn speak(&self, text: &str) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let audio = self.synthesize(text).await?;
        info!("🔊 Speaking reply ({} bytes)", audio.len());
        self.player.play(audio).await
    }
}

/// Synthesizer that replays queued outcomes; `Ok(())` once exhausted.
/// Each successful `speak` takes `playback` to complete.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSynthesizer {
    outcomes: Arc<Mutex<VecDeque<VoiceResult<()>>>>,
    playback: Duration,
    spoken: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSynthesizer {
    pub fn new(outcomes: impl IntoIterator<Item = VoiceResult<()>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            ..Default::default()
        }
    }

    /// Always succeeds.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_playback(mut self, playback: Duration) -> Self {
        self.playback = playback;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts that were played successfully.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn speak(&self, text: &str) -> VoiceResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Ok(()));
        outcome?;
        if !self.playback.is_zero() {
            tokio::time::sleep(self.playback).await;
        }
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{CountingPlayer, SilentPlayer};

    #[test]
    fn quota_marker_detected_even_with_ok_status() {
        let body = br#"{"detail":{"status":"quota_exceeded","message":"This request exceeds your quota."}}"#;
        assert!(is_quota_exceeded(body));
        assert_eq!(
            classify_response(200, body.to_vec()),
            Err(VoiceError::SynthesisQuotaExceeded)
        );
        assert_eq!(
            classify_response(401, body.to_vec()),
            Err(VoiceError::SynthesisQuotaExceeded)
        );
    }

    #[test]
    fn binary_audio_is_not_mistaken_for_quota() {
        let mp3 = vec![0xFF, 0xFB, 0x90, 0x64, 0x00, 0xC3];
        assert!(!is_quota_exceeded(&mp3));
        assert_eq!(classify_response(200, mp3.clone()), Ok(mp3));
    }

    #[test]
    fn error_status_without_marker_is_unavailable() {
        let result = classify_response(500, b"internal error".to_vec());
        assert!(matches!(result, Err(VoiceError::SynthesisUnavailable(_))));
        assert!(matches!(
            classify_response(200, Vec::new()),
            Err(VoiceError::SynthesisUnavailable(_))
        ));
    }

    #[test]
    fn settings_without_key_are_rejected() {
        let result = HttpSynthesizer::from_settings(&SynthesisSettings::default(), SilentPlayer);
        assert!(matches!(result, Err(VoiceError::Config(_))));
    }

    #[tokio::test]
    async fn empty_text_is_not_sent() {
        let synth = HttpSynthesizer::new(
            "http://127.0.0.1:9",
            "key",
            "voice",
            SilentPlayer,
            Duration::from_millis(50),
        )
        .unwrap();
        assert!(synth.speak("   ").await.is_ok());
    }

    #[tokio::test]
    async fn failed_synthesis_is_returned_without_playback() {
        let player = CountingPlayer::default();
        let synth = HttpSynthesizer::new(
            "http://127.0.0.1:9",
            "key",
            "voice",
            player.clone(),
            Duration::from_millis(50),
        )
        .unwrap();
        let result = synth.speak("Hello!").await;
        assert!(matches!(result, Err(VoiceError::SynthesisUnavailable(_))));
        assert_eq!(player.plays(), 0);
    }

    #[tokio::test]
    async fn scripted_synthesizer_reports_outcomes() {
        let synth = ScriptedSynthesizer::new(vec![Err(VoiceError::SynthesisQuotaExceeded)]);
        assert_eq!(synth.speak("a").await, Err(VoiceError::SynthesisQuotaExceeded));
        assert!(synth.speak("b").await.is_ok());
        assert_eq!(synth.spoken(), vec!["b".to_string()]);
        assert_eq!(synth.calls(), 2);
    }
}
