//! Audio output for synthesized replies.

use crate::error::VoiceResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Plays encoded audio (mp3/wav). Resolves when playback has finished.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()>;
}

#[async_trait]
impl<P: AudioPlayer + ?Sized> AudioPlayer for Box<P> {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        (**self).play(audio).await
    }
}

/// Discards audio. For headless runs and tests.
#[derive(Debug, Default, Clone)]
pub struct SilentPlayer;

#[async_trait]
impl AudioPlayer for SilentPlayer {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        debug!("SilentPlayer: dropping {} bytes", audio.len());
        Ok(())
    }
}

/// Counts plays and bytes; shares its counters across clones.
#[derive(Debug, Default, Clone)]
pub struct CountingPlayer {
    plays: Arc<AtomicUsize>,
    bytes: Arc<AtomicUsize>,
}

impl CountingPlayer {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioPlayer for CountingPlayer {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(audio.len(), Ordering::SeqCst);
        Ok(())
    }
}
