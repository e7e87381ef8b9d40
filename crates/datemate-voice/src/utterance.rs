//! End-of-utterance detection for live transcripts
//!
//! Implements the "gap logic" on the recognizer's partial transcript: an utterance
//! is final once neither the transcript nor the voice activity reported by the
//! recognizer has changed for `silence_threshold + debounce`. The clock starts
//! when capture begins, so a user who never speaks still produces an (empty)
//! final after the same gap.

use datemate_core::CaptureSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for utterance detection
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceConfig {
    /// Silence since the last transcript change (default: 2.5s)
    pub silence_threshold: Duration,

    /// Grace for short pauses, added to the threshold (default: 0.5s)
    pub debounce: Duration,

    /// How often the capture loop checks for silence (default: 0.5s)
    pub poll_interval: Duration,
}

impl Default for UtteranceConfig {
    fn default() -> Self {
        Self::from(&CaptureSettings::default())
    }
}

impl From<&CaptureSettings> for UtteranceConfig {
    fn from(s: &CaptureSettings) -> Self {
        Self {
            silence_threshold: Duration::from_millis(s.silence_threshold_ms),
            debounce: Duration::from_millis(s.debounce_ms),
            poll_interval: Duration::from_millis(s.poll_ms),
        }
    }
}

impl UtteranceConfig {
    /// Total quiet time before an utterance is final.
    pub fn gap(&self) -> Duration {
        self.silence_threshold + self.debounce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Idle,
    Hearing,
    Finalized,
}

/// Tracks one utterance from capture start to its final text.
#[derive(Debug)]
pub struct UtteranceDetector {
    config: UtteranceConfig,
    state: DetectorState,
    text: String,
    last_change: Option<Instant>,
}

impl UtteranceDetector {
    pub fn new(config: UtteranceConfig) -> Self {
        Self {
            config,
            state: DetectorState::Idle,
            text: String::new(),
            last_change: None,
        }
    }

    pub fn config(&self) -> &UtteranceConfig {
        &self.config
    }

    /// Start a fresh utterance at `now`.
    pub fn begin(&mut self, now: Instant) {
        self.state = DetectorState::Hearing;
        self.text.clear();
        self.last_change = Some(now);
    }

    /// Feed the recognizer's current transcript. Returns true if it changed.
    pub fn observe(&mut self, text: &str, now: Instant) -> bool {
        if self.state != DetectorState::Hearing || text == self.text {
            return false;
        }
        self.text.clear();
        self.text.push_str(text);
        self.last_change = Some(now);
        true
    }

    /// Voice was heard but no text is available yet (transcription lags speech).
    /// Holds the gap open without changing the transcript.
    pub fn heard(&mut self, now: Instant) {
        if self.state == DetectorState::Hearing {
            self.last_change = Some(now);
        }
    }

    /// Returns the final text once the gap has elapsed. Yields at most once per utterance.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self.state != DetectorState::Hearing {
            return None;
        }
        let last = self.last_change?;
        if now.duration_since(last) > self.config.gap() {
            debug!("🤫 Silence gap reached, utterance final");
            return self.finish();
        }
        None
    }

    /// Force the utterance final (recognizer ended or failed).
    pub fn finish(&mut self) -> Option<String> {
        if self.state != DetectorState::Hearing {
            return None;
        }
        self.state = DetectorState::Finalized;
        Some(std::mem::take(&mut self.text))
    }

    /// Get the current state (for testing/debugging)
    pub fn state(&self) -> &str {
        match self.state {
            DetectorState::Idle => "idle",
            DetectorState::Hearing => "hearing",
            DetectorState::Finalized => "finalized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> (UtteranceDetector, Instant) {
        let mut d = UtteranceDetector::new(UtteranceConfig::default());
        let t0 = Instant::now();
        d.begin(t0);
        (d, t0)
    }

    #[test]
    fn final_after_gap_since_last_change() {
        let (mut d, t0) = detector();
        assert!(d.observe("Hi", t0 + Duration::from_millis(400)));
        assert!(d.observe("Hi there", t0 + Duration::from_secs(1)));

        // 3.0s after the last change is not yet past the gap
        assert_eq!(d.poll(t0 + Duration::from_secs(4)), None);
        assert_eq!(
            d.poll(t0 + Duration::from_millis(4_100)).as_deref(),
            Some("Hi there")
        );
        assert_eq!(d.state(), "finalized");
        // at most once
        assert_eq!(d.poll(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn unchanged_transcript_does_not_reset_the_gap() {
        let (mut d, t0) = detector();
        d.observe("Hello", t0);
        assert!(!d.observe("Hello", t0 + Duration::from_secs(2)));
        assert!(d.poll(t0 + Duration::from_millis(3_100)).is_some());
    }

    #[test]
    fn silence_from_start_yields_empty_final() {
        let (mut d, t0) = detector();
        assert_eq!(d.poll(t0 + Duration::from_millis(3_500)).as_deref(), Some(""));
    }

    #[test]
    fn voice_activity_holds_the_gap_open_until_text_arrives() {
        let (mut d, t0) = detector();
        for s in 1..=4 {
            d.heard(t0 + Duration::from_secs(s));
            assert_eq!(d.poll(t0 + Duration::from_secs(s)), None);
        }
        assert!(d.observe("I work as a nurse", t0 + Duration::from_millis(4_200)));
        assert_eq!(d.poll(t0 + Duration::from_millis(6_900)), None);
        assert_eq!(
            d.poll(t0 + Duration::from_millis(7_300)).as_deref(),
            Some("I work as a nurse")
        );
    }

    #[test]
    fn updates_after_final_are_ignored() {
        let (mut d, t0) = detector();
        d.observe("Bye", t0);
        assert_eq!(d.finish().as_deref(), Some("Bye"));
        assert!(!d.observe("Bye now", t0 + Duration::from_secs(1)));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn idle_detector_never_fires() {
        let mut d = UtteranceDetector::new(UtteranceConfig::default());
        let now = Instant::now();
        assert!(!d.observe("x", now));
        assert_eq!(d.poll(now + Duration::from_secs(60)), None);
        assert_eq!(d.state(), "idle");
    }
}
