//! **Speech capture**: live transcript in, final utterances out.
//!
//! A `SpeechCaptureSource` reports two signals through the `CaptureSink` it is
//! started with: `transcript_updated` on every partial recognition change and
//! `utterance_final` once per capture, after which capture is stopped and must be
//! started again. `RecognizerCapture` builds a capture source from any streaming
//! `Recognizer` by running the silence-gap detector over its partial results.

use crate::error::{VoiceError, VoiceResult};
use crate::utterance::{UtteranceConfig, UtteranceDetector};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Signals emitted while capturing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    TranscriptUpdated(String),
    UtteranceFinal(String),
}

/// A capture event tagged with the capture it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSignal {
    pub ticket: u64,
    pub event: CaptureEvent,
}

/// Where a capture source reports to. The ticket lets the receiver drop signals
/// from captures it has already moved past.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    ticket: u64,
    tx: mpsc::UnboundedSender<CaptureSignal>,
}

impl CaptureSink {
    pub fn new(ticket: u64, tx: mpsc::UnboundedSender<CaptureSignal>) -> Self {
        Self { ticket, tx }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn transcript_updated(&self, text: impl Into<String>) {
        self.emit(CaptureEvent::TranscriptUpdated(text.into()));
    }

    pub fn utterance_final(&self, text: impl Into<String>) {
        self.emit(CaptureEvent::UtteranceFinal(text.into()));
    }

    fn emit(&self, event: CaptureEvent) {
        // receiver gone means the session ended; the signal is inert
        let _ = self.tx.send(CaptureSignal {
            ticket: self.ticket,
            event,
        });
    }
}

/// Produces recognized speech from the audio input.
#[async_trait]
pub trait SpeechCaptureSource: Send {
    /// Acquire the input device and begin reporting to `sink`.
    /// Fails with `CaptureUnavailable` if the device or permission is missing.
    async fn start(&mut self, sink: CaptureSink) -> VoiceResult<()>;

    /// End capture and release the device. Idempotent.
    async fn stop(&mut self);

    /// Whether capture is running (false again after `utterance_final`).
    fn is_capturing(&self) -> bool;
}

#[async_trait]
impl<S: SpeechCaptureSource + ?Sized> SpeechCaptureSource for Box<S> {
    async fn start(&mut self, sink: CaptureSink) -> VoiceResult<()> {
        (**self).start(sink).await
    }

    async fn stop(&mut self) {
        (**self).stop().await
    }

    fn is_capturing(&self) -> bool {
        (**self).is_capturing()
    }
}

/// One update from a streaming recognizer. Text is the full transcript so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionUpdate {
    /// Voice activity with no new text yet. Keeps the silence gap from closing
    /// while a slow transcription is still on its way.
    Speaking,
    Partial(String),
    /// An empty final keeps whatever transcript was already reported.
    Final(String),
    Failed(String),
}

/// A streaming speech recognizer bound to an audio input device.
#[async_trait]
pub trait Recognizer: Send + 'static {
    /// Acquire the device and start streaming updates.
    async fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionUpdate>>;

    /// Release the device. Must be idempotent and leave the recognizer reopenable.
    fn close(&mut self);
}

/// Capture source over a `Recognizer`, finalizing utterances by silence gap.
pub struct RecognizerCapture<R: Recognizer> {
    recognizer: Arc<Mutex<R>>,
    config: UtteranceConfig,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<R: Recognizer> RecognizerCapture<R> {
    pub fn new(recognizer: R, config: UtteranceConfig) -> Self {
        Self {
            recognizer: Arc::new(Mutex::new(recognizer)),
            config,
            active: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl<R: Recognizer> SpeechCaptureSource for RecognizerCapture<R> {
    async fn start(&mut self, sink: CaptureSink) -> VoiceResult<()> {
        if self.is_capturing() {
            debug!("Capture already running, start ignored");
            return Ok(());
        }
        self.abort_task();

        let updates = {
            let mut recognizer = self.recognizer.lock().await;
            recognizer.close();
            recognizer.open().await?
        };

        info!("🎤 Capture started (ticket {})", sink.ticket());
        self.active.store(true, Ordering::SeqCst);
        let detector = UtteranceDetector::new(self.config.clone());
        self.task = Some(tokio::spawn(watch_utterance(
            Arc::clone(&self.recognizer),
            updates,
            detector,
            sink,
            Arc::clone(&self.active),
        )));
        Ok(())
    }

    async fn stop(&mut self) {
        self.abort_task();
        self.recognizer.lock().await.close();
        if self.active.swap(false, Ordering::SeqCst) {
            info!("🛑 Capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl<R: Recognizer> Drop for RecognizerCapture<R> {
    fn drop(&mut self) {
        self.abort_task();
        if let Ok(mut recognizer) = self.recognizer.try_lock() {
            recognizer.close();
        }
    }
}

/// Runs one utterance: partials and voice activity feed the detector until the gap elapses or the
/// recognizer ends, then the device is released and the final text emitted.
async fn watch_utterance<R: Recognizer>(
    recognizer: Arc<Mutex<R>>,
    mut updates: mpsc::UnboundedReceiver<RecognitionUpdate>,
    mut detector: UtteranceDetector,
    sink: CaptureSink,
    active: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(detector.config().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    detector.begin(Instant::now());

    let final_text = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(RecognitionUpdate::Speaking) => detector.heard(Instant::now()),
                Some(RecognitionUpdate::Partial(text)) => {
                    if detector.observe(&text, Instant::now()) {
                        sink.transcript_updated(text);
                    }
                }
                Some(RecognitionUpdate::Final(text)) => {
                    if !text.is_empty() && detector.observe(&text, Instant::now()) {
                        sink.transcript_updated(text);
                    }
                    break detector.finish();
                }
                Some(RecognitionUpdate::Failed(reason)) => {
                    warn!("Recognizer failed mid-utterance: {}", reason);
                    break detector.finish();
                }
                None => break detector.finish(),
            },
            _ = ticker.tick() => {
                if let Some(text) = detector.poll(Instant::now()) {
                    break Some(text);
                }
            }
        }
    };

    recognizer.lock().await.close();
    active.store(false, Ordering::SeqCst);
    if let Some(text) = final_text {
        debug!("Utterance final: {:?}", text);
        sink.utterance_final(text);
    }
}

// -----------------------------------------------------------------------------
// Scripted recognizer: deterministic speech for tests and the demo.
// -----------------------------------------------------------------------------

/// How a scripted utterance ends after its partials are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Stream stays open; the silence gap finalizes it.
    Silence,
    /// Recognizer reports a final result immediately.
    Final,
    /// Recognizer fails (e.g. audio route lost).
    Fail(String),
}

/// One scripted recognizer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Voice activity without text.
    Heard,
    /// Full transcript so far.
    Partial(String),
}

/// Steps for one capture, each after its delay, then how the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedUtterance {
    pub steps: Vec<(Duration, ScriptStep)>,
    pub end: ScriptEnd,
}

impl ScriptedUtterance {
    /// A capture in which nothing is heard.
    pub fn silent() -> Self {
        Self {
            steps: Vec::new(),
            end: ScriptEnd::Silence,
        }
    }

    /// Speak `text` word by word, `step` apart, then go quiet.
    pub fn spoken(text: &str, step: Duration) -> Self {
        let mut utterance = Self::silent();
        let mut so_far = String::new();
        for word in text.split_whitespace() {
            if !so_far.is_empty() {
                so_far.push(' ');
            }
            so_far.push_str(word);
            utterance = utterance.then_partial(step, so_far.clone());
        }
        utterance
    }

    /// Report voice activity `delay` after the previous step.
    pub fn then_heard(mut self, delay: Duration) -> Self {
        self.steps.push((delay, ScriptStep::Heard));
        self
    }

    /// Report `text` as the transcript so far, `delay` after the previous step.
    pub fn then_partial(mut self, delay: Duration, text: impl Into<String>) -> Self {
        self.steps.push((delay, ScriptStep::Partial(text.into())));
        self
    }

    pub fn with_end(mut self, end: ScriptEnd) -> Self {
        self.end = end;
        self
    }
}

/// Counters shared with a `ScriptedRecognizer` after it is moved into a capture.
#[derive(Debug, Default)]
pub struct RecognizerTally {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicBool,
}

impl RecognizerTally {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Whether the (simulated) device is currently held.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Recognizer that replays one scripted utterance per `open`. Once the script is
/// exhausted it behaves like a user who stays silent.
pub struct ScriptedRecognizer {
    script: VecDeque<ScriptedUtterance>,
    permission_granted: bool,
    tally: Arc<RecognizerTally>,
    feeder: Option<JoinHandle<()>>,
    hold: Option<mpsc::UnboundedSender<RecognitionUpdate>>,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = ScriptedUtterance>) -> Self {
        Self {
            script: script.into_iter().collect(),
            permission_granted: true,
            tally: Arc::new(RecognizerTally::default()),
            feeder: None,
            hold: None,
        }
    }

    /// Simulate a user who declined the speech-recognition permission.
    pub fn without_permission(mut self) -> Self {
        self.permission_granted = false;
        self
    }

    pub fn tally(&self) -> Arc<RecognizerTally> {
        Arc::clone(&self.tally)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn open(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionUpdate>> {
        if !self.permission_granted {
            return Err(VoiceError::CaptureUnavailable(
                "speech recognition permission not granted".to_string(),
            ));
        }
        if self.tally.open.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::CaptureUnavailable("input device busy".to_string()));
        }
        self.tally.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        match self.script.pop_front() {
            Some(utterance) => {
                let feed_tx = tx.clone();
                self.feeder = Some(tokio::spawn(async move {
                    let mut transcript = String::new();
                    for (delay, step) in utterance.steps {
                        tokio::time::sleep(delay).await;
                        let update = match step {
                            ScriptStep::Heard => RecognitionUpdate::Speaking,
                            ScriptStep::Partial(text) => {
                                transcript.clone_from(&text);
                                RecognitionUpdate::Partial(text)
                            }
                        };
                        if feed_tx.send(update).is_err() {
                            return;
                        }
                    }
                    match utterance.end {
                        ScriptEnd::Silence => {
                            // keep the stream open until the gap closes it
                            std::future::pending::<()>().await;
                        }
                        ScriptEnd::Final => {
                            let _ = feed_tx.send(RecognitionUpdate::Final(transcript));
                        }
                        ScriptEnd::Fail(reason) => {
                            let _ = feed_tx.send(RecognitionUpdate::Failed(reason));
                        }
                    }
                }));
                self.hold = Some(tx);
            }
            None => self.hold = Some(tx),
        }
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.hold = None;
        if self.tally.open.swap(false, Ordering::SeqCst) {
            self.tally.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(script: Vec<ScriptedUtterance>) -> (RecognizerCapture<ScriptedRecognizer>, Arc<RecognizerTally>) {
        let recognizer = ScriptedRecognizer::new(script);
        let tally = recognizer.tally();
        (RecognizerCapture::new(recognizer, UtteranceConfig::default()), tally)
    }

    #[tokio::test(start_paused = true)]
    async fn partials_then_final_after_silence() {
        let (mut cap, tally) = capture(vec![ScriptedUtterance::spoken(
            "Hi there",
            Duration::from_millis(300),
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        cap.start(CaptureSink::new(7, tx)).await.unwrap();
        assert!(cap.is_capturing());

        let mut events = Vec::new();
        while let Some(signal) = rx.recv().await {
            assert_eq!(signal.ticket, 7);
            let done = matches!(signal.event, CaptureEvent::UtteranceFinal(_));
            events.push(signal.event);
            if done {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                CaptureEvent::TranscriptUpdated("Hi".to_string()),
                CaptureEvent::TranscriptUpdated("Hi there".to_string()),
                CaptureEvent::UtteranceFinal("Hi there".to_string()),
            ]
        );
        // implicitly stopped and the device released before the final signal
        assert!(!cap.is_capturing());
        assert!(!tally.is_open());
        assert_eq!(tally.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_final_reacquires_device() {
        let (mut cap, tally) = capture(vec![
            ScriptedUtterance::spoken("one", Duration::from_millis(100)),
            ScriptedUtterance::spoken("two", Duration::from_millis(100)),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (ticket, expected) in [(1, "one"), (2, "two")] {
            cap.start(CaptureSink::new(ticket, tx.clone())).await.unwrap();
            loop {
                let signal = rx.recv().await.unwrap();
                if let CaptureEvent::UtteranceFinal(text) = signal.event {
                    assert_eq!(text, expected);
                    break;
                }
            }
        }
        assert_eq!(tally.opens(), 2);
        assert!(!tally.is_open());
    }

    async fn final_text(rx: &mut mpsc::UnboundedReceiver<CaptureSignal>) -> String {
        loop {
            let signal = rx.recv().await.unwrap();
            if let CaptureEvent::UtteranceFinal(text) = signal.event {
                return text;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_transcript_survives_reported_voice_activity() {
        let second = Duration::from_secs(1);
        let (mut cap, _tally) = capture(vec![ScriptedUtterance::silent()
            .then_heard(second)
            .then_heard(second)
            .then_heard(second)
            .then_heard(second)
            .then_partial(Duration::from_millis(200), "I work as a nurse")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        cap.start(CaptureSink::new(1, tx)).await.unwrap();
        assert_eq!(final_text(&mut rx).await, "I work as a nurse");
    }

    #[tokio::test(start_paused = true)]
    async fn late_transcript_without_activity_misses_the_gap() {
        let (mut cap, _tally) = capture(vec![ScriptedUtterance::silent()
            .then_partial(Duration::from_millis(4_200), "I work as a nurse")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        cap.start(CaptureSink::new(1, tx)).await.unwrap();
        assert_eq!(final_text(&mut rx).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn recognizer_final_keeps_spoken_text() {
        let (mut cap, tally) = capture(vec![ScriptedUtterance::spoken(
            "Hi there",
            Duration::from_millis(100),
        )
        .with_end(ScriptEnd::Final)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        cap.start(CaptureSink::new(1, tx)).await.unwrap();

        let mut updates = Vec::new();
        let last = loop {
            match rx.recv().await.unwrap().event {
                CaptureEvent::TranscriptUpdated(text) => updates.push(text),
                CaptureEvent::UtteranceFinal(text) => break text,
            }
        };
        assert_eq!(last, "Hi there");
        assert_eq!(updates, vec!["Hi".to_string(), "Hi there".to_string()]);
        // finalized by the recognizer, not by the silence gap
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!tally.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_final_keeps_reported_transcript() {
        let recognizer = Arc::new(Mutex::new(ScriptedRecognizer::new(vec![])));
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        update_tx.send(RecognitionUpdate::Partial("Hi there".to_string())).unwrap();
        update_tx.send(RecognitionUpdate::Final(String::new())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        watch_utterance(
            recognizer,
            update_rx,
            UtteranceDetector::new(UtteranceConfig::default()),
            CaptureSink::new(3, tx),
            Arc::new(AtomicBool::new(true)),
        )
        .await;

        let events: Vec<CaptureEvent> = std::iter::from_fn(|| rx.try_recv().ok()).map(|s| s.event).collect();
        assert_eq!(
            events,
            vec![
                CaptureEvent::TranscriptUpdated("Hi there".to_string()),
                CaptureEvent::UtteranceFinal("Hi there".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recognizer_failure_finalizes_with_current_text() {
        let (mut cap, _tally) = capture(vec![ScriptedUtterance::spoken(
            "so anyway",
            Duration::from_millis(100),
        )
        .with_end(ScriptEnd::Fail("route change".to_string()))]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        cap.start(CaptureSink::new(1, tx)).await.unwrap();
        let last = loop {
            let signal = rx.recv().await.unwrap();
            if let CaptureEvent::UtteranceFinal(text) = signal.event {
                break text;
            }
        };
        assert_eq!(last, "so anyway");
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_is_capture_unavailable() {
        let recognizer = ScriptedRecognizer::new(vec![]).without_permission();
        let mut cap = RecognizerCapture::new(recognizer, UtteranceConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = cap.start(CaptureSink::new(1, tx)).await.unwrap_err();
        assert!(matches!(err, VoiceError::CaptureUnavailable(_)));
        assert!(!cap.is_capturing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_device_without_final() {
        let (mut cap, tally) = capture(vec![]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        cap.start(CaptureSink::new(1, tx)).await.unwrap();
        assert!(tally.is_open());
        cap.stop().await;
        assert!(!tally.is_open());
        assert!(!cap.is_capturing());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
