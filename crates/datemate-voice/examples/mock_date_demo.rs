//! Mock Date Demo: one practice date, end to end, then the feedback report.
//!
//! - **Capture**: a scripted user by default; the microphone with `--features device`
//!   and `STT_API_KEY` set.
//! - **Replies**: chat-completions API if `DATEMATE__GENERATION__API_KEY` is set,
//!   else canned replies.
//! - **Voice**: TTS API if `DATEMATE__SYNTHESIS__API_KEY` is set, else silent.
//!
//! Shorten the date with `DATEMATE__SESSION__DURATION_SECS=60`. Ctrl+C ends it early.

use datemate_core::{
    DateConfig, IdentityProvider, InMemoryPersonaStore, PersonaDraft, PersonaStore, StaticIdentity,
};
use datemate_voice::{
    ActivePhase, AudioPlayer, ChatCompletionsGenerator, ConversationSession, HttpSynthesizer, RecognizerCapture,
    ResponseGenerator, ScoringStage, ScriptedGenerator, ScriptedRecognizer, ScriptedSynthesizer,
    ScriptedUtterance, SessionEvent, Phase, SilentPlayer, Speaker, SpeechCaptureSource,
    SpeechSynthesizer, UtteranceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SCRIPT: [&str; 3] = [
    "Hi there, it's nice to finally meet you",
    "I work as a nurse, what about you?",
    "That sounds fun, do you like hiking?",
];

fn capture_source(config: &DateConfig) -> Box<dyn SpeechCaptureSource> {
    let utterance = UtteranceConfig::from(&config.capture);

    #[cfg(feature = "device")]
    {
        use datemate_voice::{MicrophoneConfig, MicrophoneRecognizer};
        match MicrophoneConfig::from_env().and_then(MicrophoneRecognizer::new) {
            Ok(mic) => {
                info!("Capture: microphone");
                return Box::new(RecognizerCapture::new(mic, utterance));
            }
            Err(e) => info!("Capture: scripted ({})", e),
        }
    }

    let script = SCRIPT
        .iter()
        .map(|line| ScriptedUtterance::spoken(line, Duration::from_millis(250)));
    Box::new(RecognizerCapture::new(ScriptedRecognizer::new(script), utterance))
}

fn generator(config: &DateConfig) -> Arc<dyn ResponseGenerator> {
    match ChatCompletionsGenerator::from_settings(&config.generation) {
        Ok(g) => {
            info!("Replies: {} via {}", config.generation.model, config.generation.api_url);
            Arc::new(g)
        }
        Err(e) => {
            info!("Replies: canned ({})", e);
            Arc::new(ScriptedGenerator::replying([
                "Hi! It's lovely to meet you too. How was your day?",
                "A nurse, that's wonderful. I'm an architect. What do you enjoy outside work?",
                "I love hiking! Do you have a favourite trail?",
            ]))
        }
    }
}

#[cfg(feature = "device")]
fn player() -> Box<dyn AudioPlayer> {
    Box::new(datemate_voice::RodioPlayer::default())
}

#[cfg(not(feature = "device"))]
fn player() -> Box<dyn AudioPlayer> {
    Box::new(SilentPlayer)
}

fn synthesizer(config: &DateConfig) -> Arc<dyn SpeechSynthesizer> {
    match HttpSynthesizer::from_settings(&config.synthesis, player()) {
        Ok(s) => {
            info!("Voice: TTS via {}", config.synthesis.api_url);
            Arc::new(s)
        }
        Err(e) => {
            info!("Voice: silent ({})", e);
            Arc::new(ScriptedSynthesizer::silent().with_playback(Duration::from_millis(500)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DateConfig::load()?;

    let identity = StaticIdentity::signed_in("demo-user");
    let store = InMemoryPersonaStore::new();
    let user_id = identity.require_user_id()?;
    let persona = store
        .create(
            &user_id,
            PersonaDraft::new("Priya", 28, "architect", "Loves hiking, jazz and terrible puns"),
        )
        .await?;
    info!("💘 Date with {} ({}, {})", persona.name, persona.age, persona.profession);

    let session = ConversationSession::new(
        &persona,
        &config,
        capture_source(&config),
        generator(&config),
        synthesizer(&config),
        ScoringStage::from_settings(&config.scoring),
    );
    let (handle, mut events) = session.spawn();
    handle.start().await?;

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop().await;
        }
    });

    let mut agent_turns = 0;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::TurnRecorded(turn) => {
                println!("{:>6}: {}", turn.speaker.to_string(), turn.text);
                if turn.speaker == Speaker::Agent {
                    agent_turns += 1;
                }
            }
            SessionEvent::Degraded(reason) => warn!("Degraded mode: {:?}", reason),
            SessionEvent::ReplySkipped(reason) => warn!("No reply this round: {}", reason),
            SessionEvent::PhaseChanged { to, .. } => {
                // the scripted user has said everything once the last reply settles
                if agent_turns >= SCRIPT.len() && to == Phase::Active(ActivePhase::Listening) {
                    handle.stop().await;
                }
            }
            SessionEvent::Ended(by) => info!("Date ended: {:?}", by),
            _ => {}
        }
    }

    let outcome = handle.wait().await?;
    println!("\n── Second chance? ──");
    for c in &outcome.report.criteria {
        println!("{:<26} {:>2}/10", c.criterion, c.display_score());
    }
    println!("Overall: {:.0}%", outcome.report.aggregate * 100.0);
    if let Some(msg) = &outcome.report.encouragement {
        println!("{}", msg);
    }
    Ok(())
}
