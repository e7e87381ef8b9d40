//! **Reply generation**: persona context + utterance in, one reply string out.
//!
//! `ChatCompletionsGenerator` talks to any OpenAI-compatible `/chat/completions`
//! endpoint (Perplexity, OpenRouter, OpenAI). No retries happen here: a failed
//! call is `GenerationUnavailable` and the session simply skips that reply.

use crate::error::{VoiceError, VoiceResult};
use crate::turn::{Speaker, Turn};
use async_trait::async_trait;
use datemate_core::GenerationSettings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Logical request for one agent reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Persona-derived system prompt.
    pub system_prompt: String,
    /// Earlier answered exchanges, oldest first.
    pub history: Vec<Turn>,
    pub utterance: String,
    /// Reply length bound, in tokens.
    pub max_tokens: u32,
}

/// Produces the agent's reply. At most one call is in flight per session.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// An empty reply means "no response" and does not advance the conversation.
    async fn generate(&self, request: &GenerationRequest) -> VoiceResult<String>;
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first choice's content out of a chat-completions body.
pub(crate) fn parse_reply(body: &str) -> VoiceResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| VoiceError::GenerationUnavailable(format!("response parse failed: {}", e)))?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Reply generator backed by an OpenAI-compatible chat-completions API.
pub struct ChatCompletionsGenerator {
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            temperature: None,
            client,
        })
    }

    /// Build from `[generation]` settings. Requires an API key.
    pub fn from_settings(settings: &GenerationSettings) -> VoiceResult<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("generation.api_key is not set".to_string()))?;
        Ok(Self::new(
            &settings.api_url,
            api_key,
            &settings.model,
            Duration::from_secs(settings.timeout_secs),
        )?
        .with_temperature(settings.temperature))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn messages<'a>(&self, request: &'a GenerationRequest) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &request.system_prompt,
        });
        for turn in &request.history {
            let role = match turn.speaker {
                Speaker::User => "user",
                Speaker::Agent => "assistant",
            };
            messages.push(ChatMessage {
                role,
                content: &turn.text,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.utterance,
        });
        messages
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsGenerator {
    async fn generate(&self, request: &GenerationRequest) -> VoiceResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(request),
            max_tokens: request.max_tokens,
            temperature: self.temperature,
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::GenerationUnavailable(format!("request failed: {}", e)))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| VoiceError::GenerationUnavailable(e.to_string()))?;
        if !status.is_success() {
            warn!("Reply API error {}: {}", status, text);
            return Err(VoiceError::GenerationUnavailable(format!("API error {}", status)));
        }

        let reply = parse_reply(&text)?;
        debug!("Reply ({} chars)", reply.chars().count());
        Ok(reply)
    }
}

/// Generator that replays queued results in order; `Ok("")` once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<VoiceResult<String>>>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = VoiceResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Convenience: every reply succeeds.
    pub fn replying<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// Simulated round-trip time per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> VoiceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| Ok(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "You are Priya.".to_string(),
            history: vec![Turn::user("Hi"), Turn::agent("Hello!")],
            utterance: "How was your day?".to_string(),
            max_tokens: 50,
        }
    }

    #[test]
    fn parses_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" Hello! How are you? "}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "Hello! How are you?");
    }

    #[test]
    fn missing_choices_is_empty_reply() {
        assert_eq!(parse_reply(r#"{"choices":[]}"#).unwrap(), "");
        assert_eq!(parse_reply(r#"{"id":"x"}"#).unwrap(), "");
    }

    #[test]
    fn garbage_body_is_unavailable() {
        assert!(matches!(
            parse_reply("<html>bad gateway</html>"),
            Err(VoiceError::GenerationUnavailable(_))
        ));
    }

    #[test]
    fn messages_carry_history_in_order() {
        let generator = ChatCompletionsGenerator::new(
            "http://localhost",
            "key",
            "test-model",
            Duration::from_secs(1),
        )
        .unwrap();
        let req = request();
        let roles: Vec<&str> = generator.messages(&req).iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        let body = serde_json::to_value(ChatRequest {
            model: "test-model",
            messages: generator.messages(&req),
            max_tokens: req.max_tokens,
            temperature: None,
        })
        .unwrap();
        assert_eq!(body["max_tokens"], 50);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"][3]["content"], "How was your day?");
    }

    #[test]
    fn settings_without_key_are_rejected() {
        let settings = GenerationSettings::default();
        assert!(matches!(
            ChatCompletionsGenerator::from_settings(&settings),
            Err(VoiceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn scripted_generator_replays_then_goes_quiet() {
        let generator = ScriptedGenerator::new(vec![
            Ok("first".to_string()),
            Err(VoiceError::GenerationUnavailable("offline".to_string())),
        ]);
        let req = request();
        assert_eq!(generator.generate(&req).await.unwrap(), "first");
        assert!(generator.generate(&req).await.is_err());
        assert_eq!(generator.generate(&req).await.unwrap(), "");
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.requests().len(), 3);
    }
}
