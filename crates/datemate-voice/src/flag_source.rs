//! Flag quiz content from the reply model.
//!
//! Flags and end-of-round feedback are asked of the same `ResponseGenerator`
//! that voices the date, so any chat-completions backend serves both.

use crate::error::VoiceResult;
use crate::generator::{GenerationRequest, ResponseGenerator};
use async_trait::async_trait;
use datemate_core::{parse_flag_lines, FlagColor, FlagPool, FlagScore, POOL_SIZE};
use std::sync::Arc;
use tracing::{info, warn};

const FLAG_SYSTEM_PROMPT: &str = "Be precise and concise.";
const FLAG_MAX_TOKENS: u32 = 200;

/// Supplies flags and feedback for the quiz.
#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Up to `count` distinct short phrases of the given colour.
    async fn flags(&self, color: FlagColor, count: usize) -> VoiceResult<Vec<String>>;

    async fn feedback(&self, score: FlagScore) -> VoiceResult<String>;
}

/// `FlagSource` backed by a reply generator.
pub struct GeneratedFlags {
    generator: Arc<dyn ResponseGenerator>,
}

impl GeneratedFlags {
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { generator }
    }

    async fn ask(&self, prompt: String) -> VoiceResult<String> {
        let request = GenerationRequest {
            system_prompt: FLAG_SYSTEM_PROMPT.to_string(),
            history: Vec::new(),
            utterance: prompt,
            max_tokens: FLAG_MAX_TOKENS,
        };
        self.generator.generate(&request).await
    }
}

#[async_trait]
impl FlagSource for GeneratedFlags {
    async fn flags(&self, color: FlagColor, count: usize) -> VoiceResult<Vec<String>> {
        let prompt = format!(
            "Generate {} unique {} in relationships, each as a short phrase.",
            count,
            color.plural()
        );
        let reply = self.ask(prompt).await?;
        let mut flags: Vec<String> = Vec::new();
        for flag in parse_flag_lines(&reply) {
            if !flags.iter().any(|f| f.eq_ignore_ascii_case(&flag)) {
                flags.push(flag);
            }
        }
        flags.truncate(count);
        Ok(flags)
    }

    async fn feedback(&self, score: FlagScore) -> VoiceResult<String> {
        Ok(self.ask(score.feedback_prompt()).await?.trim().to_string())
    }
}

/// Ask `source` for a fresh pool; the built-in flags stand in if either colour
/// fails or comes back empty.
pub async fn build_pool(source: &dyn FlagSource) -> FlagPool {
    let red = source.flags(FlagColor::Red, POOL_SIZE).await;
    let green = source.flags(FlagColor::Green, POOL_SIZE).await;
    match (red, green) {
        (Ok(red), Ok(green)) if !red.is_empty() && !green.is_empty() => {
            info!("🚩 Generated {} red and {} green flags", red.len(), green.len());
            FlagPool::new(red, green)
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!("Flag generation failed ({}), using built-in flags", e);
            FlagPool::fallback()
        }
        _ => {
            warn!("Flag generation returned nothing, using built-in flags");
            FlagPool::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use crate::generator::ScriptedGenerator;

    #[tokio::test]
    async fn flags_are_asked_for_and_parsed() {
        let generator = Arc::new(ScriptedGenerator::replying([
            "1. Love bombing\n2. Ghosting\n3. ghosting\n",
            "- Listens to you\n- Keeps promises",
        ]));
        let pool = build_pool(&GeneratedFlags::new(generator.clone())).await;
        assert_eq!(
            pool,
            FlagPool::new(
                vec!["Love bombing".to_string(), "Ghosting".to_string()],
                vec!["Listens to you".to_string(), "Keeps promises".to_string()],
            )
        );

        let requests = generator.requests();
        assert_eq!(
            requests[0].utterance,
            "Generate 7 unique red flags in relationships, each as a short phrase."
        );
        assert_eq!(requests[1].system_prompt, FLAG_SYSTEM_PROMPT);
        assert_eq!(requests[1].max_tokens, 200);
        assert!(requests[1].utterance.contains("green flags"));
    }

    #[tokio::test]
    async fn failed_or_empty_generation_falls_back() {
        let failing = ScriptedGenerator::new(vec![Err(VoiceError::GenerationUnavailable("401".to_string()))]);
        let pool = build_pool(&GeneratedFlags::new(Arc::new(failing))).await;
        assert_eq!(pool, FlagPool::fallback());

        let silent = ScriptedGenerator::replying(["1. Lying"]);
        let pool = build_pool(&GeneratedFlags::new(Arc::new(silent))).await;
        assert_eq!(pool, FlagPool::fallback());
    }

    #[tokio::test]
    async fn feedback_uses_the_score_prompt() {
        let generator = Arc::new(ScriptedGenerator::replying(["  Great instincts!  "]));
        let source = GeneratedFlags::new(generator.clone());
        let score = FlagScore { correct: 4, total: 5 };
        assert_eq!(source.feedback(score).await.unwrap(), "Great instincts!");
        assert!(generator.requests()[0].utterance.contains("4 out of 5"));
    }

    #[test]
    fn flag_count_is_capped() {
        let source = GeneratedFlags::new(Arc::new(ScriptedGenerator::replying(["a\nb\nc\nd"])));
        let flags = tokio_test::block_on(source.flags(FlagColor::Red, 2)).unwrap();
        assert_eq!(flags, vec!["a".to_string(), "b".to_string()]);
    }
}
