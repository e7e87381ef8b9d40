//! Layered configuration for mock-date sessions.
//!
//! Precedence: built-in defaults < TOML file (`DATEMATE_CONFIG`, else
//! `config/datemate.toml` when present) < environment (`DATEMATE__SECTION__KEY`,
//! e.g. `DATEMATE__SESSION__DURATION_SECS=180`).
//!
//! | Section | Key | Default |
//! |---------|-----|---------|
//! | session | duration_secs | 300 |
//! | session | tick_ms | 1000 |
//! | capture | silence_threshold_ms | 2500 |
//! | capture | debounce_ms | 500 |
//! | capture | poll_ms | 500 |
//! | pacing | settle_base_ms | 3000 |
//! | pacing | settle_per_char_ms | 50 |
//! | generation | max_tokens | 50 |
//! | generation | history_exchanges | 5 |
//! | synthesis | stability / similarity_boost | 0.5 / 0.5 |
//! | scoring | raw_min..=raw_max | 6..=9 |
//! | scoring | encouragement_threshold | 0.6 |

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Highest raw score a criterion can receive.
pub const RAW_SCORE_CEILING: u8 = 9;

const DEFAULT_CONFIG_PATH: &str = "config/datemate.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub duration_secs: u64,
    pub tick_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            tick_ms: 1000,
        }
    }
}

impl SessionSettings {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// End-of-utterance detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Silence after the last transcript change before the utterance is final.
    pub silence_threshold_ms: u64,
    /// Extra grace added on top of the threshold for short pauses.
    pub debounce_ms: u64,
    /// How often the silence check runs.
    pub poll_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            silence_threshold_ms: 2500,
            debounce_ms: 500,
            poll_ms: 500,
        }
    }
}

/// Settle delay after the agent speaks: base + per-character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub settle_base_ms: u64,
    pub settle_per_char_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            settle_base_ms: 3000,
            settle_per_char_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// OpenAI-compatible base URL without trailing slash.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Completed user/agent exchanges sent back as context.
    pub history_exchanges: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.perplexity.ai".to_string(),
            api_key: None,
            model: "mistral-7b-instruct".to_string(),
            max_tokens: 50,
            temperature: 0.7,
            history_exchanges: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub timeout_secs: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.elevenlabs.io/v1".to_string(),
            api_key: None,
            voice_id: "jsCqWAovK2LkecY7zXl4".to_string(),
            model_id: "eleven_monolingual_v1".to_string(),
            stability: 0.5,
            similarity_boost: 0.5,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub raw_min: u8,
    pub raw_max: u8,
    pub encouragement_threshold: f64,
    pub encouragement: String,
    pub criteria: Vec<String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            raw_min: 6,
            raw_max: RAW_SCORE_CEILING,
            encouragement_threshold: 0.6,
            encouragement: "You will secure a second date".to_string(),
            criteria: vec![
                "Compatibility".to_string(),
                "Quality of conversation".to_string(),
                "Confidence".to_string(),
                "Respectfulness".to_string(),
                "Enthusiasm".to_string(),
            ],
        }
    }
}

/// Everything a mock-date session can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateConfig {
    pub session: SessionSettings,
    pub capture: CaptureSettings,
    pub pacing: PacingSettings,
    pub generation: GenerationSettings,
    pub synthesis: SynthesisSettings,
    pub scoring: ScoringSettings,
}

impl DateConfig {
    /// Load defaults, then the config file if it exists, then `DATEMATE__*` env vars.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("DATEMATE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Same as `load` with an explicit file path. A missing file is skipped.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        let defaults = config::Config::try_from(&DateConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);

        let builder = if path.exists() {
            debug!("Loading config file {}", path.display());
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("DATEMATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: DateConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.session.duration_secs == 0 {
            return Err(CoreError::Config("session.duration_secs must be > 0".to_string()));
        }
        if self.session.tick_ms == 0 {
            return Err(CoreError::Config("session.tick_ms must be > 0".to_string()));
        }
        if self.capture.poll_ms == 0 {
            return Err(CoreError::Config("capture.poll_ms must be > 0".to_string()));
        }
        if self.scoring.raw_min > self.scoring.raw_max {
            return Err(CoreError::Config(format!(
                "scoring range is empty ({}..={})",
                self.scoring.raw_min, self.scoring.raw_max
            )));
        }
        if self.scoring.raw_max > RAW_SCORE_CEILING {
            return Err(CoreError::Config(format!(
                "scoring.raw_max must be <= {}",
                RAW_SCORE_CEILING
            )));
        }
        if !(0.0..=1.0).contains(&self.scoring.encouragement_threshold) {
            return Err(CoreError::Config(
                "scoring.encouragement_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.scoring.criteria.is_empty() {
            return Err(CoreError::Config("scoring.criteria must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, MutexGuard};

    // loading reads the process environment; tests that load take this lock
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets an env var for the life of the guard.
    struct EnvVar(&'static str);

    impl EnvVar {
        fn set(key: &'static str, value: &str) -> Self {
            std::env::set_var(key, value);
            Self(key)
        }
    }

    impl Drop for EnvVar {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    #[test]
    fn defaults_match_session_contract() {
        let cfg = DateConfig::default();
        assert_eq!(cfg.session.duration(), Duration::from_secs(300));
        assert_eq!(cfg.capture.silence_threshold_ms, 2500);
        assert_eq!(cfg.capture.debounce_ms, 500);
        assert_eq!(cfg.pacing.settle_base_ms, 3000);
        assert_eq!(cfg.pacing.settle_per_char_ms, 50);
        assert_eq!(cfg.generation.max_tokens, 50);
        assert_eq!((cfg.scoring.raw_min, cfg.scoring.raw_max), (6, 9));
        assert_eq!(cfg.scoring.criteria.len(), 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let _env = env_lock();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[session]\nduration_secs = 180\n\n[scoring]\nraw_min = 5").unwrap();

        let cfg = DateConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.session.duration_secs, 180);
        assert_eq!(cfg.scoring.raw_min, 5);
        // untouched sections keep their defaults
        assert_eq!(cfg.capture, CaptureSettings::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _env = env_lock();
        let cfg = DateConfig::load_from(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(cfg.session.duration_secs, 300);
    }

    #[test]
    fn environment_overrides_file() {
        let _env = env_lock();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[session]\nduration_secs = 180\n\n[pacing]\nsettle_base_ms = 2000").unwrap();

        let _duration = EnvVar::set("DATEMATE__SESSION__DURATION_SECS", "120");
        let _model = EnvVar::set("DATEMATE__GENERATION__MODEL", "sonar-small");
        let cfg = DateConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.session.duration_secs, 120);
        assert_eq!(cfg.generation.model, "sonar-small");
        // keys the environment leaves alone still come from the file
        assert_eq!(cfg.pacing.settle_base_ms, 2000);
    }

    #[test]
    fn invalid_environment_value_is_rejected() {
        let _env = env_lock();
        let _duration = EnvVar::set("DATEMATE__SESSION__DURATION_SECS", "0");
        let result = DateConfig::load_from(Path::new("does/not/exist.toml"));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn invalid_range_is_rejected() {
        let mut cfg = DateConfig::default();
        cfg.scoring.raw_min = 9;
        cfg.scoring.raw_max = 6;
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));

        let mut cfg = DateConfig::default();
        cfg.scoring.raw_max = 10;
        assert!(cfg.validate().is_err());
    }
}
