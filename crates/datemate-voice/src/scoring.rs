//! Post-session feedback scoring.
//!
//! The stage fixes the aggregation contract: raw scores are normalized by 9,
//! the aggregate is their mean, and the encouragement line is attached when the
//! aggregate is above the threshold. Where raw scores come from is a
//! `ScoringStrategy`; the default draws them uniformly from a configured range.

use crate::turn::Turn;
use datemate_core::{ScoringSettings, RAW_SCORE_CEILING};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    /// 0..=9
    pub raw: u8,
    /// 0.0..=1.0
    pub normalized: f64,
}

impl CriterionScore {
    pub fn new(criterion: impl Into<String>, raw: u8) -> Self {
        let raw = raw.min(RAW_SCORE_CEILING);
        Self {
            criterion: criterion.into(),
            raw,
            normalized: f64::from(raw) / f64::from(RAW_SCORE_CEILING),
        }
    }

    /// 0..=10 score as shown on the feedback screen.
    pub fn display_score(&self) -> u8 {
        (self.normalized * 10.0).floor() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub criteria: Vec<CriterionScore>,
    pub aggregate: f64,
    pub encouragement: Option<String>,
}

/// Mean of normalized scores; 0.0 for an empty slice.
pub fn aggregate(normalized: &[f64]) -> f64 {
    if normalized.is_empty() {
        return 0.0;
    }
    normalized.iter().sum::<f64>() / normalized.len() as f64
}

/// Source of per-criterion raw scores. Swap in a transcript-aware evaluator here.
pub trait ScoringStrategy: Send + Sync {
    /// One raw score (0..=9) per criterion, in order.
    fn raw_scores(&self, turns: &[Turn], criteria: &[String]) -> Vec<u8>;
}

/// Placeholder evaluator: uniform over `min..=max`, ignoring the transcript.
#[derive(Debug)]
pub struct UniformRandomStrategy {
    min: u8,
    max: u8,
    rng: Mutex<StdRng>,
}

impl UniformRandomStrategy {
    pub fn new(min: u8, max: u8) -> Self {
        Self::with_rng(min, max, StdRng::from_entropy())
    }

    /// Reproducible draws.
    pub fn seeded(min: u8, max: u8, seed: u64) -> Self {
        Self::with_rng(min, max, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min: u8, max: u8, rng: StdRng) -> Self {
        let max = max.min(RAW_SCORE_CEILING);
        Self {
            min: min.min(max),
            max,
            rng: Mutex::new(rng),
        }
    }
}

impl ScoringStrategy for UniformRandomStrategy {
    fn raw_scores(&self, _turns: &[Turn], criteria: &[String]) -> Vec<u8> {
        match self.rng.lock() {
            Ok(mut rng) => criteria
                .iter()
                .map(|_| rng.gen_range(self.min..=self.max))
                .collect(),
            // poisoned: fall back to the bottom of the range
            Err(_) => vec![self.min; criteria.len()],
        }
    }
}

/// Fixed raw scores, cycled if there are more criteria than values.
#[derive(Debug, Clone)]
pub struct FixedScores(pub Vec<u8>);

impl ScoringStrategy for FixedScores {
    fn raw_scores(&self, _turns: &[Turn], criteria: &[String]) -> Vec<u8> {
        if self.0.is_empty() {
            return vec![0; criteria.len()];
        }
        self.0.iter().copied().cycle().take(criteria.len()).collect()
    }
}

pub struct ScoringStage {
    criteria: Vec<String>,
    strategy: Box<dyn ScoringStrategy>,
    threshold: f64,
    encouragement: String,
}

impl ScoringStage {
    pub fn new(
        criteria: Vec<String>,
        strategy: Box<dyn ScoringStrategy>,
        threshold: f64,
        encouragement: impl Into<String>,
    ) -> Self {
        Self {
            criteria,
            strategy,
            threshold,
            encouragement: encouragement.into(),
        }
    }

    /// Default criteria and threshold with the uniform random strategy.
    pub fn from_settings(settings: &ScoringSettings) -> Self {
        Self::with_strategy(
            settings,
            Box::new(UniformRandomStrategy::new(settings.raw_min, settings.raw_max)),
        )
    }

    pub fn with_strategy(settings: &ScoringSettings, strategy: Box<dyn ScoringStrategy>) -> Self {
        Self::new(
            settings.criteria.clone(),
            strategy,
            settings.encouragement_threshold,
            settings.encouragement.clone(),
        )
    }

    pub fn criteria(&self) -> &[String] {
        &self.criteria
    }

    /// Score a finished conversation.
    pub fn score(&self, turns: &[Turn]) -> ScoreReport {
        let raws = self.strategy.raw_scores(turns, &self.criteria);
        let criteria: Vec<CriterionScore> = self
            .criteria
            .iter()
            .zip(raws.into_iter().chain(std::iter::repeat(0)))
            .map(|(name, raw)| CriterionScore::new(name.clone(), raw))
            .collect();
        let normalized: Vec<f64> = criteria.iter().map(|c| c.normalized).collect();
        let aggregate = aggregate(&normalized);
        let encouragement = (aggregate > self.threshold).then(|| self.encouragement.clone());
        debug!("Scored {} turns across {} criteria", turns.len(), criteria.len());
        info!("📊 Session score: {:.3}", aggregate);
        ScoreReport {
            criteria,
            aggregate,
            encouragement,
        }
    }
}

impl std::fmt::Debug for ScoringStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringStage")
            .field("criteria", &self.criteria)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_is_mean_of_normalized() {
        let value = aggregate(&[0.67, 0.78, 0.89, 0.67, 1.0]);
        assert!((value - 0.802).abs() < 1e-9);
        assert_eq!(aggregate(&[]), 0.0);
    }

    #[test]
    fn encouragement_above_threshold() {
        let stage = ScoringStage::with_strategy(
            &ScoringSettings::default(),
            Box::new(FixedScores(vec![6, 7, 8, 6, 9])),
        );
        let report = stage.score(&[]);
        assert!((report.aggregate - 0.8).abs() < 1e-9);
        assert_eq!(report.encouragement.as_deref(), Some("You will secure a second date"));
        let displays: Vec<u8> = report.criteria.iter().map(|c| c.display_score()).collect();
        assert_eq!(displays, vec![6, 7, 8, 6, 10]);
    }

    #[test]
    fn no_encouragement_at_or_below_threshold() {
        let mut settings = ScoringSettings::default();
        settings.encouragement_threshold = 0.8;
        let stage = ScoringStage::with_strategy(&settings, Box::new(FixedScores(vec![6, 7, 8, 6, 9])));
        // 0.8 is not strictly above 0.8
        assert!(stage.score(&[]).encouragement.is_none());
    }

    #[test]
    fn uniform_strategy_stays_in_range() {
        let strategy = UniformRandomStrategy::seeded(6, 9, 42);
        let criteria = ScoringSettings::default().criteria;
        for _ in 0..200 {
            let raws = strategy.raw_scores(&[], &criteria);
            assert_eq!(raws.len(), criteria.len());
            assert!(raws.iter().all(|r| (6..=9).contains(r)));
        }
    }

    #[test]
    fn default_policy_always_encourages() {
        // 6/9 > 0.6, so the placeholder range can never fall below the threshold
        let stage = ScoringStage::from_settings(&ScoringSettings::default());
        for _ in 0..50 {
            assert!(stage.score(&[]).encouragement.is_some());
        }
    }

    #[test]
    fn raw_scores_are_clamped() {
        let score = CriterionScore::new("Confidence", 12);
        assert_eq!(score.raw, 9);
        assert_eq!(score.normalized, 1.0);
    }
}
