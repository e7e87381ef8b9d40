//! "Red flag or green flag?" quiz.
//!
//! A `FlagPool` holds candidate red and green flags; `deal` draws a round with a
//! coin flip per question and never repeats a flag. `FlagGame` walks the user
//! through the round and counts correct answers.

use crate::error::{CoreError, CoreResult};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Questions per round.
pub const ROUND_SIZE: usize = 5;

/// Flags requested per colour when building a pool.
pub const POOL_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagColor {
    Red,
    Green,
}

impl FlagColor {
    /// Plural label used when asking for flags, e.g. "red flags".
    pub fn plural(&self) -> &'static str {
        match self {
            FlagColor::Red => "red flags",
            FlagColor::Green => "green flags",
        }
    }
}

impl fmt::Display for FlagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagColor::Red => write!(f, "red"),
            FlagColor::Green => write!(f, "green"),
        }
    }
}

/// Accepts "red", "green", "Red flag", " GREEN " and so on.
impl FromStr for FlagColor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let answer = s.trim().to_lowercase();
        let answer = answer.strip_suffix("flag").unwrap_or(&answer).trim();
        match answer {
            "red" => Ok(FlagColor::Red),
            "green" => Ok(FlagColor::Green),
            _ => Err(CoreError::InvalidAnswer(format!(
                "expected 'red' or 'green', got {:?}",
                s.trim()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub description: String,
    pub color: FlagColor,
}

impl Flag {
    pub fn new(description: impl Into<String>, color: FlagColor) -> Self {
        Self {
            description: description.into(),
            color,
        }
    }
}

/// Split a model reply into one flag per line, dropping list markers.
pub fn parse_flag_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches(|c: char| c.is_ascii_digit());
            let line = line.trim_start_matches(&['.', ')', '-', '*', '•'][..]);
            line.trim().trim_matches('"').trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Candidate flags to deal rounds from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagPool {
    red: Vec<String>,
    green: Vec<String>,
}

impl FlagPool {
    pub fn new(red: Vec<String>, green: Vec<String>) -> Self {
        Self { red, green }
    }

    /// Built-in flags for when none can be generated.
    pub fn fallback() -> Self {
        let owned = |xs: &[&str]| -> Vec<String> { xs.iter().map(|s| s.to_string()).collect() };
        Self::new(
            owned(&[
                "Too much jealousy",
                "Always on their phone",
                "Doesn't respect your boundaries",
                "Talks down to waiters",
                "Keeps score in arguments",
            ]),
            owned(&[
                "Supports your career",
                "Listens to you",
                "Apologizes sincerely",
                "Makes time for your friends",
                "Communicates openly",
            ]),
        )
    }

    pub fn len(&self) -> usize {
        self.red.len() + self.green.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw up to `count` flags. Each question flips a coin for its colour and
    /// takes the other colour once one runs out. Drawn flags leave the pool.
    pub fn deal<R: Rng>(&mut self, count: usize, rng: &mut R) -> Vec<Flag> {
        let mut round = Vec::with_capacity(count);
        while round.len() < count && !self.is_empty() {
            let want_red = rng.gen_bool(0.5);
            let color = match (want_red, self.red.is_empty(), self.green.is_empty()) {
                (true, false, _) | (false, _, true) => FlagColor::Red,
                _ => FlagColor::Green,
            };
            let bucket = match color {
                FlagColor::Red => &mut self.red,
                FlagColor::Green => &mut self.green,
            };
            let index = rng.gen_range(0..bucket.len());
            round.push(Flag::new(bucket.swap_remove(index), color));
        }
        round.shuffle(rng);
        round
    }
}

/// Result of answering one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub actual: FlagColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagScore {
    pub correct: usize,
    pub total: usize,
}

impl FlagScore {
    /// Prompt asking the reply model for encouraging feedback on this score.
    pub fn feedback_prompt(&self) -> String {
        format!(
            "Generate encouraging feedback for a player who got {} out of {} correct in a relationship flag identification game.",
            self.correct, self.total
        )
    }
}

impl fmt::Display for FlagScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.correct, self.total)
    }
}

/// One round of the quiz.
#[derive(Debug, Clone)]
pub struct FlagGame {
    flags: Vec<Flag>,
    index: usize,
    correct: usize,
}

impl FlagGame {
    pub fn new(flags: Vec<Flag>) -> Self {
        Self {
            flags,
            index: 0,
            correct: 0,
        }
    }

    /// Deal a full round from `pool`.
    pub fn deal<R: Rng>(pool: &mut FlagPool, rng: &mut R) -> Self {
        Self::new(pool.deal(ROUND_SIZE, rng))
    }

    /// The flag awaiting an answer, with its 1-based question number.
    pub fn current(&self) -> Option<(usize, &Flag)> {
        self.flags.get(self.index).map(|flag| (self.index + 1, flag))
    }

    pub fn answer(&mut self, guess: FlagColor) -> CoreResult<AnswerOutcome> {
        let flag = self.flags.get(self.index).ok_or(CoreError::GameOver)?;
        let outcome = AnswerOutcome {
            correct: flag.color == guess,
            actual: flag.color,
        };
        if outcome.correct {
            self.correct += 1;
        }
        self.index += 1;
        Ok(outcome)
    }

    pub fn is_over(&self) -> bool {
        self.index >= self.flags.len()
    }

    pub fn score(&self) -> FlagScore {
        FlagScore {
            correct: self.correct,
            total: self.flags.len(),
        }
    }
}
