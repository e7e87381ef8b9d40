//! Conversation turns: the append-only history of a mock date.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => f.write_str("user"),
            Speaker::Agent => f.write_str("agent"),
        }
    }
}

/// One recorded contribution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A user utterance and the reply it got, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange<'a> {
    pub user: &'a Turn,
    pub agent: Option<&'a Turn>,
}

/// Pair turns into exchanges: each user turn with the agent turn that answered it.
pub fn exchanges(turns: &[Turn]) -> Vec<Exchange<'_>> {
    let mut out = Vec::new();
    let mut iter = turns.iter().peekable();
    while let Some(turn) = iter.next() {
        if turn.speaker != Speaker::User {
            continue;
        }
        let agent = iter.next_if(|next| next.speaker == Speaker::Agent);
        out.push(Exchange { user: turn, agent });
    }
    out
}

/// Last `n` answered exchanges, oldest first, flattened back into turns.
pub fn recent_history(turns: &[Turn], n: usize) -> Vec<Turn> {
    let answered: Vec<Exchange<'_>> = exchanges(turns)
        .into_iter()
        .filter(|e| e.agent.is_some())
        .collect();
    let skip = answered.len().saturating_sub(n);
    answered
        .into_iter()
        .skip(skip)
        .flat_map(|e| std::iter::once(e.user.clone()).chain(e.agent.cloned()))
        .collect()
}

/// Ordering check: starts with the user, never two agent turns in a row, and every
/// agent turn answers the user turn right before it.
pub fn is_well_ordered(turns: &[Turn]) -> bool {
    let mut prev: Option<Speaker> = None;
    for turn in turns {
        match (prev, turn.speaker) {
            (None, Speaker::Agent) => return false,
            (Some(Speaker::Agent), Speaker::Agent) => return false,
            _ => {}
        }
        prev = Some(turn.speaker);
    }
    turns.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

/// Strict User/Agent alternation starting with the user.
pub fn is_strictly_alternating(turns: &[Turn]) -> bool {
    turns.iter().enumerate().all(|(i, t)| {
        let expected = if i % 2 == 0 { Speaker::User } else { Speaker::Agent };
        t.speaker == expected
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_pair_replies_with_utterances() {
        let turns = vec![
            Turn::user("Hi"),
            Turn::agent("Hello!"),
            Turn::user("Anyone there?"),
            Turn::user("Hello?"),
            Turn::agent("Sorry, yes."),
        ];
        let ex = exchanges(&turns);
        assert_eq!(ex.len(), 3);
        assert_eq!(ex[0].agent.map(|t| t.text.as_str()), Some("Hello!"));
        assert!(ex[1].agent.is_none());
        assert_eq!(ex[2].user.text, "Hello?");
    }

    #[test]
    fn recent_history_keeps_latest_answered_exchanges() {
        let turns = vec![
            Turn::user("one"),
            Turn::agent("1"),
            Turn::user("two"),
            Turn::agent("2"),
            Turn::user("unanswered"),
            Turn::user("three"),
            Turn::agent("3"),
        ];
        let history = recent_history(&turns, 2);
        let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "2", "three", "3"]);
    }

    #[test]
    fn ordering_rules() {
        assert!(is_well_ordered(&[]));
        assert!(!is_well_ordered(&[Turn::agent("first?")]));
        assert!(!is_well_ordered(&[Turn::user("a"), Turn::agent("b"), Turn::agent("c")]));
        assert!(is_well_ordered(&[Turn::user("a"), Turn::user("b"), Turn::agent("c")]));

        assert!(is_strictly_alternating(&[Turn::user("a"), Turn::agent("b")]));
        assert!(!is_strictly_alternating(&[Turn::user("a"), Turn::user("b")]));
    }
}
