//! Conversation transcripts and their quality scores

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::sim::constants::conversation::NEUTRAL_BAND;

/// One line of dialogue
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub speaker: usize,
    pub listener: usize,
    pub text: String,
    /// Tone of the line in [-1, 1]
    pub sentiment: f32,
    /// Speaker's relationship toward the listener when the line was said
    pub relationship: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuality {
    pub turn_count: u32,
    /// Share of turns repeating an earlier line
    pub repetition_rate: f64,
    pub unique_turn_ratio: f64,
    /// Share of non-neutral turns whose tone matches the relationship
    pub relationship_consistency_score: f64,
}

/// Lowercase, strip punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn evaluate_conversation(turns: &[ConversationTurn]) -> ConversationQuality {
    if turns.is_empty() {
        return ConversationQuality::default();
    }

    let total = turns.len() as f64;
    let unique: FxHashSet<String> = turns.iter().map(|t| normalize(&t.text)).collect();
    let unique_count = unique.len() as f64;

    let mut rated = 0u32;
    let mut consistent = 0u32;
    for turn in turns {
        if turn.relationship.abs() < NEUTRAL_BAND {
            continue;
        }
        rated += 1;
        if turn.sentiment != 0.0 && turn.sentiment.signum() == turn.relationship.signum() {
            consistent += 1;
        }
    }

    ConversationQuality {
        turn_count: turns.len() as u32,
        repetition_rate: (total - unique_count) / total,
        unique_turn_ratio: unique_count / total,
        relationship_consistency_score: if rated == 0 {
            0.0
        } else {
            consistent as f64 / rated as f64
        },
    }
}
