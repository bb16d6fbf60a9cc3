//! Confidence adjustment from user feedback.
//!
//! Everything here is a fold over the append-only correction log. Nothing is
//! stored separately, so counts cannot drift from the history they describe.

use crate::config::ClassificationConfig;
use crate::models::{ClassificationResult, CorrectionRecord, Outcome};
use serde::Serialize;
use std::collections::BTreeMap;

pub const ACCEPT_BOOST: f32 = 0.10;
pub const CORRECTION_PENALTY: f32 = 0.40;
pub const LEARNING_CAP: f32 = 0.50;
pub const REPUTATION_WEIGHT: f32 = 0.05;
pub const REPUTATION_MIN_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackCounts {
    pub accepted: usize,
    pub corrected: usize,
    pub dismissed: usize,
}

impl FeedbackCounts {
    /// Feedback that says something about suggestion quality.
    pub fn judged(&self) -> usize {
        self.accepted + self.corrected
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accepted => self.accepted += 1,
            Outcome::Corrected => self.corrected += 1,
            Outcome::Dismissed => self.dismissed += 1,
        }
    }
}

fn counts<'a>(records: impl Iterator<Item = &'a CorrectionRecord>) -> FeedbackCounts {
    let mut c = FeedbackCounts::default();
    for r in records {
        c.add(r.outcome);
    }
    c
}

/// Counts for suggestions of `destination` made for exactly `filename`.
pub fn pair_counts(filename: &str, destination: &str, history: &[CorrectionRecord]) -> FeedbackCounts {
    counts(
        history
            .iter()
            .filter(|r| r.filename == filename && r.suggested.eq_ignore_ascii_case(destination)),
    )
}

/// Counts for every suggestion of `destination`.
pub fn destination_counts(destination: &str, history: &[CorrectionRecord]) -> FeedbackCounts {
    counts(
        history
            .iter()
            .filter(|r| r.suggested.eq_ignore_ascii_case(destination)),
    )
}

/// `+0.10` per acceptance, `-0.40` per correction, clamped to `[-0.5, 0.5]`.
/// Dismissals mean "irrelevant", not "wrong", so they count for nothing.
pub fn learning_adjustment(filename: &str, destination: &str, history: &[CorrectionRecord]) -> f32 {
    let c = pair_counts(filename, destination, history);
    let raw = ACCEPT_BOOST * c.accepted as f32 - CORRECTION_PENALTY * c.corrected as f32;
    raw.clamp(-LEARNING_CAP, LEARNING_CAP)
}

/// Gentle nudge from a destination's overall track record, once it has enough
/// judged suggestions.
pub fn reputation_adjustment(destination: &str, history: &[CorrectionRecord]) -> f32 {
    let c = destination_counts(destination, history);
    let n = c.judged();
    if n < REPUTATION_MIN_SAMPLES {
        return 0.0;
    }
    let accept_rate = c.accepted as f32 / n as f32;
    let reject_rate = c.corrected as f32 / n as f32;
    ((accept_rate - reject_rate) * REPUTATION_WEIGHT).clamp(-REPUTATION_WEIGHT, REPUTATION_WEIGHT)
}

/// Final actionable confidence for a raw score. Pure and deterministic in `history`.
pub fn adjust(raw: f32, filename: &str, destination: &str, history: &[CorrectionRecord]) -> f32 {
    let adjusted = raw
        + learning_adjustment(filename, destination, history)
        + reputation_adjustment(destination, history);
    adjusted.clamp(0.0, 1.0)
}

/// Rule and cache hits are the user's own word and are not adjusted.
pub fn final_confidence(
    result: &ClassificationResult,
    filename: &str,
    history: &[CorrectionRecord],
) -> f32 {
    if result.source.is_suggestion() && !result.is_unsorted() {
        adjust(result.confidence, filename, &result.destination, history)
    } else {
        result.confidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoMove,
    Suggest,
    Review,
    Skip,
}

pub fn decide(result: &ClassificationResult, final_confidence: f32, cfg: &ClassificationConfig) -> Decision {
    if !result.is_relevant {
        Decision::Skip
    } else if result.is_unsorted() {
        Decision::Review
    } else if final_confidence >= cfg.auto_move_threshold {
        Decision::AutoMove
    } else if final_confidence >= cfg.suggest_threshold {
        Decision::Suggest
    } else {
        Decision::Review
    }
}

/// Recent corrections rendered for the classification service, newest first.
pub fn correction_digest(history: &[CorrectionRecord], limit: usize) -> Vec<String> {
    let mut corrected: Vec<&CorrectionRecord> = history
        .iter()
        .filter(|r| r.outcome == Outcome::Corrected)
        .collect();
    corrected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    corrected
        .into_iter()
        .take(limit)
        .map(|r| {
            format!(
                "\"{}\" → suggested {}, but user moved to {}",
                r.filename, r.suggested, r.chosen
            )
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationStats {
    pub destination: String,
    pub counts: FeedbackCounts,
    pub accept_rate: f32,
    pub reject_rate: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub top: Vec<DestinationStats>,
    pub problems: Vec<DestinationStats>,
    pub recent: Vec<CorrectionRecord>,
}

const INSIGHT_MIN_SAMPLES: usize = 3;

pub fn destination_stats(history: &[CorrectionRecord]) -> Vec<DestinationStats> {
    let mut grouped: BTreeMap<String, FeedbackCounts> = BTreeMap::new();
    for r in history {
        grouped.entry(r.suggested.clone()).or_default().add(r.outcome);
    }
    grouped
        .into_iter()
        .map(|(destination, counts)| {
            let n = counts.judged().max(1) as f32;
            DestinationStats {
                destination,
                accept_rate: counts.accepted as f32 / n,
                reject_rate: counts.corrected as f32 / n,
                counts,
            }
        })
        .collect()
}

pub fn insights(history: &[CorrectionRecord], limit: usize) -> Insights {
    let stats: Vec<DestinationStats> = destination_stats(history)
        .into_iter()
        .filter(|s| s.counts.judged() >= INSIGHT_MIN_SAMPLES)
        .collect();

    let mut top = stats.clone();
    top.sort_by(|a, b| b.accept_rate.total_cmp(&a.accept_rate));
    top.truncate(limit);

    let mut problems = stats;
    problems.retain(|s| s.counts.corrected > 0);
    problems.sort_by(|a, b| b.reject_rate.total_cmp(&a.reject_rate));
    problems.truncate(limit);

    let mut recent = history.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(limit);

    Insights {
        top,
        problems,
        recent,
    }
}
