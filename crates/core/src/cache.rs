//! Lookup of prior user decisions by exact filename.

use crate::models::{find_destination, ClassificationResult, CorrectionRecord, Outcome, Source};

/// The most recent accepted or corrected decision for `filename` decides the hit.
/// If its destination is no longer configured, the lookup misses. Dismissals are
/// never cached.
pub fn lookup(
    filename: &str,
    history: &[CorrectionRecord],
    destinations: &[String],
) -> Option<ClassificationResult> {
    let latest = history
        .iter()
        .filter(|r| r.filename == filename && r.outcome != Outcome::Dismissed)
        .max_by_key(|r| r.created_at)?;

    let destination = find_destination(destinations, &latest.chosen)?;
    Some(ClassificationResult {
        is_relevant: true,
        destination: destination.clone(),
        confidence: 1.0,
        rationale: "previously classified by user".to_string(),
        suggested_rename: None,
        source: Source::Cache,
    })
}
