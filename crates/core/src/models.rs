use providers::Judgement;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use providers::UNSORTED;
pub use storage::models::{ActivityEntry, ClassificationRule, CorrectionRecord, Outcome};

/// A newly detected file. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub arrived_at: i64,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, size: u64, arrived_at: i64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            path,
            size,
            arrived_at,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self::new(
            path,
            meta.len(),
            chrono::Utc::now().timestamp_millis(),
        ))
    }
}

/// Which stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Rule,
    Cache,
    Name,
    Content,
    Vision,
    /// No service answered.
    Fallback,
}

impl Source {
    /// Whether the result came from the external classifier, and so feeds learning.
    pub fn is_suggestion(&self) -> bool {
        matches!(self, Source::Name | Source::Content | Source::Vision)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_relevant: bool,
    /// A configured destination or [`UNSORTED`].
    pub destination: String,
    pub confidence: f32,
    pub rationale: String,
    pub suggested_rename: Option<String>,
    pub source: Source,
}

impl ClassificationResult {
    pub fn from_judgement(j: Judgement, source: Source) -> Self {
        Self {
            is_relevant: j.is_relevant,
            destination: j.destination,
            confidence: j.confidence.clamp(0.0, 1.0),
            rationale: j.rationale,
            suggested_rename: j.suggested_rename,
            source,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            is_relevant: true,
            destination: UNSORTED.to_string(),
            confidence: 0.0,
            rationale: "classification unavailable".to_string(),
            suggested_rename: None,
            source: Source::Fallback,
        }
    }

    pub fn is_unsorted(&self) -> bool {
        self.destination == UNSORTED || self.destination.is_empty()
    }
}

/// Last path segment of a destination, accepting either separator.
pub fn trailing_segment(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
}

/// Find a configured destination, ignoring case.
pub fn find_destination<'a>(destinations: &'a [String], candidate: &str) -> Option<&'a String> {
    destinations
        .iter()
        .find(|d| d.eq_ignore_ascii_case(candidate))
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
