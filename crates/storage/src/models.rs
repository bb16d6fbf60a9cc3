use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// User-authored glob pattern routing matching filenames to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClassificationRule {
    #[serde(default)]
    pub id: Option<i64>,
    pub pattern: String,
    pub destination: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accepted,
    Corrected,
    Dismissed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Corrected => "corrected",
            Outcome::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown outcome: {0}")]
pub struct UnknownOutcome(pub String);

impl FromStr for Outcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Outcome::Accepted),
            "corrected" => Ok(Outcome::Corrected),
            "dismissed" => Ok(Outcome::Dismissed),
            other => Err(UnknownOutcome(other.to_string())),
        }
    }
}

/// One terminal user decision about a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub filename: String,
    pub suggested: String,
    pub chosen: String,
    pub outcome: Outcome,
    /// Unix timestamp, milliseconds.
    pub created_at: i64,
}

#[derive(Debug, FromRow)]
pub(crate) struct CorrectionRow {
    pub filename: String,
    pub suggested: String,
    pub chosen: String,
    pub outcome: String,
    pub created_at: i64,
}

impl TryFrom<CorrectionRow> for CorrectionRecord {
    type Error = UnknownOutcome;

    fn try_from(row: CorrectionRow) -> Result<Self, Self::Error> {
        Ok(CorrectionRecord {
            outcome: row.outcome.parse()?,
            filename: row.filename,
            suggested: row.suggested,
            chosen: row.chosen,
            created_at: row.created_at,
        })
    }
}

/// A completed move. `filename` is the name at the destination; `original_filename`
/// is set when the move also renamed the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ActivityEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub filename: String,
    pub original_filename: Option<String>,
    pub source: String,
    pub destination: String,
    pub undone: bool,
    /// Unix timestamp, milliseconds.
    pub created_at: i64,
}
