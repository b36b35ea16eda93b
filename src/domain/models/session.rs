//! Purchased analysis sessions and their result rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::tier::{PartNumber, Tier, MAX_PARTS};
use crate::domain::errors::DomainError;

/// Externally visible status of a purchased session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    PendingPayment,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(Self::PendingPayment),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

/// A purchased analysis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    pub email: Option<String>,
    pub tier: Tier,
    pub problem_statement: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisSession {
    pub fn new(
        id: impl Into<String>,
        tier: Tier,
        problem_statement: impl Into<String>,
        email: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email,
            tier,
            problem_statement: problem_statement.into(),
            status: SessionStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generated content stored for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub session_id: String,
    /// Output of the single-shot tier.
    pub single_result: Option<String>,
    /// Part slots indexed by `PartNumber::index`.
    pub parts: [Option<String>; MAX_PARTS],
    pub full_markdown: Option<String>,
    pub is_partial: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AnalysisResult {
    pub fn part(&self, part: PartNumber) -> Option<&str> {
        self.parts[part.index()].as_deref()
    }

    /// Completed parts in ascending order.
    pub fn completed_parts(&self) -> Vec<(PartNumber, &str)> {
        self.parts
            .iter()
            .enumerate()
            .filter_map(|(i, content)| {
                let number = PartNumber::new(u8::try_from(i + 1).ok()?).ok()?;
                content.as_deref().map(|c| (number, c))
            })
            .collect()
    }
}

/// A sparse update to a session's result row. `None` fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct ResultUpdate {
    pub single_result: Option<String>,
    pub part: Option<(PartNumber, String)>,
    pub full_markdown: Option<String>,
    pub is_partial: Option<bool>,
}

impl ResultUpdate {
    pub fn part(part: PartNumber, content: impl Into<String>) -> Self {
        Self {
            part: Some((part, content.into())),
            ..Default::default()
        }
    }

    pub fn single(content: impl Into<String>) -> Self {
        Self {
            single_result: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn markdown(markdown: impl Into<String>, is_partial: bool) -> Self {
        Self {
            full_markdown: Some(markdown.into()),
            is_partial: Some(is_partial),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            SessionStatus::PendingPayment,
            SessionStatus::Processing,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("done".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_completed_parts_skips_gaps() {
        let mut result = AnalysisResult::default();
        result.parts[0] = Some("one".into());
        result.parts[2] = Some("three".into());

        let parts = result.completed_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0.get(), 1);
        assert_eq!(parts[1].0.get(), 3);
        assert_eq!(result.part(PartNumber::new(3).unwrap()), Some("three"));
        assert_eq!(result.part(PartNumber::new(2).unwrap()), None);
    }
}
