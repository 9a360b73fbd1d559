use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::ids::PollId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Active,
    Ended,
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for PollStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown poll status: {other}")),
        }
    }
}

/// A single student's answer. The display name is the dedup key — a
/// student who reconnects under the same name cannot answer twice.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub student_name: String,
    pub answer: String,
    pub submitted_at: DateTime<Utc>,
}

/// The one poll the session may hold at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub time_limit_secs: u32,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub responses: Vec<Response>,
}

impl Poll {
    /// Validate inputs and construct a fresh Active poll.
    /// Rejected before any state mutation: fewer than two options,
    /// an empty option label, or a zero time limit.
    pub fn new(
        question: impl Into<String>,
        options: Vec<String>,
        time_limit_secs: u32,
    ) -> Result<Self, SessionError> {
        if options.len() < 2 {
            return Err(SessionError::InvalidOptions(
                "a poll needs at least two options".into(),
            ));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(SessionError::InvalidOptions(
                "option labels must be non-empty".into(),
            ));
        }
        if time_limit_secs == 0 {
            return Err(SessionError::InvalidTimeLimit(time_limit_secs));
        }

        Ok(Self {
            id: PollId::new(),
            question: question.into(),
            options,
            time_limit_secs,
            status: PollStatus::Active,
            created_at: Utc::now(),
            ended_at: None,
            responses: Vec::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    pub fn has_answered(&self, student_name: &str) -> bool {
        self.responses.iter().any(|r| r.student_name == student_name)
    }

    pub fn responded_count(&self) -> usize {
        self.responses.len()
    }

    /// Flip to Ended. Callers guarantee the poll was Active.
    pub fn end(&mut self) {
        self.status = PollStatus::Ended;
        self.ended_at = Some(Utc::now());
    }
}
