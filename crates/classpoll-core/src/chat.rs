use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

pub const TEACHER_DISPLAY_NAME: &str = "Teacher";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Teacher => write!(f, "teacher"),
            Self::Student => write!(f, "student"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One chat message. Immutable once created; ordering is insertion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: String,
    pub role: Role,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_teacher(body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: TEACHER_DISPLAY_NAME.to_string(),
            role: Role::Teacher,
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn from_student(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: name.into(),
            role: Role::Student,
            body: body.into(),
            sent_at: Utc::now(),
        }
    }
}
