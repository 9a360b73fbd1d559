/// Errors the session state machine reports to the originating
/// connection. None of these are broadcast and none are retried; a
/// rejected event leaves prior state intact.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    // Rejected transitions — expected, user-facing
    #[error("the name \"{0}\" is already taken by another student")]
    NameTaken(String),
    #[error("cannot create a new poll while the current poll still has unanswered students")]
    PollInProgress,
    #[error("no active poll")]
    NoActivePoll,
    #[error("\"{0}\" has already answered this poll")]
    DuplicateResponse(String),
    #[error("not authorized")]
    Unauthorized,

    // Protocol violations — rejected before any state mutation
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("invalid time limit: {0} seconds")]
    InvalidTimeLimit(u32),
}

impl SessionError {
    /// A rejected transition, as opposed to a malformed request.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NameTaken(_)
                | Self::PollInProgress
                | Self::NoActivePoll
                | Self::DuplicateResponse(_)
                | Self::Unauthorized
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NameTaken(_) => "name_taken",
            Self::PollInProgress => "poll_in_progress",
            Self::NoActivePoll => "no_active_poll",
            Self::DuplicateResponse(_) => "duplicate_response",
            Self::Unauthorized => "unauthorized",
            Self::InvalidOptions(_) => "invalid_options",
            Self::InvalidTimeLimit(_) => "invalid_time_limit",
        }
    }
}
