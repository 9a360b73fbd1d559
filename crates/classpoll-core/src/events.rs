use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateResult;
use crate::chat::ChatMessage;
use crate::ids::ConnectionId;
use crate::poll::{Poll, Response};

/// A connected student as shown to the moderator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub name: String,
    pub connection_id: ConnectionId,
}

/// Events received from clients over the WebSocket. The wire envelope
/// is `{"event": <kebab-case name>, "data": <payload>}`; a frame that
/// does not parse into one of these variants is rejected before it
/// reaches the state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinAsTeacher,
    JoinAsStudent {
        name: String,
    },
    CreatePoll {
        question: String,
        options: Vec<String>,
        time_limit: u32,
    },
    SubmitResponse {
        answer: String,
    },
    EndPoll,
    GetPollResults,
    GetPastPolls,
    SendChatMessage {
        message: String,
    },
    GetChatHistory,
    KickStudent {
        name: String,
    },
}

impl ClientEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinAsTeacher => "join-as-teacher",
            Self::JoinAsStudent { .. } => "join-as-student",
            Self::CreatePoll { .. } => "create-poll",
            Self::SubmitResponse { .. } => "submit-response",
            Self::EndPoll => "end-poll",
            Self::GetPollResults => "get-poll-results",
            Self::GetPastPolls => "get-past-polls",
            Self::SendChatMessage { .. } => "send-chat-message",
            Self::GetChatHistory => "get-chat-history",
            Self::KickStudent { .. } => "kick-student",
        }
    }
}

/// Events pushed to clients. Names are a protocol contract with the
/// transport collaborator and must remain stable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    PollStatus {
        current_poll: Option<Poll>,
        time_remaining: u32,
        connected_students: Vec<StudentInfo>,
        students_count: u32,
    },
    NameTaken {
        message: String,
    },
    JoinedSuccessfully {
        name: String,
    },
    StudentJoined {
        name: String,
        students_count: u32,
        connected_students: Vec<StudentInfo>,
    },
    StudentLeft {
        name: String,
        students_count: u32,
        connected_students: Vec<StudentInfo>,
    },
    CurrentPoll {
        poll: Poll,
        time_remaining: u32,
        has_answered: bool,
    },
    PollCreated {
        poll: Poll,
    },
    PollCreationError {
        message: String,
    },
    NewPoll {
        poll: Poll,
        time_remaining: u32,
    },
    PollTimeUpdate {
        seconds_remaining: u32,
    },
    ResponseSubmitted,
    ResponseError {
        message: String,
    },
    PollResultsUpdate {
        responses: Vec<Response>,
        answered_count: u32,
        total_students: u32,
    },
    PollEnded {
        poll: Poll,
        results: AggregateResult,
    },
    PollResults {
        results: AggregateResult,
    },
    PastPolls {
        polls: Vec<Poll>,
    },
    PastPollsError {
        message: String,
    },
    NewChatMessage {
        message: ChatMessage,
    },
    ChatError {
        message: String,
    },
    ChatHistory {
        messages: Vec<ChatMessage>,
    },
    ChatHistoryError {
        message: String,
    },
    KickedOut {
        message: String,
    },
    ProtocolError {
        message: String,
    },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PollStatus { .. } => "poll-status",
            Self::NameTaken { .. } => "name-taken",
            Self::JoinedSuccessfully { .. } => "joined-successfully",
            Self::StudentJoined { .. } => "student-joined",
            Self::StudentLeft { .. } => "student-left",
            Self::CurrentPoll { .. } => "current-poll",
            Self::PollCreated { .. } => "poll-created",
            Self::PollCreationError { .. } => "poll-creation-error",
            Self::NewPoll { .. } => "new-poll",
            Self::PollTimeUpdate { .. } => "poll-time-update",
            Self::ResponseSubmitted => "response-submitted",
            Self::ResponseError { .. } => "response-error",
            Self::PollResultsUpdate { .. } => "poll-results-update",
            Self::PollEnded { .. } => "poll-ended",
            Self::PollResults { .. } => "poll-results",
            Self::PastPolls { .. } => "past-polls",
            Self::PastPollsError { .. } => "past-polls-error",
            Self::NewChatMessage { .. } => "new-chat-message",
            Self::ChatError { .. } => "chat-error",
            Self::ChatHistory { .. } => "chat-history",
            Self::ChatHistoryError { .. } => "chat-history-error",
            Self::KickedOut { .. } => "kicked-out",
            Self::ProtocolError { .. } => "protocol-error",
        }
    }
}
