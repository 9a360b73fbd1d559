pub mod aggregate;
pub mod chat;
pub mod errors;
pub mod events;
pub mod ids;
pub mod poll;

pub use aggregate::{compute, AggregateResult, OptionTally};
pub use chat::{ChatMessage, Role, TEACHER_DISPLAY_NAME};
pub use errors::SessionError;
pub use events::{ClientEvent, ServerEvent, StudentInfo};
pub use ids::{ConnectionId, MessageId, PollId};
pub use poll::{Poll, PollStatus, Response};
