pub mod chat;
pub mod database;
pub mod error;
pub mod polls;
pub mod row_helpers;
pub mod schema;

pub use chat::ChatRepo;
pub use database::Database;
pub use error::StoreError;
pub use polls::PollRepo;
