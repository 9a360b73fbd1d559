pub mod chat_relay;
pub mod client;
pub mod coordinator;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod timer;

pub use server::{start, ServerConfig, ServerHandle};
