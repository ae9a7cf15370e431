pub mod channel;
pub mod chat_engine;
pub mod error;
pub mod events;
pub mod presence;
pub mod user_session;
pub mod validation;
