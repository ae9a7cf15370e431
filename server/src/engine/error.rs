use thiserror::Error;

use crate::auth::token::TokenError;

/// Everything a chat operation can fail with.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("connection already joined as a different user")]
    IdentityMismatch,

    #[error("no such channel: {0}")]
    ChannelNotFound(String),

    #[error("not joined to a channel")]
    NotJoined,

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl ChatError {
    /// Terminal errors end the connection after the error frame is sent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatError::Auth(_) | ChatError::UnknownUser(_))
    }

    /// The generic text shown to the client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Auth(_) | ChatError::UnknownUser(_) => "Authentication failed".into(),
            ChatError::IdentityMismatch => "Already joined as a different user".into(),
            ChatError::ChannelNotFound(_) => "Channel not found".into(),
            ChatError::NotJoined => "Join a channel first".into(),
            ChatError::Validation(reason) => reason.clone(),
            ChatError::Persistence(_) => "Something went wrong, please try again".into(),
        }
    }
}
