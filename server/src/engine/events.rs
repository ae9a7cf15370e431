use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::models::{HistoryRow, MessageRow};

use super::presence::PresenceSnapshot;
use super::user_session::UserSession;

/// Unique identifier for a connected session (one per connection, not per user).
pub type SessionId = Uuid;

/// Frames a client may send. Anything that does not parse into one of these is
/// rejected at the transport edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Authenticate and enter a channel. Without a channel ID the default channel is used.
    Join {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
    },

    /// Move this connection to another channel.
    SwitchChannel { channel_id: String },

    /// Post a message to the current channel.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<String>,
    },

    /// The user is typing in the current channel.
    Typing,
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Recent messages of the channel just joined, oldest first. Also names the
    /// channel, which the client may not have chosen itself.
    History {
        channel_id: String,
        messages: Vec<ChatMessage>,
    },

    /// A persisted message, broadcast to everyone on the channel.
    Message(ChatMessage),

    /// Someone else on the channel is typing.
    Typing { user_id: String, username: String },

    /// Global presence, pushed to every connection on any membership change.
    Presence(PresenceSnapshot),

    /// A user entered the channel.
    UserJoined { user_id: String, username: String },

    /// A user left the channel (switched away or disconnected).
    UserLeft { user_id: String, username: String },

    Error { message: String },
}

/// A channel message as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar_color: String,
    pub role: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build the live broadcast form of a freshly stored message. Author attributes
    /// come from the sender's session snapshot.
    pub fn from_stored(row: MessageRow, author: &UserSession) -> Self {
        Self {
            created_at: parse_timestamp(&row.id, &row.created_at),
            id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            username: author.username.clone(),
            avatar_color: author.avatar_color.clone(),
            role: author.role.clone(),
            content: row.content,
            reply_to_id: row.reply_to_id,
        }
    }
}

impl From<HistoryRow> for ChatMessage {
    fn from(row: HistoryRow) -> Self {
        Self {
            created_at: parse_timestamp(&row.id, &row.created_at),
            id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            username: row.username,
            avatar_color: row.avatar_color,
            role: row.role,
            content: row.content,
            reply_to_id: row.reply_to_id,
        }
    }
}

fn parse_timestamp(message_id: &str, raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e| {
        warn!(%message_id, created_at = %raw, error = %e, "unparseable stored timestamp");
        Utc::now()
    })
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frames_parse_from_wire() {
        let join: ClientFrame =
            serde_json::from_value(json!({"type": "join", "token": "t", "channelId": "c1"}))
                .unwrap();
        assert_eq!(
            join,
            ClientFrame::Join {
                token: "t".into(),
                channel_id: Some("c1".into())
            }
        );

        let switch: ClientFrame =
            serde_json::from_value(json!({"type": "switch_channel", "channelId": "c2"})).unwrap();
        assert_eq!(
            switch,
            ClientFrame::SwitchChannel {
                channel_id: "c2".into()
            }
        );

        let message: ClientFrame =
            serde_json::from_value(json!({"type": "message", "content": "hi", "replyToId": "m1"}))
                .unwrap();
        assert_eq!(
            message,
            ClientFrame::Message {
                content: "hi".into(),
                reply_to_id: Some("m1".into())
            }
        );

        let typing: ClientFrame = serde_json::from_value(json!({"type": "typing"})).unwrap();
        assert_eq!(typing, ClientFrame::Typing);
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let join: ClientFrame =
            serde_json::from_value(json!({"type": "join", "token": "t"})).unwrap();
        assert!(matches!(join, ClientFrame::Join { channel_id: None, .. }));

        let message: ClientFrame =
            serde_json::from_value(json!({"type": "message", "content": "x"})).unwrap();
        assert!(matches!(
            message,
            ClientFrame::Message {
                reply_to_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        let result = serde_json::from_value::<ClientFrame>(json!({"type": "edit", "id": "m1"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_message_frame_wire_shape() {
        let frame = ServerFrame::Message(ChatMessage {
            id: "m1".into(),
            channel_id: "c1".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            avatar_color: "#fff".into(),
            role: "member".into(),
            content: "hello".into(),
            reply_to_id: None,
            created_at: "2026-01-02T03:04:05Z".parse().unwrap(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["channelId"], "c1");
        assert_eq!(value["avatarColor"], "#fff");
        assert!(value["replyToId"].is_null());
        assert!(value.get("reply_to_id").is_none());
    }

    #[test]
    fn test_history_row_timestamps() {
        let row = |created_at: &str| HistoryRow {
            id: "m1".into(),
            channel_id: "c1".into(),
            user_id: "u1".into(),
            username: "alice".into(),
            avatar_color: "#fff".into(),
            role: "member".into(),
            content: "hello".into(),
            reply_to_id: None,
            created_at: created_at.into(),
        };

        let stored = ChatMessage::from(row("2026-01-02T03:04:05.678Z"));
        assert_eq!(stored.created_at.to_rfc3339(), "2026-01-02T03:04:05.678+00:00");

        // A corrupt value still yields a message rather than dropping it.
        let before = Utc::now();
        let corrupt = ChatMessage::from(row("yesterday-ish"));
        assert_eq!(corrupt.id, "m1");
        assert!(corrupt.created_at >= before);
    }

    #[test]
    fn test_presence_and_notice_wire_shape() {
        let snapshot = PresenceSnapshot {
            online_count: 2,
            channel_users: [("c1".to_string(), vec!["alice".into(), "bob".into()])]
                .into_iter()
                .collect(),
        };
        let value = serde_json::to_value(ServerFrame::Presence(snapshot)).unwrap();
        assert_eq!(value["type"], "presence");
        assert_eq!(value["onlineCount"], 2);
        assert_eq!(value["channelUsers"]["c1"][1], "bob");

        let joined = serde_json::to_value(ServerFrame::UserJoined {
            user_id: "u1".into(),
            username: "alice".into(),
        })
        .unwrap();
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["userId"], "u1");

        let error = serde_json::to_value(ServerFrame::error("nope")).unwrap();
        assert_eq!(error, json!({"type": "error", "message": "nope"}));
    }
}
