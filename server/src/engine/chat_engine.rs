use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::auth::config::AuthConfig;
use crate::auth::token::verify_session_token;
use crate::db::queries::{channels, messages, users};

use super::channel::{ChannelInfo, pick_default};
use super::error::ChatError;
use super::events::{ChatMessage, ClientFrame, ServerFrame, SessionId};
use super::presence::{PresenceEntry, PresenceSnapshot, aggregate};
use super::user_session::{ConnectionHandle, DEFAULT_OUTBOUND_QUEUE, UserSession};
use super::validation::{self, MAX_MESSAGE_LENGTH};

/// Number of messages delivered after a join or channel switch.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Tunables for the chat engine.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_limit: i64,
    pub max_message_length: usize,
    /// Most frames held for one connection, in its outbound queue or its history
    /// backlog, before it is disconnected.
    pub outbound_queue: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_message_length: MAX_MESSAGE_LENGTH,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// A registered session and the channel it currently occupies.
struct SessionEntry {
    session: Arc<UserSession>,
    channel_id: String,
    /// Frames held back while this session's history is loading. `None` once the
    /// history has been delivered.
    backlog: Option<Vec<ServerFrame>>,
    backlog_limit: usize,
}

impl SessionEntry {
    fn deliver(&mut self, frame: ServerFrame) {
        if self.session.connection.is_closed() {
            return;
        }
        match &mut self.backlog {
            Some(backlog) if backlog.len() >= self.backlog_limit => {
                warn!(session_id = %self.session.id(), "backlog overflow, disconnecting");
                self.session.connection.close();
            }
            Some(backlog) => backlog.push(frame),
            None => {
                self.session.send(frame);
            }
        }
    }
}

/// Every live joined session. Guarded by a single lock in [`ChatEngine`].
#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
}

impl Registry {
    /// Deliver a frame to every session on a channel, optionally excluding one.
    fn broadcast(&mut self, channel_id: &str, frame: &ServerFrame, exclude: Option<SessionId>) {
        for (id, entry) in &mut self.sessions {
            if Some(*id) == exclude || entry.channel_id != channel_id {
                continue;
            }
            entry.deliver(frame.clone());
        }
    }

    fn presence(&self) -> PresenceSnapshot {
        aggregate(self.sessions.values().map(|entry| PresenceEntry {
            user_id: &entry.session.user_id,
            username: &entry.session.username,
            channel_id: &entry.channel_id,
        }))
    }

    /// Recompute presence and push it to every live connection.
    fn push_presence(&mut self) {
        let snapshot = self.presence();
        for entry in self.sessions.values_mut() {
            entry.deliver(ServerFrame::Presence(snapshot.clone()));
        }
    }

    fn connection_count(&self, user_id: &str) -> usize {
        self.sessions
            .values()
            .filter(|entry| entry.session.user_id == user_id)
            .count()
    }

    /// Send the history frame, then flush whatever was held back while it loaded.
    /// Messages already contained in the history are not sent twice.
    fn finish_history(&mut self, session_id: SessionId, messages: Vec<ChatMessage>) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };

        let seen: HashSet<String> = messages.iter().map(|m| m.id.clone()).collect();
        let backlog = entry.backlog.take().unwrap_or_default();

        entry.session.send(ServerFrame::History {
            channel_id: entry.channel_id.clone(),
            messages,
        });
        for frame in backlog {
            if let ServerFrame::Message(message) = &frame
                && seen.contains(&message.id)
            {
                continue;
            }
            entry.session.send(frame);
        }
    }
}

/// The central hub that manages all chat state: who is connected, which channel each
/// connection is on, and fan-out of frames between them.
pub struct ChatEngine {
    /// Joined sessions keyed by connection. Never held across an await point.
    registry: Mutex<Registry>,
    /// Channel metadata cache, keyed by channel ID. Misses fall back to the store.
    channels: DashMap<String, ChannelInfo>,
    /// Held from insert to broadcast so live order matches stored order.
    publish: tokio::sync::Mutex<()>,
    db: SqlitePool,
    auth: AuthConfig,
    settings: ChatSettings,
}

impl ChatEngine {
    pub fn new(db: SqlitePool, auth: AuthConfig, settings: ChatSettings) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            channels: DashMap::new(),
            publish: tokio::sync::Mutex::new(()),
            db,
            auth,
            settings,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Load channels from the database into memory on startup.
    pub async fn load_channels_from_db(&self) -> Result<usize, sqlx::Error> {
        let count = self.list_channels().await?.len();
        info!(count, "loaded channels from database");
        Ok(count)
    }

    /// All channels, grouped by category then name. Refreshes the cache.
    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, sqlx::Error> {
        let rows = channels::list_channels(&self.db).await?;
        let list: Vec<ChannelInfo> = rows.into_iter().map(ChannelInfo::from).collect();
        for channel in &list {
            self.channels.insert(channel.id.clone(), channel.clone());
        }
        Ok(list)
    }

    /// Look up a channel by ID, consulting the store on a cache miss.
    pub async fn resolve_channel(&self, channel_id: &str) -> Result<ChannelInfo, ChatError> {
        if let Some(channel) = self.channels.get(channel_id) {
            return Ok(channel.clone());
        }

        let row = channels::get_channel(&self.db, channel_id)
            .await?
            .ok_or_else(|| ChatError::ChannelNotFound(channel_id.to_string()))?;
        let channel = ChannelInfo::from(row);
        self.channels.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    /// The channel a join without a channel ID lands in.
    pub async fn default_channel(&self) -> Result<ChannelInfo, ChatError> {
        let list = self.list_channels().await?;
        pick_default(&list)
            .cloned()
            .ok_or_else(|| ChatError::ChannelNotFound("default".into()))
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Dispatch one inbound frame. Frames from a single connection must be handled
    /// one at a time, in order.
    pub async fn handle_frame(
        &self,
        connection: &ConnectionHandle,
        frame: ClientFrame,
    ) -> Result<(), ChatError> {
        match frame {
            ClientFrame::Join { token, channel_id } => {
                self.join(connection, &token, channel_id.as_deref()).await
            }
            ClientFrame::SwitchChannel { channel_id } => {
                self.switch_channel(connection.id, &channel_id).await
            }
            ClientFrame::Message {
                content,
                reply_to_id,
            } => self
                .send_message(connection.id, &content, reply_to_id.as_deref())
                .await
                .map(|_| ()),
            ClientFrame::Typing => {
                self.typing(connection.id);
                Ok(())
            }
        }
    }

    /// Authenticate a connection and place it on a channel.
    ///
    /// A connection that has already joined as the same user is moved to the
    /// requested channel instead.
    pub async fn join(
        &self,
        connection: &ConnectionHandle,
        token: &str,
        channel_id: Option<&str>,
    ) -> Result<(), ChatError> {
        let identity = verify_session_token(token, &self.auth)?;
        let session_id = connection.id;

        let existing = self
            .registry()
            .sessions
            .get(&session_id)
            .map(|entry| entry.session.user_id.clone());
        if let Some(existing_user) = existing {
            if existing_user != identity.user_id {
                return Err(ChatError::IdentityMismatch);
            }
            let target = match channel_id {
                Some(id) => id.to_string(),
                None => self.default_channel().await?.id,
            };
            return self.switch_channel(session_id, &target).await;
        }

        let user = users::get_user(&self.db, &identity.user_id)
            .await?
            .ok_or_else(|| ChatError::UnknownUser(identity.user_id.clone()))?;

        let channel = match channel_id {
            Some(id) => self.resolve_channel(id).await?,
            None => self.default_channel().await?,
        };

        let session = Arc::new(UserSession {
            connection: connection.clone(),
            user_id: user.id,
            username: user.username,
            avatar_color: user.avatar_color,
            role: user.role,
            trust_domain_id: identity.trust_domain_id,
            joined_at: Utc::now(),
        });

        {
            let mut registry = self.registry();
            registry.sessions.insert(
                session_id,
                SessionEntry {
                    session: Arc::clone(&session),
                    channel_id: channel.id.clone(),
                    backlog: Some(Vec::new()),
                    backlog_limit: self.settings.outbound_queue,
                },
            );
            registry.broadcast(
                &channel.id,
                &ServerFrame::UserJoined {
                    user_id: session.user_id.clone(),
                    username: session.username.clone(),
                },
                Some(session_id),
            );
            registry.push_presence();
        }

        if let Err(e) = users::set_online(&self.db, &session.user_id, true).await {
            warn!(error = %e, user_id = %session.user_id, "failed to mark user online");
        }

        self.deliver_history(session_id, &channel.id).await;

        info!(
            %session_id,
            user_id = %session.user_id,
            username = %session.username,
            channel_id = %channel.id,
            "session joined"
        );
        Ok(())
    }

    /// Move a joined connection to another channel. Switching to the current channel
    /// does nothing.
    pub async fn switch_channel(
        &self,
        session_id: SessionId,
        channel_id: &str,
    ) -> Result<(), ChatError> {
        let current = self.current_channel(session_id).ok_or(ChatError::NotJoined)?;
        if current == channel_id {
            debug!(%session_id, %channel_id, "already on channel");
            return Ok(());
        }

        let channel = self.resolve_channel(channel_id).await?;

        {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.get_mut(&session_id) else {
                return Err(ChatError::NotJoined);
            };
            let session = Arc::clone(&entry.session);
            let previous = std::mem::replace(&mut entry.channel_id, channel.id.clone());
            entry.backlog = Some(Vec::new());

            registry.broadcast(
                &previous,
                &ServerFrame::UserLeft {
                    user_id: session.user_id.clone(),
                    username: session.username.clone(),
                },
                Some(session_id),
            );
            registry.broadcast(
                &channel.id,
                &ServerFrame::UserJoined {
                    user_id: session.user_id.clone(),
                    username: session.username.clone(),
                },
                Some(session_id),
            );
            registry.push_presence();
        }

        self.deliver_history(session_id, &channel.id).await;

        info!(%session_id, from = %current, to = %channel.id, "switched channel");
        Ok(())
    }

    /// Validate, persist and broadcast a message to the sender's current channel.
    ///
    /// Returns `Ok(None)` when the connection has not joined yet.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        content: &str,
        reply_to_id: Option<&str>,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let joined = self
            .registry()
            .sessions
            .get(&session_id)
            .map(|entry| (Arc::clone(&entry.session), entry.channel_id.clone()));
        let Some((session, channel_id)) = joined else {
            debug!(%session_id, "message before join ignored");
            return Ok(None);
        };

        let content = validation::validate_message(content, self.settings.max_message_length)
            .map_err(ChatError::Validation)?;

        let reply_to_id = reply_to_id.filter(|id| !id.is_empty());
        if let Some(parent_id) = reply_to_id {
            let parent = messages::get_message(&self.db, parent_id).await?;
            if parent.is_none_or(|p| p.channel_id != channel_id) {
                return Err(ChatError::Validation(
                    "Replied-to message not found in this channel".into(),
                ));
            }
        }

        let publish = self.publish.lock().await;
        let row = messages::insert_message(
            &self.db,
            &channel_id,
            &session.user_id,
            content,
            reply_to_id,
        )
        .await?;
        let message = ChatMessage::from_stored(row, &session);

        self.registry()
            .broadcast(&channel_id, &ServerFrame::Message(message.clone()), None);
        drop(publish);

        debug!(%session_id, %channel_id, message_id = %message.id, "message sent");
        Ok(Some(message))
    }

    /// Tell everyone else on the sender's channel that they are typing.
    pub fn typing(&self, session_id: SessionId) {
        let mut registry = self.registry();
        let Some(entry) = registry.sessions.get(&session_id) else {
            debug!(%session_id, "typing before join ignored");
            return;
        };
        let channel_id = entry.channel_id.clone();
        let frame = ServerFrame::Typing {
            user_id: entry.session.user_id.clone(),
            username: entry.session.username.clone(),
        };
        registry.broadcast(&channel_id, &frame, Some(session_id));
    }

    /// Remove a connection. The user goes offline once their last connection is gone.
    pub async fn disconnect(&self, session_id: SessionId) {
        let removed = {
            let mut registry = self.registry();
            let Some(entry) = registry.sessions.remove(&session_id) else {
                return;
            };
            registry.broadcast(
                &entry.channel_id,
                &ServerFrame::UserLeft {
                    user_id: entry.session.user_id.clone(),
                    username: entry.session.username.clone(),
                },
                None,
            );
            registry.push_presence();
            let remaining = registry.connection_count(&entry.session.user_id);
            (entry, remaining)
        };
        let (entry, remaining) = removed;
        entry.session.connection.close();
        let user_id = &entry.session.user_id;

        if remaining == 0 {
            if let Err(e) = users::set_online(&self.db, user_id, false).await {
                warn!(error = %e, %user_id, "failed to mark user offline");
            }
            // A new connection may have registered while the flag was being cleared.
            let reconnected = self.registry().connection_count(user_id) > 0;
            if reconnected && let Err(e) = users::set_online(&self.db, user_id, true).await {
                warn!(error = %e, %user_id, "failed to restore online flag");
            }
        }

        info!(
            %session_id,
            %user_id,
            channel_id = %entry.channel_id,
            remaining,
            "session disconnected"
        );
    }

    // ── History ─────────────────────────────────────────────────────

    /// The most recent messages of a channel, oldest first.
    pub async fn fetch_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let rows =
            messages::recent_messages(&self.db, channel_id, self.settings.history_limit).await?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    /// Load and send history to one session, then release its backlog. A failed
    /// load still releases the session with an empty history, followed by an error.
    async fn deliver_history(&self, session_id: SessionId, channel_id: &str) {
        match self.fetch_history(channel_id).await {
            Ok(messages) => self.registry().finish_history(session_id, messages),
            Err(e) => {
                error!(error = %e, %session_id, %channel_id, "failed to load history");
                let mut registry = self.registry();
                registry.finish_history(session_id, Vec::new());
                if let Some(entry) = registry.sessions.get(&session_id) {
                    entry.session.send(ServerFrame::error(e.client_message()));
                }
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current presence, computed from the live registry.
    pub fn presence(&self) -> PresenceSnapshot {
        self.registry().presence()
    }

    pub fn current_channel(&self, session_id: SessionId) -> Option<String> {
        self.registry()
            .sessions
            .get(&session_id)
            .map(|entry| entry.channel_id.clone())
    }

    pub fn session(&self, session_id: SessionId) -> Option<Arc<UserSession>> {
        self.registry()
            .sessions
            .get(&session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Number of live joined connections for a user.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.registry().connection_count(user_id)
    }

    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn auth_config(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }
}
