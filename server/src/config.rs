use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::auth::config::{AuthConfig, DEFAULT_ISSUER};
use crate::engine::chat_engine::{ChatSettings, DEFAULT_HISTORY_LIMIT};
use crate::engine::user_session::DEFAULT_OUTBOUND_QUEUE;
use crate::engine::validation::MAX_MESSAGE_LENGTH;

/// Top-level server configuration, loaded from campfire.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub chat: ChatSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Origin browsers load the client from. Localhost origins allow any CORS origin.
    pub public_url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:campfire.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub issuer: String,
    pub session_expiry_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            jwt_secret: auth.jwt_secret,
            issuer: DEFAULT_ISSUER.into(),
            session_expiry_hours: auth.session_expiry_hours,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub history_limit: i64,
    pub max_message_length: usize,
    /// Per-connection outbound queue depth before a client is considered too slow.
    pub outbound_queue: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_message_length: MAX_MESSAGE_LENGTH,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.clamp_limits();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    /// Unparseable numeric values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = var("JWT_ISSUER") {
            self.auth.issuer = v;
        }
        if let Some(v) = var("SESSION_EXPIRY_HOURS")
            && let Ok(hours) = v.parse()
        {
            self.auth.session_expiry_hours = hours;
        }
        if let Some(v) = var("HISTORY_LIMIT")
            && let Ok(limit) = v.parse()
        {
            self.chat.history_limit = limit;
        }
        if let Some(v) = var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.chat.max_message_length = len;
        }
        if let Some(v) = var("OUTBOUND_QUEUE")
            && let Ok(depth) = v.parse()
        {
            self.chat.outbound_queue = depth;
        }
    }

    /// Raise chat limits below 1 to 1.
    fn clamp_limits(&mut self) {
        if self.chat.history_limit < 1 {
            warn!(
                history_limit = self.chat.history_limit,
                "history_limit must be at least 1, using 1"
            );
            self.chat.history_limit = 1;
        }
        if self.chat.outbound_queue < 1 {
            warn!("outbound_queue must be at least 1, using 1");
            self.chat.outbound_queue = 1;
        }
    }

    /// Convert into an AuthConfig for the auth layer.
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            issuer: self.auth.issuer.clone(),
            session_expiry_hours: self.auth.session_expiry_hours,
        }
    }

    pub fn to_chat_settings(&self) -> ChatSettings {
        ChatSettings {
            history_limit: self.chat.history_limit,
            max_message_length: self.chat.max_message_length,
            outbound_queue: self.chat.outbound_queue,
        }
    }
}
