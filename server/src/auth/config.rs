/// Default issuer claim for tokens minted and accepted by this server.
pub const DEFAULT_ISSUER: &str = "campfire";

/// Token verification settings shared by the WebSocket and HTTP layers.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Expected `iss` claim. Tokens from any other issuer are rejected.
    pub issuer: String,
    pub session_expiry_hours: i64,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: issuer.into(),
            session_expiry_hours: 720,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("campfire-dev-secret-change-me", DEFAULT_ISSUER)
    }
}
