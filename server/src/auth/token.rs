use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::AuthConfig;

/// JWT claims carried by session tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,    // expiry (unix timestamp)
    pub iat: i64,    // issued at
    pub iss: String,
    /// Trust domain the identity belongs to. Empty means the issuer's own domain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
}

/// A successfully verified identity. Nothing partial is ever returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub trust_domain_id: String,
}

/// Why a credential was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong issuer")]
    WrongIssuer,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => TokenError::WrongIssuer,
            _ => TokenError::Malformed,
        }
    }
}

/// Create a signed session token for a user.
pub fn create_session_token(
    user_id: &str,
    domain: Option<&str>,
    config: &AuthConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(config.session_expiry_hours)).timestamp(),
        iat: now.timestamp(),
        iss: config.issuer.clone(),
        domain: domain.unwrap_or_default().to_string(),
    };
    encode_claims(&claims, &config.jwt_secret)
}

fn encode_claims(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a session token: signature, expiry and issuer.
pub fn verify_session_token(
    token: &str,
    config: &AuthConfig,
) -> Result<VerifiedIdentity, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_required_spec_claims(&["exp", "sub", "iss"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    if claims.sub.is_empty() {
        return Err(TokenError::Malformed);
    }

    let trust_domain_id = if claims.domain.is_empty() {
        claims.iss
    } else {
        claims.domain
    };

    Ok(VerifiedIdentity {
        user_id: claims.sub,
        trust_domain_id,
    })
}
