// ABOUTME: Credential hashing, bearer tokens and the authenticated-user extractor
// ABOUTME: Argon2 PHC password hashes plus HS256 tokens carrying the owner id

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::response::ApiError;
use crate::AppState;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Missing or malformed authorization header")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Credential hashing failed: {0}")]
    Hash(String),
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hash(err.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|err| AuthError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub fn issue_token(user_id: &str, secret: &str, ttl: Duration) -> Result<String, AuthError> {
    let exp = Utc::now().timestamp() + ttl.as_secs() as i64;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| AuthError::Hash(err.to_string()))
}

/// Verify a bearer token and return the owner id it carries.
pub fn verify_token(token: &str, secret: &str) -> Result<String, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| AuthError::InvalidToken)
}

/// The authenticated caller, resolved from the `Authorization: Bearer`
/// header. Handlers take this as an argument; routes without it are public.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;

        let id = verify_token(token, &app.auth.token_secret)?;
        Ok(AuthUser { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2").unwrap());
        assert!(!verify_password(&hash, "hunter3").unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("hunter2").unwrap();
        let b = hash_password("hunter2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_is_an_error() {
        assert!(verify_password("not-a-phc-string", "pw").is_err());
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_token("alice", "secret", Duration::from_secs(3600)).unwrap();
        assert_eq!(verify_token(&token, "secret").unwrap(), "alice");
    }

    #[test]
    fn test_token_wrong_secret_rejected() {
        let token = issue_token("alice", "secret", Duration::from_secs(3600)).unwrap();
        assert!(matches!(
            verify_token(&token, "other").unwrap_err(),
            AuthError::InvalidToken
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // jsonwebtoken applies 60s leeway by default; go well past it.
        let claims = Claims {
            sub: "alice".to_string(),
            exp: Utc::now().timestamp() - 300,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_token("definitely.not.a.token", "secret").is_err());
    }
}
