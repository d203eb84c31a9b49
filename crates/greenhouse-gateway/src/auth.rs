//! Operator accounts: password login and HS256 bearer tokens guarding the
//! routes that change actuator state.

use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use greenhouse_common::{Error, Result, User};
use greenhouse_config::AuthConfig;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::SharedState;

const BAD_CREDENTIALS: &str = "Invalid username or password";

/// Claims carried by an access token. Inserted into request extensions by
/// [`require_bearer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and verifies access tokens with one shared secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("token secret must not be empty".into()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Config(format!("invalid token lifetime: {e}")))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        match config.jwt_secret.as_deref() {
            Some(secret) => Self::new(secret.as_bytes(), config.token_ttl()),
            None => {
                warn!("JWT_SECRET is not set; tokens are signed with a per-process secret");
                let secret = format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
                Self::new(secret.as_bytes(), config.token_ttl())
            }
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| Error::Internal("token expiry is out of range".into()))?;
        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            exp: expires.timestamp(),
            iat: now.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Unauthorized(format!("invalid token: {e}")))
    }
}

/// bcrypt `password` on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| Error::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| Error::Internal(format!("failed to hash password: {e}")))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| Error::Internal(format!("password check task failed: {e}")))?
        .map_err(|e| Error::Internal(format!("failed to check password: {e}")))
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject the request with 401 unless it carries a valid bearer token.
pub async fn require_bearer(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError(Error::Unauthorized("missing bearer token".into())))?;
    let claims = state.tokens.verify(token).map_err(|e| {
        warn!(error = %e, "rejected bearer token");
        ApiError(e)
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /api/login`: exchange credentials for `{"access_token": ..}`.
pub async fn login(
    State(state): State<SharedState>,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> std::result::Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("Invalid request"))?;

    let user = state.users.user_by_username(request.username.trim()).await?;
    let verified = match &user {
        Some(user) => verify_password(request.password, user.password_hash.clone()).await?,
        None => false,
    };
    let Some(user) = user.filter(|_| verified) else {
        warn!(username = %request.username, "login rejected");
        return Err(ApiError(Error::Unauthorized(BAD_CREDENTIALS.into())));
    };

    let token = state.tokens.issue(&user)?;
    info!(user_id = user.id, username = %user.username, "access token issued");
    Ok(Json(json!({ "access_token": token })))
}
