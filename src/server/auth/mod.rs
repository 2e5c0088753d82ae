//! Authentication module with JWT
//!
//! Tokens are tied to a row in `user_sessions`; logging out revokes the
//! session, so a token stops working before it expires.

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{LoginRequest, LoginResponse, RegisterRequest, User};
use crate::server::{AppState, db};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,        // user id
    pub sid: Uuid,       // session id
    pub exp: usize,      // expiration timestamp
}

#[derive(Debug, Serialize)]
pub struct AuthError {
    pub message: String,
}

type AuthRejection = (StatusCode, Json<AuthError>);

fn reject(status: StatusCode, message: &str) -> AuthRejection {
    (status, Json(AuthError { message: message.to_string() }))
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, DEFAULT_COST)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Create a JWT for a session
pub fn create_token(user_id: i64, session_id: Uuid, expires_at: DateTime<Utc>, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        sid: session_id,
        exp: expires_at.timestamp().max(0) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// JWT Auth extractor - extracts Claims from the Authorization header and
/// checks that the session behind them is still live
impl FromRequestParts<Arc<AppState>> for Claims {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        let claims = validate_token(bearer.token(), &state.jwt_secret)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid token"))?;

        let session = db::sessions::get(&state.db, claims.sid)
            .await
            .map_err(|e| {
                tracing::error!("Failed to load session {}: {}", claims.sid, e);
                reject(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
            })?;

        match session {
            Some(session) if session.user_id == claims.sub && session.is_active_at(Utc::now()) => Ok(claims),
            _ => Err(reject(StatusCode::UNAUTHORIZED, "Session expired or revoked")),
        }
    }
}

async fn issue_session(state: &AppState, user: &User) -> Result<LoginResponse, AuthRejection> {
    let expires_at = Utc::now() + chrono::Duration::hours(state.session_ttl_hours);
    let session = db::sessions::create(&state.db, user.id, expires_at)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create session for user {}: {}", user.id, e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;

    let token = create_token(user.id, session.id, session.expires_at, &state.jwt_secret)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Token generation error"))?;

    Ok(LoginResponse {
        token,
        expires_at: session.expires_at,
        user: user.to_info(),
    })
}

/// Login handler
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthRejection> {
    let user = db::users::get_by_email(&state.db, req.email.trim())
        .await
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Database error"))?
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Invalid credentials"))?;

    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Password verification error"))?;

    if !valid {
        return Err(reject(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }

    Ok(Json(issue_session(&state, &user).await?))
}

/// Register handler
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>, AuthRejection> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid email address"));
    }
    if req.password.len() < 8 {
        return Err(reject(StatusCode::BAD_REQUEST, "Password must be at least 8 characters"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|_| reject(StatusCode::INTERNAL_SERVER_ERROR, "Password hashing error"))?;

    let user = match db::users::create(&state.db, req.name.trim(), &email, &password_hash).await {
        Ok(user) => user,
        Err(e) if db::is_unique_violation(&e) => {
            return Err(reject(StatusCode::CONFLICT, "Email already registered"));
        }
        Err(e) => {
            tracing::error!("Failed to create user: {}", e);
            return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user"));
        }
    };

    Ok(Json(issue_session(&state, &user).await?))
}

/// Logout handler
pub async fn logout(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<StatusCode, AuthRejection> {
    db::sessions::revoke(&state.db, claims.sid)
        .await
        .map_err(|e| {
            tracing::error!("Failed to revoke session {}: {}", claims.sid, e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
    Ok(StatusCode::NO_CONTENT)
}
