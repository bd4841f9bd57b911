use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Claims issued by the auth service. This API only verifies them;
/// registration, login and token refresh live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub token_type: Option<String>, // "access" or "refresh"
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

fn extract_bearer(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware: requires valid JWT. Sets AuthUser in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer(&req)
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;

    let claims = verify_token(&token, &state.config.jwt.secret)?;

    if claims.token_type.as_deref() == Some("refresh") {
        return Err(AppError::Unauthorized("Access token required".into()));
    }

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

    req.extensions_mut().insert(AuthUser {
        id: user_id,
        email: claims.email,
    });

    Ok(next.run(req).await)
}

/// Middleware: optionally sets AuthUser if token present but doesn't require it.
/// Checkout works for guests; a valid token attaches the donation to a donor.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = extract_bearer(&req) {
        if let Ok(claims) = verify_token(&token, &state.config.jwt.secret) {
            if claims.token_type.as_deref() != Some("refresh") {
                if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
                    req.extensions_mut().insert(AuthUser {
                        id: user_id,
                        email: claims.email,
                    });
                }
            }
        }
    }
    Ok(next.run(req).await)
}
