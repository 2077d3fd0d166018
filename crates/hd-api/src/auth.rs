//! Caller authentication
//!
//! The send and preference surfaces take a caller JWT (HS256); operational
//! endpoints take the cron shared secret. Authorization resolution proper
//! (roles, tenancy) happens upstream; this layer only establishes identity.

use axum::http::HeaderMap;
use hd_common::HeraldError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Authenticate a caller JWT. The subject claim is the user id.
pub fn authenticate(headers: &HeaderMap, jwt_secret: &str) -> Result<Caller, HeraldError> {
    let token = bearer_token(headers).ok_or(HeraldError::Unauthenticated)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| HeraldError::Unauthenticated)?;

    let user_id = data
        .claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| HeraldError::Unauthenticated)?;

    Ok(Caller {
        user_id,
        role: data.claims.role.unwrap_or_else(|| "user".to_string()),
    })
}

/// Constant-time byte comparison for shared secrets.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authenticate a cron/operational request via the shared secret, carried
/// either as a bearer token or in X-Cron-Secret.
pub fn authenticate_service(headers: &HeaderMap, cron_secret: &str) -> Result<(), HeraldError> {
    let presented = bearer_token(headers).or_else(|| {
        headers
            .get("X-Cron-Secret")
            .and_then(|v| v.to_str().ok())
    });
    match presented {
        Some(secret) if constant_time_eq(secret.as_bytes(), cron_secret.as_bytes()) => Ok(()),
        Some(_) => Err(HeraldError::Forbidden),
        None => Err(HeraldError::Unauthenticated),
    }
}
