/**
 * Routes Module
 * API route handlers plus the response/guard types they share
 */

pub mod auth;
pub mod blog;
pub mod contact;
pub mod feedback;
pub mod health;
pub mod interactions;
pub mod learning;
pub mod projects;
pub mod resources;
pub mod uploads;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::auth::{verify_access_token, Claims};

/// Error response shared by every route module
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Success response (for delete and other bodyless outcomes)
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// One offending field in a validation failure
#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// 400 body enumerating every offending field
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub fields: Vec<FieldError>,
}

pub type Reject = (StatusCode, Json<ErrorResponse>);

pub fn reject(status: StatusCode, error: &str) -> Reject {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: None,
        }),
    )
}

pub fn validation_error(fields: Vec<FieldError>) -> (StatusCode, Json<ValidationErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ValidationErrorResponse {
            error: "Validation error".to_string(),
            fields,
        }),
    )
}

pub fn field_error(field: &str, message: &str) -> FieldError {
    FieldError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// The authenticated caller, as carried in the token claims.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn claims_to_user(claims: Claims) -> Result<AuthUser, Reject> {
    let id = claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;
    Ok(AuthUser {
        id,
        username: claims.username,
        email: claims.email,
        role: claims.role,
    })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Extract and verify the bearer token, rejecting with 401 when it is
/// missing, malformed, or expired.
pub fn require_auth(headers: &HeaderMap) -> Result<AuthUser, Reject> {
    match bearer_token(headers) {
        Some(token) => match verify_access_token(token) {
            Ok(claims) => claims_to_user(claims),
            Err(_) => Err(reject(StatusCode::UNAUTHORIZED, "Invalid or expired token")),
        },
        None => Err(reject(StatusCode::UNAUTHORIZED, "Authorization required")),
    }
}

/// Like [`require_auth`] but additionally rejects non-admins with 403.
pub fn require_admin(headers: &HeaderMap) -> Result<AuthUser, Reject> {
    let user = require_auth(headers)?;
    if !user.is_admin() {
        return Err(reject(StatusCode::FORBIDDEN, "Not authorized"));
    }
    Ok(user)
}

/// Best-effort caller identity for endpoints that are public but behave
/// differently for authenticated users. A bad token reads as anonymous.
pub fn optional_auth(headers: &HeaderMap) -> Option<AuthUser> {
    bearer_token(headers)
        .and_then(|token| verify_access_token(token).ok())
        .and_then(|claims| claims_to_user(claims).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_auth_without_header_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = require_auth(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_require_auth_with_garbage_token_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer not.a.jwt".parse().unwrap());
        let err = require_auth(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_optional_auth_treats_bad_token_as_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer not.a.jwt".parse().unwrap());
        assert!(optional_auth(&headers).is_none());
    }

    #[test]
    fn test_require_admin_rejects_plain_user() {
        let token = auth::create_access_token(
            &Uuid::new_v4().to_string(),
            "vis",
            "vis@example.com",
            "user",
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        assert!(require_auth(&headers).is_ok());
        let err = require_admin(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }
}
