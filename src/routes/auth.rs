/**
 * Authentication Routes
 * JWT-based authentication: register, login, and token verification
 */
use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, models::PublicUser, models::User};
use crate::routes::{field_error, reject, validation_error};

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    /// JWT secret key from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "default-jwt-secret-change-in-production".to_string());

    /// Allow-list of emails that always hold the admin role. Comma-separated
    /// ADMIN_EMAILS, with ADMIN_EMAIL accepted as a single-entry fallback.
    pub static ref ADMIN_EMAILS: Vec<String> = {
        let raw = std::env::var("ADMIN_EMAILS")
            .or_else(|_| std::env::var("ADMIN_EMAIL"))
            .unwrap_or_default();
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    };

    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// Access token validity
const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 24;

const MIN_PASSWORD_LEN: usize = 6;

// ============================================================================
// Role policy
// ============================================================================

/// The single place the admin allow-list is consulted. Applied when a user
/// is created and re-asserted on every login.
pub fn role_for_email(email: &str) -> &'static str {
    role_for_email_in(email, &ADMIN_EMAILS)
}

fn role_for_email_in(email: &str, allow_list: &[String]) -> &'static str {
    if allow_list.iter().any(|a| a == &email.to_lowercase()) {
        "admin"
    } else {
        "user"
    }
}

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,      // User ID
    pub username: String, // Username
    pub email: String,    // User email
    pub role: String,     // User role
    pub exp: i64,         // Expiry timestamp
    pub iat: i64,         // Issued at timestamp
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: PublicUser,
}

// ============================================================================
// Token helpers
// ============================================================================

/// Create a signed access token bound to the user
pub fn create_access_token(
    user_id: &str,
    username: &str,
    email: &str,
    role: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode an access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn token_for(user: &User) -> Result<String, jsonwebtoken::errors::Error> {
    create_access_token(&user.id.to_string(), &user.username, &user.email, &user.role)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
pub async fn register(Json(payload): Json<RegisterRequest>) -> impl IntoResponse {
    let mut fields = Vec::new();
    if payload.username.trim().is_empty() {
        fields.push(field_error("username", "Username is required"));
    }
    if payload.email.trim().is_empty() {
        fields.push(field_error("email", "Email is required"));
    } else if !EMAIL_REGEX.is_match(&payload.email) {
        fields.push(field_error("email", "Invalid email format"));
    }
    if payload.password.is_empty() {
        fields.push(field_error("password", "Password is required"));
    } else if payload.password.len() < MIN_PASSWORD_LEN {
        fields.push(field_error(
            "password",
            "Password must be at least 6 characters long",
        ));
    }
    if !fields.is_empty() {
        return validation_error(fields).into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    // Report which field collides, the way the frontend expects
    let existing: Result<Option<(String, String)>, sqlx::Error> = sqlx::query_as(
        "SELECT username, email FROM users WHERE email = $1 OR username = $2",
    )
    .bind(&email)
    .bind(&username)
    .fetch_optional(pool.as_ref())
    .await;

    match existing {
        Ok(Some((_, existing_email))) => {
            let field = if existing_email == email { "email" } else { "username" };
            return validation_error(vec![field_error(field, "User already exists")])
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Database error checking existing user: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating user")
                .into_response();
        }
    }

    // bcrypt is CPU-bound; keep the async executor free
    let password = payload.password;
    let password_hash = match tokio::task::spawn_blocking(move || hash(&password, DEFAULT_COST))
        .await
    {
        Ok(Ok(h)) => h,
        Ok(Err(e)) => {
            tracing::error!("Failed to hash password: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating user")
                .into_response();
        }
        Err(e) => {
            tracing::error!("spawn_blocking panic during hash: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating user")
                .into_response();
        }
    };

    let role = role_for_email(&email);

    match sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        RETURNING id, username, email, password_hash, role, created_at, updated_at
        "#,
    )
    .bind(&username)
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(user) => {
            let token = match token_for(&user) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to create access token: {}", e);
                    return reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
                        .into_response();
                }
            };
            tracing::info!("User registered: {}", user.email);
            (
                StatusCode::CREATED,
                Json(AuthResponse {
                    message: "User created successfully".to_string(),
                    token,
                    user: user.into(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            // Unique-index loser of a concurrent duplicate registration
            if e.to_string().contains("unique") || e.to_string().contains("duplicate key") {
                return validation_error(vec![field_error("email", "User already exists")])
                    .into_response();
            }
            tracing::error!("Failed to create user: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating user").into_response()
        }
    }
}

/// POST /api/auth/login
pub async fn login(Json(payload): Json<LoginRequest>) -> impl IntoResponse {
    let mut fields = Vec::new();
    if payload.email.trim().is_empty() {
        fields.push(field_error("email", "Email is required"));
    }
    if payload.password.is_empty() {
        fields.push(field_error("password", "Password is required"));
    }
    if !fields.is_empty() {
        return validation_error(fields).into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let email = payload.email.trim().to_lowercase();

    let user = match sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at \
         FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            // Same message as a password mismatch so the response shape
            // never reveals which field was wrong
            tracing::warn!("Login attempt for unknown email");
            return reject(StatusCode::UNAUTHORIZED, "Invalid credentials").into_response();
        }
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error logging in").into_response();
        }
    };

    let password = payload.password;
    let stored_hash = user.password_hash.clone();
    let password_ok =
        tokio::task::spawn_blocking(move || verify(&password, &stored_hash).unwrap_or(false))
            .await
            .unwrap_or(false);
    if !password_ok {
        tracing::warn!("Failed login attempt for: {}", user.email);
        return reject(StatusCode::UNAUTHORIZED, "Invalid credentials").into_response();
    }

    // Re-assert the allow-list invariant; persists an upgrade for accounts
    // created before the email was added to the list
    let mut user = user;
    let expected_role = role_for_email(&user.email);
    if expected_role == "admin" && user.role != "admin" {
        match sqlx::query("UPDATE users SET role = 'admin', updated_at = now() WHERE id = $1")
            .bind(user.id)
            .execute(pool.as_ref())
            .await
        {
            Ok(_) => user.role = "admin".to_string(),
            Err(e) => {
                tracing::error!("Failed to promote allow-listed user: {}", e);
            }
        }
    }

    let token = match token_for(&user) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to create access token: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
                .into_response();
        }
    };

    tracing::info!("Successful login for user: {}", user.email);

    (
        StatusCode::OK,
        Json(AuthResponse {
            message: "Login successful".to_string(),
            token,
            user: user.into(),
        }),
    )
        .into_response()
}

/// GET /api/auth/verify
/// Validates the bearer token and confirms the user still exists.
pub async fn verify_token(headers: HeaderMap) -> impl IntoResponse {
    let token = match crate::routes::bearer_token(&headers) {
        Some(t) => t.to_string(),
        None => {
            return reject(StatusCode::UNAUTHORIZED, "No token provided").into_response();
        }
    };

    let claims = match verify_access_token(&token) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            return reject(StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    let user_id = match claims.sub.parse::<Uuid>() {
        Ok(id) => id,
        Err(_) => {
            return reject(StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, role, created_at, updated_at \
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(AuthResponse {
                message: "Token is valid".to_string(),
                token,
                user: user.into(),
            }),
        )
            .into_response(),
        Ok(None) => reject(StatusCode::UNAUTHORIZED, "User not found").into_response(),
        Err(e) => {
            tracing::error!("Database error verifying token: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error verifying token").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn auth_router() -> Router {
        Router::new()
            .route("/api/auth/register", post(register))
            .route("/api/auth/login", post(login))
            .route("/api/auth/verify", get(verify_token))
    }

    async fn post_json(
        app: Router,
        uri: &str,
        json: &impl serde::Serialize,
    ) -> (StatusCode, axum::body::Bytes) {
        let body = Body::from(serde_json::to_vec(json).unwrap());
        let req = Request::post(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    #[test]
    fn test_role_policy_matches_allow_list_case_insensitively() {
        let allow = vec!["owner@example.com".to_string()];
        assert_eq!(role_for_email_in("owner@example.com", &allow), "admin");
        assert_eq!(role_for_email_in("Owner@Example.COM", &allow), "admin");
        assert_eq!(role_for_email_in("visitor@example.com", &allow), "user");
    }

    #[test]
    fn test_role_policy_empty_allow_list_never_admins() {
        assert_eq!(role_for_email_in("anyone@example.com", &[]), "user");
    }

    #[test]
    fn test_access_token_round_trip_preserves_claims() {
        let token = create_access_token("some-id", "alice", "alice@x.com", "user").unwrap();
        let claims = verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, "some-id");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email, "alice@x.com");
        assert_eq!(claims.role, "user");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_access_token_invalid_returns_err() {
        let result = verify_access_token("invalid.jwt.token");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_register_missing_fields_lists_each_one() {
        let (status, bytes) = post_json(
            auth_router(),
            "/api/auth/register",
            &serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: crate::routes::ValidationErrorResponse =
            serde_json::from_slice(&bytes).unwrap();
        let fields: Vec<_> = body.fields.iter().map(|f| f.field.as_str()).collect();
        assert!(fields.contains(&"username"));
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password"));
    }

    #[tokio::test]
    async fn test_register_invalid_email_returns_bad_request() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/register",
            &RegisterRequest {
                username: "alice".to_string(),
                email: "no-at-sign".to_string(),
                password: "secret1".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_short_password_returns_bad_request() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/register",
            &RegisterRequest {
                username: "alice".to_string(),
                email: "alice@x.com".to_string(),
                password: "short".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_empty_body_returns_bad_request() {
        let (status, _) = post_json(auth_router(), "/api/auth/login", &serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_verify_without_token_returns_unauthorized() {
        let req = Request::get("/api/auth/verify").body(Body::empty()).unwrap();
        let res = auth_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_verify_with_garbage_token_returns_unauthorized() {
        let req = Request::get("/api/auth/verify")
            .header("authorization", "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let res = auth_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
