/**
 * Contact Routes
 * Contact-form submissions forwarded to the site owner over SMTP
 */
use axum::{http::StatusCode, response::IntoResponse, Json};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::routes::{field_error, reject, validation_error};

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    static ref SMTP_HOST: String = std::env::var("SMTP_HOST")
        .unwrap_or_else(|_| "smtp.gmail.com".to_string());
    static ref SMTP_USERNAME: String = std::env::var("SMTP_USERNAME").unwrap_or_default();
    static ref SMTP_PASSWORD: String = std::env::var("SMTP_PASSWORD").unwrap_or_default();
    /// Where submissions land; falls back to the SMTP account itself
    static ref CONTACT_RECIPIENT: String = std::env::var("CONTACT_RECIPIENT")
        .unwrap_or_else(|_| SMTP_USERNAME.clone());

    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContactResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/contact - Validate and forward a contact-form submission
pub async fn submit_contact(Json(payload): Json<ContactRequest>) -> impl IntoResponse {
    let mut fields = Vec::new();
    if payload.name.trim().is_empty() {
        fields.push(field_error("name", "Name is required"));
    }
    if payload.email.trim().is_empty() {
        fields.push(field_error("email", "Email is required"));
    } else if !EMAIL_REGEX.is_match(payload.email.trim()) {
        fields.push(field_error("email", "Invalid email format"));
    }
    if payload.message.trim().is_empty() {
        fields.push(field_error("message", "Message is required"));
    }
    if !fields.is_empty() {
        return validation_error(fields).into_response();
    }

    if SMTP_USERNAME.is_empty() || SMTP_PASSWORD.is_empty() {
        tracing::error!("Contact form submitted but SMTP credentials are not configured");
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message")
            .into_response();
    }

    let name = payload.name.trim();
    let body = format!(
        "New contact form submission\n\nName: {}\nEmail: {}\n\nMessage:\n{}\n",
        name,
        payload.email.trim(),
        payload.message.trim()
    );

    let email = Message::builder()
        .from(match format!("Portfolio Contact <{}>", SMTP_USERNAME.as_str()).parse() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Invalid SMTP sender address: {}", e);
                return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message")
                    .into_response();
            }
        })
        .reply_to(match payload.email.trim().parse() {
            Ok(m) => m,
            Err(_) => {
                return validation_error(vec![field_error("email", "Invalid email format")])
                    .into_response();
            }
        })
        .to(match CONTACT_RECIPIENT.parse() {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Invalid contact recipient address: {}", e);
                return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message")
                    .into_response();
            }
        })
        .subject(format!("Portfolio Contact Form: {}", name))
        .header(ContentType::TEXT_PLAIN)
        .body(body);

    let email = match email {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to build contact email: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message")
                .into_response();
        }
    };

    let mailer = match AsyncSmtpTransport::<Tokio1Executor>::relay(&SMTP_HOST) {
        Ok(builder) => builder
            .credentials(Credentials::new(
                SMTP_USERNAME.clone(),
                SMTP_PASSWORD.clone(),
            ))
            .build(),
        Err(e) => {
            tracing::error!("Failed to build SMTP transport: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message")
                .into_response();
        }
    };

    match mailer.send(email).await {
        Ok(_) => {
            tracing::info!("Contact form submission forwarded");
            (
                StatusCode::OK,
                Json(ContactResponse {
                    message: "Message sent successfully".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            // SMTP detail stays in the log; clients get a generic failure
            tracing::error!("Failed to send contact email: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error sending message").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn contact_router() -> Router {
        Router::new().route("/api/contact", post(submit_contact))
    }

    async fn submit(json: serde_json::Value) -> StatusCode {
        let req = Request::post("/api/contact")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap();
        contact_router().oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_missing_fields_return_bad_request() {
        assert_eq!(submit(serde_json::json!({})).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            submit(serde_json::json!({"name": "Ada", "email": "ada@x.com"})).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_malformed_email_returns_bad_request() {
        let status = submit(serde_json::json!({
            "name": "Ada",
            "email": "not-an-email",
            "message": "hello"
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
