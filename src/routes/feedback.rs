/**
 * Feedback Routes
 * Bug reports and feature requests with attachments, admin triage, and a
 * threaded response list
 */
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    self,
    models::{Feedback, FeedbackAttachment, FeedbackReply},
};
use crate::routes::uploads::{self, StoredFile};
use crate::routes::{
    field_error, reject, require_admin, require_auth, validation_error, SuccessResponse,
};

const UPLOAD_DIR: &str = "feedback";
const MAX_ATTACHMENTS: usize = 5;

// ============================================================================
// Validation
// ============================================================================

const VALID_KINDS: &[&str] = &["bug", "feature", "improvement", "general"];
const VALID_STATUSES: &[&str] = &["pending", "in-progress", "resolved", "rejected"];
const VALID_PRIORITIES: &[&str] = &["low", "medium", "high", "critical"];
const RELATED_KINDS: &[&str] = &["blog", "project", "resource", "general"];

fn is_valid_kind(kind: &str) -> bool {
    VALID_KINDS.contains(&kind)
}

fn is_valid_status(status: &str) -> bool {
    VALID_STATUSES.contains(&status)
}

fn is_valid_priority(priority: &str) -> bool {
    VALID_PRIORITIES.contains(&priority)
}

/// Feedback can point at more than interactions can: a resource, or nothing
/// in particular ("general"), so it carries its own related shape rather
/// than a [`crate::db::targets::TargetRef`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackRelated {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<Uuid>,
}

fn parse_related(raw: Option<&str>) -> Option<FeedbackRelated> {
    let related: FeedbackRelated = serde_json::from_str(raw?).ok()?;
    if !RELATED_KINDS.contains(&related.kind.as_str()) {
        return None;
    }
    Some(related)
}

const FEEDBACK_COLUMNS: &str = "id, user_id, kind, title, description, status, priority, \
                                related_type, related_id, attachments, responses, is_public, \
                                created_at, updated_at";

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddResponseRequest {
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/feedback - The caller's feedback, newest first
pub async fn list_feedback(headers: HeaderMap) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Feedback>(&format!(
        "SELECT {} FROM feedback WHERE user_id = $1 ORDER BY created_at DESC",
        FEEDBACK_COLUMNS
    ))
    .bind(user.id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(feedback) => (StatusCode::OK, Json(feedback)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching feedback: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching feedback").into_response()
        }
    }
}

/// GET /api/feedback/admin - Every feedback item (admin only)
pub async fn list_all_feedback(headers: HeaderMap) -> impl IntoResponse {
    if let Err(err) = require_admin(&headers) {
        return err.into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Feedback>(&format!(
        "SELECT {} FROM feedback ORDER BY created_at DESC",
        FEEDBACK_COLUMNS
    ))
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(feedback) => (StatusCode::OK, Json(feedback)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching feedback: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching feedback").into_response()
        }
    }
}

/// GET /api/feedback/public - Feedback flagged public (no auth)
pub async fn list_public_feedback() -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Feedback>(&format!(
        "SELECT {} FROM feedback WHERE is_public = true ORDER BY created_at DESC",
        FEEDBACK_COLUMNS
    ))
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(feedback) => (StatusCode::OK, Json(feedback)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching public feedback: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching public feedback")
                .into_response()
        }
    }
}

/// POST /api/feedback - Create feedback (auth required, multipart with up
/// to five attachments)
pub async fn create_feedback(headers: HeaderMap, multipart: Multipart) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let form = match uploads::collect_multipart(multipart).await {
        Ok(f) => f,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
    };

    let mut fields = Vec::new();
    match form.text("type") {
        Some(kind) if is_valid_kind(kind) => {}
        Some(_) => fields.push(field_error(
            "type",
            "Type must be one of: bug, feature, improvement, general",
        )),
        None => fields.push(field_error("type", "Type is required")),
    }
    if form.text("title").is_none() {
        fields.push(field_error("title", "Title is required"));
    }
    if form.text("description").is_none() {
        fields.push(field_error("description", "Description is required"));
    }
    let related = parse_related(form.text("relatedTo"));
    if related.is_none() {
        fields.push(field_error(
            "relatedTo",
            "relatedTo must be a {type, id} object with a known type",
        ));
    }
    let priority = match form.text("priority") {
        Some(p) if is_valid_priority(p) => p.to_string(),
        Some(_) => {
            fields.push(field_error(
                "priority",
                "Priority must be one of: low, medium, high, critical",
            ));
            String::new()
        }
        None => "medium".to_string(),
    };
    let attachments: Vec<_> = form.files.iter().filter(|f| f.field == "attachments").collect();
    if attachments.len() > MAX_ATTACHMENTS {
        fields.push(field_error("attachments", "At most 5 attachments are allowed"));
    }
    if !fields.is_empty() {
        return validation_error(fields).into_response();
    }
    let related = related.unwrap();

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    // Store attachments; one rejection unwinds the ones already written
    let mut stored: Vec<StoredFile> = Vec::new();
    for file in &attachments {
        match uploads::store_document(UPLOAD_DIR, &file.filename, &file.bytes).await {
            Ok(s) => stored.push(s),
            Err(e) => {
                for s in &stored {
                    uploads::delete_by_url(&s.url).await;
                }
                return reject(StatusCode::BAD_REQUEST, &e.0).into_response();
            }
        }
    }

    let attachment_values: Vec<FeedbackAttachment> = stored
        .iter()
        .map(|s| FeedbackAttachment {
            url: s.url.clone(),
            kind: s.file_type.clone(),
            size: s.size as i64,
        })
        .collect();
    let attachments_json = serde_json::to_value(&attachment_values)
        .unwrap_or_else(|_| serde_json::Value::Array(vec![]));

    match sqlx::query_as::<_, Feedback>(&format!(
        r#"
        INSERT INTO feedback
            (user_id, kind, title, description, priority, related_type, related_id,
             attachments, is_public)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        FEEDBACK_COLUMNS
    ))
    .bind(user.id)
    .bind(form.text("type").unwrap_or_default())
    .bind(form.text("title").unwrap_or_default().trim())
    .bind(form.text("description").unwrap_or_default().trim())
    .bind(&priority)
    .bind(&related.kind)
    .bind(related.id)
    .bind(&attachments_json)
    .bind(matches!(form.text("isPublic"), Some("true") | Some("1")))
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(feedback) => (StatusCode::CREATED, Json(feedback)).into_response(),
        Err(e) => {
            for s in &stored {
                uploads::delete_by_url(&s.url).await;
            }
            tracing::error!("Database error creating feedback: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating feedback").into_response()
        }
    }
}

/// PUT /api/feedback/:id/status - Move feedback through triage (admin only)
pub async fn update_feedback_status(
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> impl IntoResponse {
    if let Err(err) = require_admin(&headers) {
        return err.into_response();
    }

    if !is_valid_status(&payload.status) {
        return validation_error(vec![field_error(
            "status",
            "Status must be one of: pending, in-progress, resolved, rejected",
        )])
        .into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Feedback>(&format!(
        "UPDATE feedback SET status = $1, updated_at = now() WHERE id = $2 RETURNING {}",
        FEEDBACK_COLUMNS
    ))
    .bind(&payload.status)
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(feedback)) => (StatusCode::OK, Json(feedback)).into_response(),
        Ok(None) => reject(StatusCode::NOT_FOUND, "Feedback not found").into_response(),
        Err(e) => {
            tracing::error!("Database error updating feedback status: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating feedback status")
                .into_response()
        }
    }
}

/// POST /api/feedback/:id/responses - Append a response to the thread
pub async fn add_feedback_response(
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddResponseRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    if payload.content.trim().is_empty() {
        return validation_error(vec![field_error("content", "Content is required")])
            .into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let reply = FeedbackReply {
        user_id: user.id,
        username: user.username.clone(),
        content: payload.content.trim().to_string(),
        is_admin: user.is_admin(),
        created_at: Utc::now(),
    };
    let reply_json = match serde_json::to_value(&reply) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to serialize feedback response: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error adding response")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Feedback>(&format!(
        "UPDATE feedback \
         SET responses = responses || jsonb_build_array($1::jsonb), updated_at = now() \
         WHERE id = $2 RETURNING {}",
        FEEDBACK_COLUMNS
    ))
    .bind(&reply_json)
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(feedback)) => (StatusCode::OK, Json(feedback)).into_response(),
        Ok(None) => reject(StatusCode::NOT_FOUND, "Feedback not found").into_response(),
        Err(e) => {
            tracing::error!("Database error adding feedback response: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error adding response").into_response()
        }
    }
}

/// DELETE /api/feedback/:id - Remove feedback and its attachments (owner or
/// admin)
pub async fn delete_feedback(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let deleted = if user.is_admin() {
        sqlx::query_as::<_, (serde_json::Value,)>(
            "DELETE FROM feedback WHERE id = $1 RETURNING attachments",
        )
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await
    } else {
        sqlx::query_as::<_, (serde_json::Value,)>(
            "DELETE FROM feedback WHERE id = $1 AND user_id = $2 RETURNING attachments",
        )
        .bind(id)
        .bind(user.id)
        .fetch_optional(pool.as_ref())
        .await
    };

    match deleted {
        Ok(Some((attachments,))) => {
            if let Ok(list) = serde_json::from_value::<Vec<FeedbackAttachment>>(attachments) {
                for attachment in &list {
                    uploads::delete_by_url(&attachment.url).await;
                }
            }
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(None) => reject(StatusCode::NOT_FOUND, "Feedback not found").into_response(),
        Err(e) => {
            tracing::error!("Database error deleting feedback: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error deleting feedback").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post, put};
    use axum::Router;
    use tower::ServiceExt;

    fn feedback_router() -> Router {
        Router::new()
            .route("/api/feedback", get(list_feedback).post(create_feedback))
            .route("/api/feedback/admin", get(list_all_feedback))
            .route("/api/feedback/public", get(list_public_feedback))
            .route("/api/feedback/{id}/status", put(update_feedback_status))
            .route("/api/feedback/{id}/responses", post(add_feedback_response))
            .route(
                "/api/feedback/{id}",
                axum::routing::delete(delete_feedback),
            )
    }

    fn bearer(role: &str) -> String {
        let token = create_access_token(
            &Uuid::new_v4().to_string(),
            "alice",
            "alice@x.com",
            role,
        )
        .unwrap();
        format!("Bearer {}", token)
    }

    #[test]
    fn test_enum_validation() {
        assert!(is_valid_kind("bug"));
        assert!(!is_valid_kind("rant"));
        assert!(is_valid_status("in-progress"));
        assert!(!is_valid_status("wontfix"));
        assert!(is_valid_priority("critical"));
        assert!(!is_valid_priority("urgent"));
    }

    #[test]
    fn test_parse_related_allows_general_without_id() {
        let related = parse_related(Some(r#"{"type":"general","id":null}"#)).unwrap();
        assert_eq!(related.kind, "general");
        assert!(related.id.is_none());
    }

    #[test]
    fn test_parse_related_rejects_unknown_kind() {
        assert!(parse_related(Some(r#"{"type":"user"}"#)).is_none());
    }

    #[tokio::test]
    async fn test_list_feedback_without_token_returns_unauthorized() {
        let req = Request::get("/api/feedback").body(Body::empty()).unwrap();
        let res = feedback_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_listing_forbidden_for_plain_user() {
        let req = Request::get("/api/feedback/admin")
            .header("authorization", bearer("user"))
            .body(Body::empty())
            .unwrap();
        let res = feedback_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_update_forbidden_for_plain_user() {
        let body = serde_json::to_vec(&UpdateStatusRequest {
            status: "resolved".to_string(),
        })
        .unwrap();
        let req = Request::put(format!("/api/feedback/{}/status", Uuid::new_v4()))
            .header("authorization", bearer("user"))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = feedback_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_update_rejects_unknown_status() {
        let body = serde_json::to_vec(&UpdateStatusRequest {
            status: "wontfix".to_string(),
        })
        .unwrap();
        let req = Request::put(format!("/api/feedback/{}/status", Uuid::new_v4()))
            .header("authorization", bearer("admin"))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = feedback_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_response_requires_content() {
        let body = serde_json::to_vec(&AddResponseRequest {
            content: "   ".to_string(),
        })
        .unwrap();
        let req = Request::post(format!("/api/feedback/{}/responses", Uuid::new_v4()))
            .header("authorization", bearer("user"))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = feedback_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
