/**
 * Learning Progress Routes
 * Personal notes, snippets, and completion markers against a blog post or
 * project, with an optional public feed per target
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    self,
    models::{LearningProgress, LearningProgressWithUser},
    targets::{TargetKind, TargetRef},
};
use crate::routes::{field_error, reject, require_auth, validation_error, SuccessResponse};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLearningRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target_type: String,
    pub target_id: Option<Uuid>,
    #[serde(default)]
    pub content: String,
    pub progress: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLearningRequest {
    pub content: Option<String>,
    pub progress: Option<i32>,
    pub tags: Option<Vec<String>>,
    pub is_public: Option<bool>,
}

// ============================================================================
// Validation
// ============================================================================

const VALID_KINDS: &[&str] = &["note", "snippet", "progress"];

fn is_valid_kind(kind: &str) -> bool {
    VALID_KINDS.contains(&kind)
}

fn is_valid_progress(value: i32) -> bool {
    (0..=100).contains(&value)
}

const LEARNING_COLUMNS: &str = "id, user_id, kind, target_type, target_id, content, progress, \
                                tags, is_public, created_at, updated_at";

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/learning-progress - The caller's entries, newest first
pub async fn list_entries(headers: HeaderMap) -> impl IntoResponse {
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

    match sqlx::query_as::<_, LearningProgress>(&format!(
        "SELECT {} FROM learning_progress WHERE user_id = $1 ORDER BY created_at DESC",
        LEARNING_COLUMNS
    ))
    .bind(user.id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching learning progress: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching learning progress")
                .into_response()
        }
    }
}

/// POST /api/learning-progress - Create an entry (auth required)
pub async fn create_entry(
    headers: HeaderMap,
    Json(payload): Json<CreateLearningRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let mut fields = Vec::new();
    if !is_valid_kind(&payload.kind) {
        fields.push(field_error(
            "type",
            "Type must be one of: note, snippet, progress",
        ));
    }
    let target = match payload.target_id {
        Some(id) => match TargetRef::parse(&payload.target_type, id) {
            Some(t) => Some(t),
            None => {
                fields.push(field_error(
                    "targetType",
                    "Target type must be 'blog' or 'project'",
                ));
                None
            }
        },
        None => {
            fields.push(field_error("targetId", "Target id is required"));
            None
        }
    };
    if payload.content.trim().is_empty() {
        fields.push(field_error("content", "Content is required"));
    }
    let progress = match (payload.kind.as_str(), payload.progress) {
        ("progress", Some(p)) if is_valid_progress(p) => Some(p),
        ("progress", Some(_)) => {
            fields.push(field_error("progress", "Progress must be between 0 and 100"));
            None
        }
        ("progress", None) => {
            fields.push(field_error("progress", "Progress is required for progress type"));
            None
        }
        _ => None,
    };
    if !fields.is_empty() {
        return validation_error(fields).into_response();
    }
    let target = target.unwrap();

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match target.exists(pool.as_ref()).await {
        Ok(true) => {}
        Ok(false) => return reject(StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => {
            tracing::error!("Database error resolving target: {}", e);
            return reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating learning progress",
            )
            .into_response();
        }
    }

    match sqlx::query_as::<_, LearningProgress>(&format!(
        r#"
        INSERT INTO learning_progress
            (user_id, kind, target_type, target_id, content, progress, tags, is_public)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        LEARNING_COLUMNS
    ))
    .bind(user.id)
    .bind(&payload.kind)
    .bind(target.kind.as_str())
    .bind(target.id)
    .bind(payload.content.trim())
    .bind(progress)
    .bind(&payload.tags)
    .bind(payload.is_public)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => {
            tracing::error!("Database error creating learning progress: {}", e);
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating learning progress",
            )
            .into_response()
        }
    }
}

/// PUT /api/learning-progress/:id - Update the caller's own entry
pub async fn update_entry(
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLearningRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    if let Some(p) = payload.progress {
        if !is_valid_progress(p) {
            return validation_error(vec![field_error(
                "progress",
                "Progress must be between 0 and 100",
            )])
            .into_response();
        }
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, LearningProgress>(&format!(
        r#"
        UPDATE learning_progress
        SET content = COALESCE($1, content),
            progress = COALESCE($2, progress),
            tags = COALESCE($3, tags),
            is_public = COALESCE($4, is_public),
            updated_at = now()
        WHERE id = $5 AND user_id = $6
        RETURNING {}
        "#,
        LEARNING_COLUMNS
    ))
    .bind(payload.content.map(|c| c.trim().to_string()))
    .bind(payload.progress)
    .bind(payload.tags)
    .bind(payload.is_public)
    .bind(id)
    .bind(user.id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(entry)) => (StatusCode::OK, Json(entry)).into_response(),
        Ok(None) => reject(StatusCode::NOT_FOUND, "Learning progress not found").into_response(),
        Err(e) => {
            tracing::error!("Database error updating learning progress: {}", e);
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error updating learning progress",
            )
            .into_response()
        }
    }
}

/// DELETE /api/learning-progress/:id - Remove the caller's own entry
pub async fn delete_entry(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
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

    match sqlx::query("DELETE FROM learning_progress WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(pool.as_ref())
        .await
    {
        Ok(result) if result.rows_affected() > 0 => {
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(_) => reject(StatusCode::NOT_FOUND, "Learning progress not found").into_response(),
        Err(e) => {
            tracing::error!("Database error deleting learning progress: {}", e);
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error deleting learning progress",
            )
            .into_response()
        }
    }
}

/// GET /api/learning-progress/public/:targetType/:targetId - Public entries
/// for a target
pub async fn list_public_entries(
    Path((target_type, target_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    if TargetKind::parse(&target_type).is_none() {
        return validation_error(vec![field_error(
            "targetType",
            "Target type must be 'blog' or 'project'",
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

    match sqlx::query_as::<_, LearningProgressWithUser>(
        r#"
        SELECT l.id, l.user_id, u.username, l.kind, l.target_type, l.target_id,
               l.content, l.progress, l.tags, l.is_public, l.created_at, l.updated_at
        FROM learning_progress l
        JOIN users u ON u.id = l.user_id
        WHERE l.target_type = $1 AND l.target_id = $2 AND l.is_public = true
        ORDER BY l.created_at DESC
        "#,
    )
    .bind(&target_type)
    .bind(target_id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching public learning progress: {}", e);
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching public learning progress",
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::auth::create_access_token;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn learning_router() -> Router {
        Router::new()
            .route(
                "/api/learning-progress",
                get(list_entries).post(create_entry),
            )
            .route(
                "/api/learning-progress/{id}",
                axum::routing::put(update_entry).delete(delete_entry),
            )
            .route(
                "/api/learning-progress/public/{target_type}/{target_id}",
                get(list_public_entries),
            )
    }

    fn bearer() -> String {
        let token = create_access_token(
            &Uuid::new_v4().to_string(),
            "alice",
            "alice@x.com",
            "user",
        )
        .unwrap();
        format!("Bearer {}", token)
    }

    #[test]
    fn test_kind_and_progress_validation() {
        assert!(is_valid_kind("note"));
        assert!(is_valid_kind("snippet"));
        assert!(!is_valid_kind("journal"));
        assert!(is_valid_progress(0));
        assert!(is_valid_progress(100));
        assert!(!is_valid_progress(-1));
        assert!(!is_valid_progress(101));
    }

    #[tokio::test]
    async fn test_list_entries_without_token_returns_unauthorized() {
        let req = Request::get("/api/learning-progress")
            .body(Body::empty())
            .unwrap();
        let res = learning_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_progress_entry_requires_progress_value() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "progress",
            "targetType": "blog",
            "targetId": Uuid::new_v4(),
            "content": "halfway through",
        }))
        .unwrap();
        let req = Request::post("/api/learning-progress")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = learning_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_note_ignores_progress_requirement() {
        // A note without a progress value passes validation; without a
        // database the handler then reports unavailable rather than 400.
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "note",
            "targetType": "blog",
            "targetId": Uuid::new_v4(),
            "content": "remember this",
        }))
        .unwrap();
        let req = Request::post("/api/learning-progress")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = learning_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_public_feed_rejects_unknown_target_type() {
        let req = Request::get(format!(
            "/api/learning-progress/public/resource/{}",
            Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();
        let res = learning_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
