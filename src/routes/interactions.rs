/**
 * Interaction Routes
 * Per-user reactions (like, bookmark, rating, comment) against a blog post
 * or project, plus the per-target aggregate view
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
    models::{InteractionWithUser, UserInteraction},
    targets::{TargetKind, TargetRef},
};
use crate::routes::{field_error, reject, require_auth, validation_error, SuccessResponse};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for POST /api/interactions
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInteractionRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target_type: String,
    pub target_id: Option<Uuid>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

/// Request body for PUT /api/interactions/toggle
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub target_type: String,
    pub target_id: Option<Uuid>,
    pub on: bool,
}

/// Response for PUT /api/interactions/toggle
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub on: bool,
}

/// Aggregates for one target, computed from its interaction list
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSummary {
    pub like_count: i64,
    pub bookmark_count: i64,
    pub comment_count: i64,
    pub rating_count: i64,
    pub average_rating: f64,
}

/// Response for GET /api/interactions/target/:type/:id
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInteractionsResponse {
    pub interactions: Vec<InteractionWithUser>,
    pub summary: InteractionSummary,
}

// ============================================================================
// Validation
// ============================================================================

const VALID_KINDS: &[&str] = &["like", "bookmark", "rating", "comment"];
const TOGGLE_KINDS: &[&str] = &["like", "bookmark"];

fn is_valid_kind(kind: &str) -> bool {
    VALID_KINDS.contains(&kind)
}

/// Average over rating-type rows; defined as 0.0 when none exist.
pub fn compute_summary(interactions: &[InteractionWithUser]) -> InteractionSummary {
    let count_of = |kind: &str| interactions.iter().filter(|i| i.kind == kind).count() as i64;

    let ratings: Vec<i32> = interactions
        .iter()
        .filter(|i| i.kind == "rating")
        .filter_map(|i| i.rating)
        .collect();
    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64
    };

    InteractionSummary {
        like_count: count_of("like"),
        bookmark_count: count_of("bookmark"),
        comment_count: count_of("comment"),
        rating_count: ratings.len() as i64,
        average_rating,
    }
}

const INTERACTION_COLUMNS: &str =
    "id, user_id, kind, target_type, target_id, rating, comment, created_at, updated_at";

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/interactions - Every interaction owned by the caller
pub async fn list_interactions(headers: HeaderMap) -> impl IntoResponse {
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

    match sqlx::query_as::<_, UserInteraction>(&format!(
        "SELECT {} FROM user_interactions WHERE user_id = $1 ORDER BY created_at DESC",
        INTERACTION_COLUMNS
    ))
    .bind(user.id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(interactions) => (StatusCode::OK, Json(interactions)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching interactions: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching interactions")
                .into_response()
        }
    }
}

/// GET /api/interactions/target/:type/:id - All interactions against a
/// target plus computed aggregates (public)
pub async fn target_interactions(
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

    match sqlx::query_as::<_, InteractionWithUser>(
        r#"
        SELECT i.id, i.user_id, u.username, i.kind, i.target_type, i.target_id,
               i.rating, i.comment, i.created_at, i.updated_at
        FROM user_interactions i
        JOIN users u ON u.id = i.user_id
        WHERE i.target_type = $1 AND i.target_id = $2
        ORDER BY i.created_at DESC
        "#,
    )
    .bind(&target_type)
    .bind(target_id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(interactions) => {
            let summary = compute_summary(&interactions);
            (
                StatusCode::OK,
                Json(TargetInteractionsResponse {
                    interactions,
                    summary,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Database error fetching target interactions: {}", e);
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching target interactions",
            )
            .into_response()
        }
    }
}

/// POST /api/interactions - Create-or-update the caller's interaction for a
/// target. An existing (user, type, target) tuple is updated in place; the
/// insert goes through ON CONFLICT so a concurrent duplicate add lands on
/// the surviving row instead of surfacing a constraint error.
pub async fn add_interaction(
    headers: HeaderMap,
    Json(payload): Json<AddInteractionRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let mut fields = Vec::new();
    if !is_valid_kind(&payload.kind) {
        fields.push(field_error(
            "type",
            "Type must be one of: like, bookmark, rating, comment",
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
    let rating = match (payload.kind.as_str(), payload.rating) {
        ("rating", Some(r)) if (1..=5).contains(&r) => Some(r),
        ("rating", Some(_)) => {
            fields.push(field_error("rating", "Rating must be between 1 and 5"));
            None
        }
        ("rating", None) => {
            fields.push(field_error("rating", "Rating is required for rating type"));
            None
        }
        // Not a rating interaction; any stray value is dropped
        _ => None,
    };
    let comment = match (payload.kind.as_str(), payload.comment.as_deref()) {
        ("comment", Some(c)) if !c.trim().is_empty() => Some(c.trim().to_string()),
        ("comment", _) => {
            fields.push(field_error("comment", "Comment is required for comment type"));
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
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating interaction")
                .into_response();
        }
    }

    // Update-in-place path for an existing tuple
    let existing = sqlx::query_as::<_, UserInteraction>(&format!(
        "SELECT {} FROM user_interactions \
         WHERE user_id = $1 AND kind = $2 AND target_type = $3 AND target_id = $4",
        INTERACTION_COLUMNS
    ))
    .bind(user.id)
    .bind(&payload.kind)
    .bind(target.kind.as_str())
    .bind(target.id)
    .fetch_optional(pool.as_ref())
    .await;

    match existing {
        Ok(Some(row)) => {
            match sqlx::query_as::<_, UserInteraction>(&format!(
                "UPDATE user_interactions \
                 SET rating = COALESCE($1, rating), comment = COALESCE($2, comment), \
                     updated_at = now() \
                 WHERE id = $3 RETURNING {}",
                INTERACTION_COLUMNS
            ))
            .bind(rating)
            .bind(&comment)
            .bind(row.id)
            .fetch_one(pool.as_ref())
            .await
            {
                Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
                Err(e) => {
                    tracing::error!("Database error updating interaction: {}", e);
                    reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating interaction")
                        .into_response()
                }
            }
        }
        Ok(None) => {
            match sqlx::query_as::<_, UserInteraction>(&format!(
                r#"
                INSERT INTO user_interactions (user_id, kind, target_type, target_id, rating, comment)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, kind, target_type, target_id)
                DO UPDATE SET rating = COALESCE(EXCLUDED.rating, user_interactions.rating),
                              comment = COALESCE(EXCLUDED.comment, user_interactions.comment),
                              updated_at = now()
                RETURNING {}
                "#,
                INTERACTION_COLUMNS
            ))
            .bind(user.id)
            .bind(&payload.kind)
            .bind(target.kind.as_str())
            .bind(target.id)
            .bind(rating)
            .bind(&comment)
            .fetch_one(pool.as_ref())
            .await
            {
                Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
                Err(e) => {
                    tracing::error!("Database error creating interaction: {}", e);
                    reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating interaction")
                        .into_response()
                }
            }
        }
        Err(e) => {
            tracing::error!("Database error fetching interaction: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating interaction")
                .into_response()
        }
    }
}

/// PUT /api/interactions/toggle - Idempotently set a like/bookmark on or
/// off, regardless of its current state
pub async fn toggle_interaction(
    headers: HeaderMap,
    Json(payload): Json<ToggleRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let mut fields = Vec::new();
    if !TOGGLE_KINDS.contains(&payload.kind.as_str()) {
        fields.push(field_error("type", "Type must be 'like' or 'bookmark'"));
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

    let result = if payload.on {
        match target.exists(pool.as_ref()).await {
            Ok(true) => {}
            Ok(false) => return reject(StatusCode::NOT_FOUND, "Target not found").into_response(),
            Err(e) => {
                tracing::error!("Database error resolving target: {}", e);
                return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error toggling interaction")
                    .into_response();
            }
        }
        sqlx::query(
            r#"
            INSERT INTO user_interactions (user_id, kind, target_type, target_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, kind, target_type, target_id) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&payload.kind)
        .bind(target.kind.as_str())
        .bind(target.id)
        .execute(pool.as_ref())
        .await
    } else {
        sqlx::query(
            "DELETE FROM user_interactions \
             WHERE user_id = $1 AND kind = $2 AND target_type = $3 AND target_id = $4",
        )
        .bind(user.id)
        .bind(&payload.kind)
        .bind(target.kind.as_str())
        .bind(target.id)
        .execute(pool.as_ref())
        .await
    };

    match result {
        Ok(_) => (
            StatusCode::OK,
            Json(ToggleResponse {
                kind: payload.kind,
                target_type: target.kind.as_str().to_string(),
                target_id: target.id,
                on: payload.on,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database error toggling interaction: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error toggling interaction")
                .into_response()
        }
    }
}

/// DELETE /api/interactions/:id - Remove the caller's own interaction
pub async fn remove_interaction(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
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

    match sqlx::query("DELETE FROM user_interactions WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(pool.as_ref())
        .await
    {
        Ok(result) if result.rows_affected() > 0 => {
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(_) => reject(StatusCode::NOT_FOUND, "Interaction not found").into_response(),
        Err(e) => {
            tracing::error!("Database error removing interaction: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error removing interaction")
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
    use axum::routing::{get, put};
    use axum::Router;
    use chrono::Utc;
    use tower::ServiceExt;

    fn interactions_router() -> Router {
        Router::new()
            .route(
                "/api/interactions",
                get(list_interactions).post(add_interaction),
            )
            .route("/api/interactions/toggle", put(toggle_interaction))
            .route("/api/interactions/{id}", axum::routing::delete(remove_interaction))
            .route(
                "/api/interactions/target/{target_type}/{target_id}",
                get(target_interactions),
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

    fn interaction(kind: &str, rating: Option<i32>) -> InteractionWithUser {
        InteractionWithUser {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            kind: kind.to_string(),
            target_type: "project".to_string(),
            target_id: Uuid::new_v4(),
            rating,
            comment: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts_by_kind() {
        let rows = vec![
            interaction("like", None),
            interaction("like", None),
            interaction("bookmark", None),
            interaction("comment", None),
            interaction("rating", Some(4)),
            interaction("rating", Some(2)),
        ];
        let summary = compute_summary(&rows);
        assert_eq!(summary.like_count, 2);
        assert_eq!(summary.bookmark_count, 1);
        assert_eq!(summary.comment_count, 1);
        assert_eq!(summary.rating_count, 2);
        assert_eq!(summary.average_rating, 3.0);
    }

    #[test]
    fn test_summary_with_no_ratings_averages_to_zero() {
        let rows = vec![interaction("like", None), interaction("comment", None)];
        let summary = compute_summary(&rows);
        assert_eq!(summary.rating_count, 0);
        assert_eq!(summary.average_rating, 0.0);
        assert!(!summary.average_rating.is_nan());
    }

    #[test]
    fn test_summary_empty_list() {
        let summary = compute_summary(&[]);
        assert_eq!(summary.like_count, 0);
        assert_eq!(summary.average_rating, 0.0);
    }

    #[tokio::test]
    async fn test_list_interactions_without_token_returns_unauthorized() {
        let req = Request::get("/api/interactions").body(Body::empty()).unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_add_interaction_rejects_unknown_kind() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "applaud",
            "targetType": "project",
            "targetId": Uuid::new_v4(),
        }))
        .unwrap();
        let req = Request::post("/api/interactions")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_rating_out_of_range_is_rejected() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "rating",
            "targetType": "blog",
            "targetId": Uuid::new_v4(),
            "rating": 9,
        }))
        .unwrap();
        let req = Request::post("/api/interactions")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_add_comment_without_text_is_rejected() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "comment",
            "targetType": "blog",
            "targetId": Uuid::new_v4(),
        }))
        .unwrap();
        let req = Request::post("/api/interactions")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_toggle_rejects_comment_kind() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "comment",
            "targetType": "blog",
            "targetId": Uuid::new_v4(),
            "on": true,
        }))
        .unwrap();
        let req = Request::put("/api/interactions/toggle")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_target_interactions_rejects_unknown_target_type() {
        let req = Request::get(format!(
            "/api/interactions/target/resource/{}",
            Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();
        let res = interactions_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
