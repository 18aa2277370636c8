/**
 * Resource Routes
 * Downloadable files (code, tutorials, premium extras) attached to a blog
 * post or project, with a download counter
 */
use axum::{
    body::Body,
    extract::{Multipart, Path},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::db::{self, models::Resource, targets::TargetRef};
use crate::routes::uploads::{self, MultipartForm, StoredFile};
use crate::routes::{field_error, reject, require_auth, validation_error, SuccessResponse};

const UPLOAD_DIR: &str = "resources";

const VALID_KINDS: &[&str] = &["code", "tutorial", "premium", "exclusive"];

fn is_valid_kind(kind: &str) -> bool {
    VALID_KINDS.contains(&kind)
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("true") | Some("1"))
}

fn parse_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// The `relatedTo` field arrives as a JSON object string inside the
/// multipart form, e.g. `{"type":"blog","id":"..."}`.
fn parse_related(raw: Option<&str>) -> Option<TargetRef> {
    raw.and_then(|s| serde_json::from_str::<TargetRef>(s).ok())
}

const RESOURCE_COLUMNS: &str = "id, title, description, kind, file_url, file_size, file_type, \
                                related_type, related_id, is_premium, download_count, tags, \
                                created_at, updated_at";

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/resources - All resources, newest first
pub async fn list_resources() -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Resource>(&format!(
        "SELECT {} FROM resources ORDER BY created_at DESC",
        RESOURCE_COLUMNS
    ))
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(resources) => (StatusCode::OK, Json(resources)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching resources: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching resources").into_response()
        }
    }
}

/// GET /api/resources/type/:type - Resources of one kind
pub async fn list_resources_by_type(Path(kind): Path<String>) -> impl IntoResponse {
    if !is_valid_kind(&kind) {
        return validation_error(vec![field_error(
            "type",
            "Type must be one of: code, tutorial, premium, exclusive",
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

    match sqlx::query_as::<_, Resource>(&format!(
        "SELECT {} FROM resources WHERE kind = $1 ORDER BY created_at DESC",
        RESOURCE_COLUMNS
    ))
    .bind(&kind)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(resources) => (StatusCode::OK, Json(resources)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching resources: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching resources").into_response()
        }
    }
}

/// GET /api/resources/target/:targetType/:targetId - Resources attached to a
/// blog post or project
pub async fn list_resources_for_target(
    Path((target_type, target_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    if TargetRef::parse(&target_type, target_id).is_none() {
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

    match sqlx::query_as::<_, Resource>(&format!(
        "SELECT {} FROM resources WHERE related_type = $1 AND related_id = $2 \
         ORDER BY created_at DESC",
        RESOURCE_COLUMNS
    ))
    .bind(&target_type)
    .bind(target_id)
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(resources) => (StatusCode::OK, Json(resources)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching target resources: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching target resources")
                .into_response()
        }
    }
}

/// POST /api/resources - Create resource (auth required, multipart with file)
pub async fn create_resource(headers: HeaderMap, multipart: Multipart) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers) {
        return err.into_response();
    }

    let form = match uploads::collect_multipart(multipart).await {
        Ok(f) => f,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
    };

    let mut fields = Vec::new();
    if form.text("title").is_none() {
        fields.push(field_error("title", "Title is required"));
    }
    if form.text("description").is_none() {
        fields.push(field_error("description", "Description is required"));
    }
    match form.text("type") {
        Some(kind) if is_valid_kind(kind) => {}
        Some(_) => fields.push(field_error(
            "type",
            "Type must be one of: code, tutorial, premium, exclusive",
        )),
        None => fields.push(field_error("type", "Type is required")),
    }
    let related = parse_related(form.text("relatedTo"));
    if related.is_none() {
        fields.push(field_error(
            "relatedTo",
            "relatedTo must be a {type, id} object with type 'blog' or 'project'",
        ));
    }
    if form.file("file").is_none() {
        fields.push(field_error("file", "File is required"));
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

    match related.exists(pool.as_ref()).await {
        Ok(true) => {}
        Ok(false) => return reject(StatusCode::NOT_FOUND, "Related target not found").into_response(),
        Err(e) => {
            tracing::error!("Database error resolving related target: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating resource")
                .into_response();
        }
    }

    let file = form.file("file").unwrap();
    let stored = match uploads::store_document(UPLOAD_DIR, &file.filename, &file.bytes).await {
        Ok(s) => s,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
    };

    match insert_resource(&pool, &form, &related, &stored).await {
        Ok(resource) => (StatusCode::CREATED, Json(resource)).into_response(),
        Err(e) => {
            uploads::delete_by_url(&stored.url).await;
            tracing::error!("Database error creating resource: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating resource").into_response()
        }
    }
}

async fn insert_resource(
    pool: &sqlx::PgPool,
    form: &MultipartForm,
    related: &TargetRef,
    stored: &StoredFile,
) -> Result<Resource, sqlx::Error> {
    sqlx::query_as::<_, Resource>(&format!(
        r#"
        INSERT INTO resources
            (title, description, kind, file_url, file_size, file_type,
             related_type, related_id, is_premium, tags)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        RESOURCE_COLUMNS
    ))
    .bind(form.text("title").unwrap_or_default().trim())
    .bind(form.text("description").unwrap_or_default().trim())
    .bind(form.text("type").unwrap_or_default())
    .bind(&stored.url)
    .bind(stored.size as i64)
    .bind(&stored.file_type)
    .bind(related.kind.as_str())
    .bind(related.id)
    .bind(parse_flag(form.text("isPremium")))
    .bind(parse_tags(form.text("tags")))
    .fetch_one(pool)
    .await
}

/// PUT /api/resources/:id - Update resource (auth required, file optional)
pub async fn update_resource(
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers) {
        return err.into_response();
    }

    let form = match uploads::collect_multipart(multipart).await {
        Ok(f) => f,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
    };

    if let Some(kind) = form.text("type") {
        if !is_valid_kind(kind) {
            return validation_error(vec![field_error(
                "type",
                "Type must be one of: code, tutorial, premium, exclusive",
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

    let existing = match sqlx::query_as::<_, Resource>(&format!(
        "SELECT {} FROM resources WHERE id = $1",
        RESOURCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(r)) => r,
        Ok(None) => return reject(StatusCode::NOT_FOUND, "Resource not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching resource: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating resource")
                .into_response();
        }
    };

    let related = match form.text("relatedTo") {
        Some(raw) => match parse_related(Some(raw)) {
            Some(r) => r,
            None => {
                return validation_error(vec![field_error(
                    "relatedTo",
                    "relatedTo must be a {type, id} object with type 'blog' or 'project'",
                )])
                .into_response();
            }
        },
        None => match TargetRef::parse(&existing.related_type, existing.related_id) {
            Some(r) => r,
            None => {
                // Stored rows always hold a registry kind
                return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating resource")
                    .into_response();
            }
        },
    };

    let new_file = match form.file("file") {
        Some(file) => match uploads::store_document(UPLOAD_DIR, &file.filename, &file.bytes).await
        {
            Ok(s) => Some(s),
            Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
        },
        None => None,
    };

    let title = form
        .text("title")
        .map(|s| s.trim().to_string())
        .unwrap_or(existing.title);
    let description = form
        .text("description")
        .map(|s| s.trim().to_string())
        .unwrap_or(existing.description);
    let kind = form
        .text("type")
        .map(|s| s.to_string())
        .unwrap_or(existing.kind);
    let is_premium = match form.text("isPremium") {
        Some(raw) => parse_flag(Some(raw)),
        None => existing.is_premium,
    };
    let tags = if form.text("tags").is_some() {
        parse_tags(form.text("tags"))
    } else {
        existing.tags
    };
    let (file_url, file_size, file_type) = match &new_file {
        Some(s) => (s.url.clone(), s.size as i64, s.file_type.clone()),
        None => (
            existing.file_url.clone(),
            existing.file_size,
            existing.file_type.clone(),
        ),
    };

    match sqlx::query_as::<_, Resource>(&format!(
        r#"
        UPDATE resources
        SET title = $1, description = $2, kind = $3, file_url = $4, file_size = $5,
            file_type = $6, related_type = $7, related_id = $8, is_premium = $9,
            tags = $10, updated_at = now()
        WHERE id = $11
        RETURNING {}
        "#,
        RESOURCE_COLUMNS
    ))
    .bind(&title)
    .bind(&description)
    .bind(&kind)
    .bind(&file_url)
    .bind(file_size)
    .bind(&file_type)
    .bind(related.kind.as_str())
    .bind(related.id)
    .bind(is_premium)
    .bind(&tags)
    .bind(id)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(resource) => {
            if new_file.is_some() {
                uploads::delete_by_url(&existing.file_url).await;
            }
            (StatusCode::OK, Json(resource)).into_response()
        }
        Err(e) => {
            if let Some(stored) = new_file {
                uploads::delete_by_url(&stored.url).await;
            }
            tracing::error!("Database error updating resource: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating resource").into_response()
        }
    }
}

/// DELETE /api/resources/:id - Delete resource and its file (auth required)
pub async fn delete_resource(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers) {
        return err.into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, (String,)>("DELETE FROM resources WHERE id = $1 RETURNING file_url")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await
    {
        Ok(Some((file_url,))) => {
            uploads::delete_by_url(&file_url).await;
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(None) => reject(StatusCode::NOT_FOUND, "Resource not found").into_response(),
        Err(e) => {
            tracing::error!("Database error deleting resource: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error deleting resource").into_response()
        }
    }
}

/// GET /api/resources/download/:id - Serve the file and bump the counter
pub async fn download_resource(Path(id): Path<Uuid>) -> Response {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let resource = match sqlx::query_as::<_, Resource>(&format!(
        "UPDATE resources SET download_count = download_count + 1, updated_at = now() \
         WHERE id = $1 RETURNING {}",
        RESOURCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(r)) => r,
        Ok(None) => return reject(StatusCode::NOT_FOUND, "Resource not found").into_response(),
        Err(e) => {
            tracing::error!("Database error downloading resource: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error downloading resource")
                .into_response();
        }
    };

    let path = match uploads::disk_path_for_url(&resource.file_url) {
        Some(p) => p,
        None => {
            tracing::error!("Resource {} has a non-upload file_url", resource.id);
            return reject(StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to read resource file {}: {}", path.display(), e);
            return reject(StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        resource.id, resource.file_type
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| {
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error downloading resource")
                .into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn resources_router() -> Router {
        Router::new()
            .route("/api/resources", get(list_resources).post(create_resource))
            .route("/api/resources/type/{type}", get(list_resources_by_type))
            .route(
                "/api/resources/target/{target_type}/{target_id}",
                get(list_resources_for_target),
            )
            .route("/api/resources/download/{id}", get(download_resource))
    }

    #[test]
    fn test_kind_validation() {
        for kind in VALID_KINDS {
            assert!(is_valid_kind(kind));
        }
        assert!(!is_valid_kind("video"));
    }

    #[test]
    fn test_parse_related_accepts_tagged_object() {
        let related = parse_related(Some(
            r#"{"type":"blog","id":"7f3b7e9a-0d0f-4a7a-9b5a-0d8f3f1c2e11"}"#,
        ));
        assert!(related.is_some());
    }

    #[test]
    fn test_parse_related_rejects_unknown_kind_and_garbage() {
        assert!(parse_related(Some(r#"{"type":"user","id":"7f3b7e9a-0d0f-4a7a-9b5a-0d8f3f1c2e11"}"#)).is_none());
        assert!(parse_related(Some("not json")).is_none());
        assert!(parse_related(None).is_none());
    }

    #[tokio::test]
    async fn test_list_resources_without_db_returns_unavailable() {
        let req = Request::get("/api/resources")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = resources_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_list_by_unknown_type_returns_bad_request() {
        let req = Request::get("/api/resources/type/video")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = resources_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_resource_without_token_returns_unauthorized() {
        let req = Request::post("/api/resources")
            .header("content-type", "multipart/form-data; boundary=x")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = resources_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
