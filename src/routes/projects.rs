/**
 * Project Routes
 * CRUD API endpoints for portfolio projects, with image upload
 */
use axum::{
    extract::{Multipart, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::db::{self, models::Project};
use crate::routes::uploads::{self, MultipartForm, StoredFile};
use crate::routes::{field_error, reject, require_auth, validation_error, SuccessResponse};

const UPLOAD_DIR: &str = "projects";

// ============================================================================
// Field parsing
// ============================================================================

fn parse_technologies(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("true") | Some("1"))
}

fn parse_order(raw: Option<&str>) -> i32 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/projects - All projects, sort key ascending
pub async fn list_projects() -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Project>(
        r#"
        SELECT id, title, description, image_url, technologies, github_url, live_url,
               sort_order, featured, created_at, updated_at
        FROM projects
        ORDER BY sort_order ASC, created_at DESC
        "#,
    )
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(projects) => (StatusCode::OK, Json(projects)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching projects: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching projects").into_response()
        }
    }
}

/// GET /api/projects/:id
pub async fn get_project(Path(id): Path<Uuid>) -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    match sqlx::query_as::<_, Project>(
        r#"
        SELECT id, title, description, image_url, technologies, github_url, live_url,
               sort_order, featured, created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(project)) => (StatusCode::OK, Json(project)).into_response(),
        Ok(None) => reject(StatusCode::NOT_FOUND, "Project not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching project: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching project").into_response()
        }
    }
}

/// POST /api/projects - Create project (auth required, multipart with image)
pub async fn create_project(headers: HeaderMap, multipart: Multipart) -> impl IntoResponse {
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
    if form.file("image").is_none() {
        fields.push(field_error("image", "Image is required"));
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

    let image = form.file("image").unwrap();
    let stored = match uploads::store_image(UPLOAD_DIR, &image.filename, &image.bytes).await {
        Ok(s) => s,
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.0).into_response(),
    };

    match insert_project(&pool, &form, &stored).await {
        Ok(project) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(e) => {
            // Keep disk and table in step: a failed insert must not leave the file
            uploads::delete_by_url(&stored.url).await;
            tracing::error!("Database error creating project: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating project").into_response()
        }
    }
}

async fn insert_project(
    pool: &sqlx::PgPool,
    form: &MultipartForm,
    stored: &StoredFile,
) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects
            (title, description, image_url, technologies, github_url, live_url, sort_order, featured)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, title, description, image_url, technologies, github_url, live_url,
                  sort_order, featured, created_at, updated_at
        "#,
    )
    .bind(form.text("title").unwrap_or_default().trim())
    .bind(form.text("description").unwrap_or_default().trim())
    .bind(&stored.url)
    .bind(parse_technologies(form.text("technologies")))
    .bind(form.text("githubUrl").map(|s| s.trim().to_string()))
    .bind(form.text("liveUrl").map(|s| s.trim().to_string()))
    .bind(parse_order(form.text("order")))
    .bind(parse_flag(form.text("featured")))
    .fetch_one(pool)
    .await
}

/// PUT /api/projects/:id - Update project (auth required, image optional)
pub async fn update_project(
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

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let existing = match sqlx::query_as::<_, Project>(
        r#"
        SELECT id, title, description, image_url, technologies, github_url, live_url,
               sort_order, featured, created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(p)) => p,
        Ok(None) => return reject(StatusCode::NOT_FOUND, "Project not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching project: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating project")
                .into_response();
        }
    };

    let new_image = match form.file("image") {
        Some(image) => match uploads::store_image(UPLOAD_DIR, &image.filename, &image.bytes).await
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
    let technologies = if form.text("technologies").is_some() {
        parse_technologies(form.text("technologies"))
    } else {
        existing.technologies
    };
    let github_url = form
        .text("githubUrl")
        .map(|s| s.trim().to_string())
        .or(existing.github_url);
    let live_url = form
        .text("liveUrl")
        .map(|s| s.trim().to_string())
        .or(existing.live_url);
    let sort_order = match form.text("order") {
        Some(raw) => parse_order(Some(raw)),
        None => existing.sort_order,
    };
    let featured = match form.text("featured") {
        Some(raw) => parse_flag(Some(raw)),
        None => existing.featured,
    };
    let image_url = new_image
        .as_ref()
        .map(|s| s.url.clone())
        .unwrap_or_else(|| existing.image_url.clone());

    match sqlx::query_as::<_, Project>(
        r#"
        UPDATE projects
        SET title = $1, description = $2, image_url = $3, technologies = $4,
            github_url = $5, live_url = $6, sort_order = $7, featured = $8, updated_at = now()
        WHERE id = $9
        RETURNING id, title, description, image_url, technologies, github_url, live_url,
                  sort_order, featured, created_at, updated_at
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&image_url)
    .bind(&technologies)
    .bind(&github_url)
    .bind(&live_url)
    .bind(sort_order)
    .bind(featured)
    .bind(id)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(project) => {
            // The old image is unreferenced once the row points at the new one
            if new_image.is_some() {
                uploads::delete_by_url(&existing.image_url).await;
            }
            (StatusCode::OK, Json(project)).into_response()
        }
        Err(e) => {
            if let Some(stored) = new_image {
                uploads::delete_by_url(&stored.url).await;
            }
            tracing::error!("Database error updating project: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating project").into_response()
        }
    }
}

/// DELETE /api/projects/:id - Delete project and its image (auth required)
pub async fn delete_project(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
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

    match sqlx::query_as::<_, (String,)>("DELETE FROM projects WHERE id = $1 RETURNING image_url")
        .bind(id)
        .fetch_optional(pool.as_ref())
        .await
    {
        Ok(Some((image_url,))) => {
            uploads::delete_by_url(&image_url).await;
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(None) => reject(StatusCode::NOT_FOUND, "Project not found").into_response(),
        Err(e) => {
            tracing::error!("Database error deleting project: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error deleting project").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn projects_router() -> Router {
        Router::new()
            .route("/api/projects", get(list_projects).post(create_project))
            .route(
                "/api/projects/{id}",
                get(get_project).delete(delete_project),
            )
    }

    #[test]
    fn test_parse_technologies_splits_and_trims() {
        assert_eq!(
            parse_technologies(Some("Rust, axum , sqlx,,")),
            vec!["Rust", "axum", "sqlx"]
        );
        assert!(parse_technologies(None).is_empty());
    }

    #[test]
    fn test_parse_flag_and_order_defaults() {
        assert!(parse_flag(Some("true")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(None));
        assert_eq!(parse_order(Some("7")), 7);
        assert_eq!(parse_order(Some("seven")), 0);
        assert_eq!(parse_order(None), 0);
    }

    #[tokio::test]
    async fn test_list_projects_without_db_returns_unavailable() {
        let req = Request::get("/api/projects").body(Body::empty()).unwrap();
        let res = projects_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_project_without_token_returns_unauthorized() {
        let req = Request::post("/api/projects")
            .header("content-type", "multipart/form-data; boundary=x")
            .body(Body::empty())
            .unwrap();
        let res = projects_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_project_without_token_returns_unauthorized() {
        let req = Request::delete(format!("/api/projects/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let res = projects_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_project_rejects_non_uuid_id() {
        let req = Request::get("/api/projects/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let res = projects_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
