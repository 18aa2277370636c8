/**
 * Blog Routes
 * CRUD API endpoints for blog posts: slugs derived from titles, drafts
 * visible only to their author
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, models::BlogPost, models::BlogPostWithAuthor};
use crate::routes::{
    field_error, optional_auth, reject, require_auth, validation_error, SuccessResponse,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for POST /api/blog (create)
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlogRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub status: Option<String>,
}

/// Request body for PUT /api/blog/:id (update)
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBlogRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub status: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

const VALID_STATUSES: &[&str] = &["draft", "published"];

fn is_valid_status(status: &str) -> bool {
    VALID_STATUSES.contains(&status)
}

/// Derive the URL slug from a title: lowercase, every non-alphanumeric byte
/// becomes a hyphen, runs of hyphens collapse to one. Deterministic, and an
/// all-punctuation title yields a bare hyphen rather than an error.
pub fn derive_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    slug
}

/// Sanitize HTML content using ammonia
fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    let msg = e.to_string();
    msg.contains("duplicate key") || msg.contains("unique constraint")
}

const POST_COLUMNS: &str = "id, title, content, excerpt, author_id, tags, image_url, status, \
                            slug, created_at, updated_at";

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/blog - Published posts; an authenticated caller also sees their
/// own drafts
pub async fn list_posts(headers: HeaderMap) -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let caller = optional_auth(&headers);

    let result = match caller {
        Some(user) => {
            sqlx::query_as::<_, BlogPostWithAuthor>(
                r#"
                SELECT b.id, b.title, b.content, b.excerpt, b.author_id,
                       u.username AS author_username, b.tags, b.image_url, b.status, b.slug,
                       b.created_at, b.updated_at
                FROM blog_posts b
                JOIN users u ON u.id = b.author_id
                WHERE b.status = 'published' OR b.author_id = $1
                ORDER BY b.created_at DESC
                "#,
            )
            .bind(user.id)
            .fetch_all(pool.as_ref())
            .await
        }
        None => {
            sqlx::query_as::<_, BlogPostWithAuthor>(
                r#"
                SELECT b.id, b.title, b.content, b.excerpt, b.author_id,
                       u.username AS author_username, b.tags, b.image_url, b.status, b.slug,
                       b.created_at, b.updated_at
                FROM blog_posts b
                JOIN users u ON u.id = b.author_id
                WHERE b.status = 'published'
                ORDER BY b.created_at DESC
                "#,
            )
            .fetch_all(pool.as_ref())
            .await
        }
    };

    match result {
        Ok(posts) => (StatusCode::OK, Json(posts)).into_response(),
        Err(e) => {
            tracing::error!("Database error fetching blog posts: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching blog posts").into_response()
        }
    }
}

/// GET /api/blog/:id_or_slug - Single post by slug or id; drafts 404 for
/// anyone but the author
pub async fn get_post(headers: HeaderMap, Path(id_or_slug): Path<String>) -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return reject(StatusCode::SERVICE_UNAVAILABLE, "Database not available")
                .into_response();
        }
    };

    let as_id: Option<Uuid> = id_or_slug.parse().ok();

    match sqlx::query_as::<_, BlogPostWithAuthor>(
        r#"
        SELECT b.id, b.title, b.content, b.excerpt, b.author_id,
               u.username AS author_username, b.tags, b.image_url, b.status, b.slug,
               b.created_at, b.updated_at
        FROM blog_posts b
        JOIN users u ON u.id = b.author_id
        WHERE b.slug = $1 OR b.id = $2
        "#,
    )
    .bind(&id_or_slug)
    .bind(as_id)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(post)) => {
            if post.status == "draft" {
                let is_author = optional_auth(&headers)
                    .map(|u| u.id == post.author_id)
                    .unwrap_or(false);
                if !is_author {
                    // A draft's existence is not disclosed to other callers
                    return reject(StatusCode::NOT_FOUND, "Blog post not found").into_response();
                }
            }
            (StatusCode::OK, Json(post)).into_response()
        }
        Ok(None) => reject(StatusCode::NOT_FOUND, "Blog post not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching blog post: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching blog post").into_response()
        }
    }
}

/// POST /api/blog - Create post (auth required); slug derived server-side
pub async fn create_post(
    headers: HeaderMap,
    Json(payload): Json<CreateBlogRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    let mut fields = Vec::new();
    if payload.title.trim().is_empty() {
        fields.push(field_error("title", "Title is required"));
    }
    if payload.content.trim().is_empty() {
        fields.push(field_error("content", "Content is required"));
    }
    if payload.excerpt.trim().is_empty() {
        fields.push(field_error("excerpt", "Excerpt is required"));
    }
    if let Some(status) = payload.status.as_deref() {
        if !is_valid_status(status) {
            fields.push(field_error("status", "Status must be 'draft' or 'published'"));
        }
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

    let title = payload.title.trim().to_string();
    let slug = derive_slug(&title);
    let content = sanitize_html(&payload.content);
    let status = payload.status.unwrap_or_else(|| "draft".to_string());

    match sqlx::query_as::<_, BlogPost>(&format!(
        r#"
        INSERT INTO blog_posts (title, content, excerpt, author_id, tags, image_url, status, slug)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        POST_COLUMNS
    ))
    .bind(&title)
    .bind(&content)
    .bind(payload.excerpt.trim())
    .bind(user.id)
    .bind(&payload.tags)
    .bind(&payload.image_url)
    .bind(&status)
    .bind(&slug)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(post) => (StatusCode::CREATED, Json(post)).into_response(),
        Err(e) if is_unique_violation(&e) => {
            reject(StatusCode::CONFLICT, "A post with this title already exists").into_response()
        }
        Err(e) => {
            tracing::error!("Database error creating blog post: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error creating blog post").into_response()
        }
    }
}

/// PUT /api/blog/:id - Update post (author or admin); a title change
/// regenerates the slug
pub async fn update_post(
    headers: HeaderMap,
    Path(id_or_slug): Path<String>,
    Json(payload): Json<UpdateBlogRequest>,
) -> impl IntoResponse {
    let user = match require_auth(&headers) {
        Ok(u) => u,
        Err(err) => return err.into_response(),
    };

    if let Some(status) = payload.status.as_deref() {
        if !is_valid_status(status) {
            return validation_error(vec![field_error(
                "status",
                "Status must be 'draft' or 'published'",
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

    let as_id: Option<Uuid> = id_or_slug.parse().ok();
    let existing = match sqlx::query_as::<_, BlogPost>(&format!(
        "SELECT {} FROM blog_posts WHERE id = $1 OR slug = $2",
        POST_COLUMNS
    ))
    .bind(as_id)
    .bind(&id_or_slug)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(p)) => p,
        Ok(None) => return reject(StatusCode::NOT_FOUND, "Blog post not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching blog post: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating blog post")
                .into_response();
        }
    };

    if existing.author_id != user.id && !user.is_admin() {
        return reject(StatusCode::FORBIDDEN, "Not authorized to update this post")
            .into_response();
    }

    let title = payload
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or(existing.title);
    let slug = derive_slug(&title);
    let content = payload
        .content
        .map(|c| sanitize_html(&c))
        .unwrap_or(existing.content);
    let excerpt = payload
        .excerpt
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or(existing.excerpt);
    let tags = payload.tags.unwrap_or(existing.tags);
    let image_url = payload.image_url.or(existing.image_url);
    let status = payload.status.unwrap_or(existing.status);

    match sqlx::query_as::<_, BlogPost>(&format!(
        r#"
        UPDATE blog_posts
        SET title = $1, content = $2, excerpt = $3, tags = $4, image_url = $5,
            status = $6, slug = $7, updated_at = now()
        WHERE id = $8
        RETURNING {}
        "#,
        POST_COLUMNS
    ))
    .bind(&title)
    .bind(&content)
    .bind(&excerpt)
    .bind(&tags)
    .bind(&image_url)
    .bind(&status)
    .bind(&slug)
    .bind(existing.id)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok(post) => (StatusCode::OK, Json(post)).into_response(),
        Err(e) if is_unique_violation(&e) => {
            reject(StatusCode::CONFLICT, "A post with this title already exists").into_response()
        }
        Err(e) => {
            tracing::error!("Database error updating blog post: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error updating blog post").into_response()
        }
    }
}

/// DELETE /api/blog/:id - Delete post (author or admin)
pub async fn delete_post(headers: HeaderMap, Path(id_or_slug): Path<String>) -> impl IntoResponse {
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

    let as_id: Option<Uuid> = id_or_slug.parse().ok();
    let (post_id, author_id) = match sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT id, author_id FROM blog_posts WHERE id = $1 OR slug = $2",
    )
    .bind(as_id)
    .bind(&id_or_slug)
    .fetch_optional(pool.as_ref())
    .await
    {
        Ok(Some(row)) => row,
        Ok(None) => return reject(StatusCode::NOT_FOUND, "Blog post not found").into_response(),
        Err(e) => {
            tracing::error!("Database error fetching blog post: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Error deleting blog post")
                .into_response();
        }
    };

    if author_id != user.id && !user.is_admin() {
        return reject(StatusCode::FORBIDDEN, "Not authorized to delete this post")
            .into_response();
    }

    match sqlx::query("DELETE FROM blog_posts WHERE id = $1")
        .bind(post_id)
        .execute(pool.as_ref())
        .await
    {
        Ok(_) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Err(e) => {
            tracing::error!("Database error deleting blog post: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Error deleting blog post").into_response()
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

    fn blog_router() -> Router {
        Router::new()
            .route("/api/blog", get(list_posts).post(create_post))
            .route(
                "/api/blog/{id_or_slug}",
                get(get_post).put(update_post).delete(delete_post),
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
    fn test_derive_slug_is_deterministic() {
        assert_eq!(derive_slug("Hello, World!"), derive_slug("Hello, World!"));
        assert_eq!(derive_slug("Hello, World!"), "hello-world-");
    }

    #[test]
    fn test_derive_slug_collapses_punctuation_runs() {
        assert_eq!(derive_slug("Rust & Axum --- a tour"), "rust-axum-a-tour");
        assert_eq!(derive_slug("!!!"), "-");
    }

    #[test]
    fn test_derive_slug_lowercases() {
        assert_eq!(derive_slug("My First POST"), "my-first-post");
    }

    #[test]
    fn test_status_validation() {
        assert!(is_valid_status("draft"));
        assert!(is_valid_status("published"));
        assert!(!is_valid_status("archived"));
    }

    #[tokio::test]
    async fn test_list_posts_without_db_returns_unavailable() {
        let req = Request::get("/api/blog").body(Body::empty()).unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_post_without_token_returns_unauthorized() {
        let body = serde_json::to_vec(&serde_json::json!({
            "title": "A post", "content": "<p>hi</p>", "excerpt": "hi"
        }))
        .unwrap();
        let req = Request::post("/api/blog")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_post_missing_fields_lists_each_one() {
        let req = Request::post("/api/blog")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: crate::routes::ValidationErrorResponse =
            serde_json::from_slice(&bytes).unwrap();
        let fields: Vec<_> = body.fields.iter().map(|f| f.field.as_str()).collect();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"content"));
        assert!(fields.contains(&"excerpt"));
    }

    #[tokio::test]
    async fn test_create_post_rejects_unknown_status() {
        let body = serde_json::to_vec(&serde_json::json!({
            "title": "A post", "content": "<p>hi</p>", "excerpt": "hi",
            "status": "archived"
        }))
        .unwrap();
        let req = Request::post("/api/blog")
            .header("authorization", bearer())
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = blog_router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
