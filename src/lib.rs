//! Portfolio API - library for app logic and testing

pub mod db;
pub mod logging;
pub mod routes;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local dev client origins.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                "http://localhost:3000".parse().unwrap(),
                "http://127.0.0.1:3000".parse().unwrap(),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app() -> Router {
    let cors = configure_cors();
    tracing::info!("CORS configured");

    Router::new()
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/verify", get(routes::auth::verify_token))
        .route(
            "/api/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(routes::projects::get_project)
                .put(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route(
            "/api/blog",
            get(routes::blog::list_posts).post(routes::blog::create_post),
        )
        .route(
            "/api/blog/{id_or_slug}",
            get(routes::blog::get_post)
                .put(routes::blog::update_post)
                .delete(routes::blog::delete_post),
        )
        .route(
            "/api/interactions",
            get(routes::interactions::list_interactions)
                .post(routes::interactions::add_interaction),
        )
        .route(
            "/api/interactions/toggle",
            put(routes::interactions::toggle_interaction),
        )
        .route(
            "/api/interactions/{id}",
            axum::routing::delete(routes::interactions::remove_interaction),
        )
        .route(
            "/api/interactions/target/{target_type}/{target_id}",
            get(routes::interactions::target_interactions),
        )
        .route(
            "/api/resources",
            get(routes::resources::list_resources).post(routes::resources::create_resource),
        )
        .route(
            "/api/resources/type/{type}",
            get(routes::resources::list_resources_by_type),
        )
        .route(
            "/api/resources/target/{target_type}/{target_id}",
            get(routes::resources::list_resources_for_target),
        )
        .route(
            "/api/resources/download/{id}",
            get(routes::resources::download_resource),
        )
        .route(
            "/api/resources/{id}",
            put(routes::resources::update_resource).delete(routes::resources::delete_resource),
        )
        .route(
            "/api/feedback",
            get(routes::feedback::list_feedback).post(routes::feedback::create_feedback),
        )
        .route("/api/feedback/admin", get(routes::feedback::list_all_feedback))
        .route(
            "/api/feedback/public",
            get(routes::feedback::list_public_feedback),
        )
        .route(
            "/api/feedback/{id}/status",
            put(routes::feedback::update_feedback_status),
        )
        .route(
            "/api/feedback/{id}/responses",
            post(routes::feedback::add_feedback_response),
        )
        .route(
            "/api/feedback/{id}",
            axum::routing::delete(routes::feedback::delete_feedback),
        )
        .route(
            "/api/learning-progress",
            get(routes::learning::list_entries).post(routes::learning::create_entry),
        )
        .route(
            "/api/learning-progress/{id}",
            put(routes::learning::update_entry).delete(routes::learning::delete_entry),
        )
        .route(
            "/api/learning-progress/public/{target_type}/{target_id}",
            get(routes::learning::list_public_entries),
        )
        .route("/api/contact", post(routes::contact::submit_contact))
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/database", get(routes::health::health_database))
        .nest_service("/uploads", ServeDir::new(routes::uploads::UPLOAD_ROOT))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        // Compress responses with gzip/br/zstd automatically
        .layer(CompressionLayer::new())
        // Global request body cap, sized for the largest allowed upload
        .layer(RequestBodyLimitLayer::new(12 * 1024 * 1024))
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() {
    dotenvy::dotenv().ok();

    // Guards MUST be held for the programme's lifetime; dropping them early
    // shuts down background log-writer threads and loses buffered log lines.
    let _log_guards = logging::init();

    routes::health::init_start_time();

    // Refuse to start in production with the insecure default JWT secret.
    let environment = std::env::var("ENVIRONMENT").unwrap_or_default();
    if environment == "production" {
        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        if secret.is_empty() || secret == "default-jwt-secret-change-in-production" {
            panic!(
                "FATAL: JWT_SECRET must be set to a secure, unique value in production. \
                 Refusing to start with the default secret."
            );
        }

        if routes::auth::ADMIN_EMAILS.is_empty() {
            tracing::warn!(
                "ADMIN_EMAILS is not set; no account will ever hold the admin role."
            );
        }
    }

    if std::env::var("DATABASE_URL").is_ok() {
        match db::init_pool(None).await {
            Ok(pool) => {
                if let Err(e) = db::run_migrations(&pool).await {
                    tracing::error!("Failed to run database migrations: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize database pool: {}. Continuing without database.",
                    e
                );
            }
        }
    } else {
        tracing::info!("DATABASE_URL not set. Running without database connection.");
    }

    let app = create_app();

    // Bind address is configurable via HOST / PORT env vars.
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid HOST/PORT configuration");
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_app_returns_router() {
        let _app = create_app();
        // Just test that it compiles and doesn't panic
    }
}
