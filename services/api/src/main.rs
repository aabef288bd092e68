//! API Service - Read-only aggregate views over the loaded crime records
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /views - List view names
//! - GET /views/:name - Compute a view (top-municipalities, monthly, quarterly, crime-types)

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use loader::aggregate::{ViewKind, VIEWS};
use loader::config::{ConnectionTarget, DEFAULT_TOP_N};
use loader::db;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    top_n: usize,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ViewListResponse {
    views: Vec<&'static str>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct ViewQuery {
    top_n: Option<usize>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn views_handler() -> Json<ViewListResponse> {
    Json(ViewListResponse {
        views: VIEWS.iter().map(|(name, _)| *name).collect(),
    })
}

async fn view_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ViewQuery>,
) -> impl IntoResponse {
    let kind: ViewKind = match name.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e),
    };

    let top_n = params.top_n.unwrap_or(state.top_n);
    if top_n == 0 {
        return error_response(StatusCode::BAD_REQUEST, "top_n must be at least 1");
    }

    // A target the loader never wrote to has no tables yet.
    match db::tables_present(&state.pool).await {
        Ok(true) => {}
        Ok(false) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "no crime records loaded yet");
        }
        Err(e) => {
            tracing::error!(error = %e, view = %kind, "failed to inspect target");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    }

    match db::fetch_facts(&state.pool).await {
        Ok(facts) => Json(kind.compute(&facts, top_n)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, view = %kind, "failed to load facts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for the presentation frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/views", get(views_handler))
        .route("/views/:name", get(view_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let top_n = match std::env::var("TOP_N") {
        Ok(value) => value.parse().context("TOP_N must be a positive integer")?,
        Err(_) => DEFAULT_TOP_N,
    };
    anyhow::ensure!(top_n > 0, "TOP_N must be a positive integer");

    let mut target = ConnectionTarget::new(db_url);
    if let Ok(schema) = std::env::var("DB_SCHEMA") {
        target = target.with_schema(schema);
    }

    println!("=== Crime Records API ===");
    println!("Connecting to database...");

    let pool = db::connect_existing(&target)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let app = router(Arc::new(AppState { pool, top_n }));

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /views");
    println!("  GET /views/:name?top_n=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // Handlers under test never reach the database.
    fn test_app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        router(Arc::new(AppState { pool, top_n: 10 }))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(test_app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_view_list() {
        let (status, body) = get_json(test_app(), "/views").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["views"],
            serde_json::json!(["top-municipalities", "monthly", "quarterly", "crime-types"])
        );
    }

    #[tokio::test]
    async fn test_unknown_view_is_404() {
        let (status, body) = get_json(test_app(), "/views/pie-chart").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("pie-chart"));
    }

    #[tokio::test]
    async fn test_zero_top_n_rejected() {
        let (status, _) = get_json(test_app(), "/views/top-municipalities?top_n=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // Needs TEST_DB_URL; returns early without it.
    #[tokio::test]
    async fn test_unloaded_target_is_503_and_left_untouched() {
        let Ok(db_url) = std::env::var("TEST_DB_URL") else {
            eprintln!("TEST_DB_URL not set, skipping");
            return;
        };
        let schema = format!("api_unloaded_{}", std::process::id());
        let target = ConnectionTarget::new(db_url).with_schema(schema.clone());
        let pool = db::connect_existing(&target).await.unwrap();
        let app = router(Arc::new(AppState {
            pool: pool.clone(),
            top_n: 10,
        }));

        let (status, body) = get_json(app, "/views/monthly").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("no crime records"));

        let schemas: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind(&schema)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(schemas, 0);
    }
}
