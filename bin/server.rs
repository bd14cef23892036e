// Rekon - Reconciliation API Server
// JSON endpoints over the statement store for the web UI

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use rekon::{
    confirm_match, filter_by_status, import_statement, reject_match, summarize, MatchEngine,
    SqliteStore, StatementStore, StatusFilter,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
struct LinesQuery {
    /// all | unlinked | unmatched | needs_review | matched | recorded
    filter: Option<String>,
}

#[derive(Deserialize)]
struct ImportRequest {
    /// Path to a statement file readable by the server process
    path: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/accounts - All registered bank accounts
async fn get_accounts(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match store.bank_accounts() {
        Ok(accounts) => (StatusCode::OK, Json(ApiResponse::ok(accounts))).into_response(),
        Err(e) => {
            eprintln!("Error listing accounts: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/accounts/:id/lines?filter=... - Statement lines, newest first
async fn get_lines(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(query): Query<LinesQuery>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match store.lines_for_account(&account_id, None) {
        Ok(lines) => {
            let filter = StatusFilter::parse(query.filter.as_deref().unwrap_or("all"));
            let filtered = filter_by_status(&lines, filter);
            (StatusCode::OK, Json(ApiResponse::ok(filtered))).into_response()
        }
        Err(e) => {
            eprintln!("Error listing lines for {}: {}", account_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/accounts/:id/summary - Per-status counts for the dashboard
async fn get_summary(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match store.lines_for_account(&account_id, None) {
        Ok(lines) => {
            (StatusCode::OK, Json(ApiResponse::ok(summarize(&lines)))).into_response()
        }
        Err(e) => {
            eprintln!("Error summarizing {}: {}", account_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /api/accounts/:id/import - Import a statement file
async fn post_import(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<ImportRequest>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match import_statement(&*store, &account_id, std::path::Path::new(&request.path)) {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::ok(summary))).into_response(),
        Err(e) => {
            eprintln!("Error importing into {}: {}", account_id, e);
            (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /api/accounts/:id/match - Run one auto-match pass
async fn post_auto_match(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match MatchEngine::new().auto_match(&*store, &account_id) {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::ok(outcome))).into_response(),
        Err(e) => {
            eprintln!("Error auto-matching {}: {}", account_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /api/lines/:id/confirm - Accept a suggested match
async fn post_confirm(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match confirm_match(&*store, &line_id) {
        Ok(line) => (StatusCode::OK, Json(ApiResponse::ok(line))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(e.to_string())),
        )
            .into_response(),
    }
}

/// POST /api/lines/:id/reject - Reset a line to unmatched
async fn post_reject(
    State(state): State<AppState>,
    Path(line_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match reject_match(&*store, &line_id) {
        Ok(line) => (StatusCode::OK, Json(ApiResponse::ok(line))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("Rekon - Reconciliation API Server");

    let db_path = std::env::var("REKON_DB").unwrap_or_else(|_| "rekon.db".to_string());
    let store = SqliteStore::open(std::path::Path::new(&db_path)).expect("Failed to open database");
    println!("✓ Database opened: {}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(store)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", get(get_accounts))
        .route("/accounts/:id/lines", get(get_lines))
        .route("/accounts/:id/summary", get(get_summary))
        .route("/accounts/:id/import", post(post_import))
        .route("/accounts/:id/match", post(post_auto_match))
        .route("/lines/:id/confirm", post(post_confirm))
        .route("/lines/:id/reject", post(post_reject))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = std::env::var("REKON_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    println!("\n✓ Server running on http://{}", addr);
    println!("  Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
