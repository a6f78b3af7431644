// Service Archive - Web Server
// REST API for running historical imports and browsing stored services

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use service_archive::{
    CanonicalRecord, ImportConfig, ImportError, ImportExecutor, ImportOptions, ImportReport,
    ServiceFilter, ServiceStore, SourceFormat, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(name = "archive-server")]
#[command(about = "HTTP front end for historical service imports")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "3000", env = "SERVICE_ARCHIVE_PORT")]
    port: u16,

    #[arg(short, long, env = "SERVICE_ARCHIVE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SERVICE_ARCHIVE_DB")]
    db: Option<PathBuf>,
}

/// Shared application state.
/// One store behind one lock: import jobs run one at a time.
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<SqliteStore>>,
    config: Arc<ImportConfig>,
    executor: Arc<ImportExecutor>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::SourceNotFound(_) => ApiError::NotFound(err.to_string()),
            ImportError::SourceUnreadable { .. } | ImportError::Config(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Unexpected(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unexpected(e) => {
                error!("{:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "unexpected error".to_string())
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ImportRequest {
    dry_run: Option<bool>,
    file_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesQuery {
    sigla: Option<String>,
    year: Option<i32>,
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": service_archive::VERSION }))
}

/// POST /api/import/:format - Dry run (default) or commit one source file
async fn run_import(
    State(state): State<AppState>,
    Path(format): Path<String>,
    body: Bytes,
) -> Result<Json<ImportReport>, ApiError> {
    let format = SourceFormat::from_name(&format)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown import format '{}'", format)))?;

    // An empty body means all defaults; anything else must be a valid request
    let request: ImportRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ImportRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid import request: {}", e)))?
    };

    let path = request
        .file_path
        .unwrap_or_else(|| state.config.default_paths.for_format(format).to_path_buf());
    let mut options = ImportOptions::from_config(&state.config);
    options.dry_run = request.dry_run.unwrap_or(true);

    let report = tokio::task::spawn_blocking(move || {
        let mut store = state
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("service store lock poisoned"))?;
        state
            .executor
            .run(format, &path, &options, &mut *store)
            .map_err(ApiError::from)
    })
    .await
    .context("import task panicked")??;

    Ok(Json(report))
}

/// GET /api/services?sigla=&year= - Stored services, historical included
async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<Vec<CanonicalRecord>>, ApiError> {
    let mut filter = ServiceFilter::all();
    filter.sigla = query.sigla;
    if let Some(year) = query.year {
        filter.date_from = NaiveDate::from_ymd_opt(year, 1, 1);
        filter.date_to = NaiveDate::from_ymd_opt(year, 12, 31);
        if filter.date_from.is_none() {
            return Err(ApiError::BadRequest(format!("invalid year {}", year)));
        }
    }

    let store = state
        .store
        .lock()
        .map_err(|_| anyhow::anyhow!("service store lock poisoned"))?;
    let services = store.get_services(&filter)?;
    Ok(Json(services))
}

fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/import/:format", post(run_import))
        .route("/services", get(list_services))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_archive=info,archive_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = ImportConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let db_path = args.db.unwrap_or_else(|| config.database_path.clone());
    let store = SqliteStore::open(&db_path)?;
    info!("Database opened: {}", db_path.display());

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        executor: Arc::new(ImportExecutor::from_config(&config)),
        config: Arc::new(config),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server running on http://{}", addr);
    info!("Import: POST http://{}/api/import/{{tab|space|rows}}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("Server error")?;

    Ok(())
}
