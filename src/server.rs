//!
//! opensight HTTP server
//! ---------------------
//! This module defines the Axum-based HTTP API over the snapshot cache and
//! wires the request-time guards in front of it.
//!
//! Responsibilities:
//! - Assembling the application state: path mapper (static + discovered
//!   shares), probes, aggregator, cache and guards.
//! - Query endpoints for file users, active files and per-user files.
//! - Force-refresh, health and diagnostic endpoints.
//! - Guard middleware applied in fixed order (allow-list, API key, rate
//!   limit), with the health check exempt.
//! - Binding the listener and running with graceful shutdown.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::cache::SnapshotCache;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::guards::{ApiKeyGuard, IpAllowList, RateDecision, RateLimiter};
use crate::pathmap::{is_network_path, PathMapper};
use crate::probes::handle::DeepHandleProbe;
use crate::probes::local::LocalOpenProbe;
use crate::probes::resolve::HostnameResolver;
use crate::probes::smb::SmbShareProbe;
use crate::probes::{shares, FileProbe};
use crate::refresh;

const SERVICE_NAME: &str = "opensight";
/// How long shutdown waits for an in-flight refresh cycle.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Entry cap for the diagnostic dump.
const DEBUG_DUMP_LIMIT: usize = 50;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub mapper: Arc<PathMapper>,
    pub aggregator: Arc<Aggregator>,
    pub cache: Arc<SnapshotCache>,
    pub allow_list: Arc<IpAllowList>,
    pub api_key: Arc<ApiKeyGuard>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Assemble state from explicit parts. Tests use this with canned probes
/// and share lists; production goes through [`build_state`].
pub fn build_state_with(
    config: AppConfig,
    probes: Vec<Box<dyn FileProbe>>,
    discovered_shares: Vec<(String, String)>,
) -> AppState {
    let mut mapper = PathMapper::new(
        config.server_name(),
        config
            .share_mappings
            .iter()
            .map(|m| (m.share_name.clone(), m.local_path.clone())),
    );
    mapper.add_discovered(discovered_shares);
    let allow_list = IpAllowList::from_config(&config.security.allowed_networks);
    let api_key = ApiKeyGuard::new(config.security.api_key.clone());
    let rate_limiter = RateLimiter::new(
        config.security.rate_limit.max_requests,
        Duration::from_secs(config.security.rate_limit.window_seconds.max(1)),
    );
    let cache = SnapshotCache::new(config.cache_ttl());
    AppState {
        mapper: Arc::new(mapper),
        aggregator: Arc::new(Aggregator::new(probes)),
        cache: Arc::new(cache),
        allow_list: Arc::new(allow_list),
        api_key: Arc::new(api_key),
        rate_limiter: Arc::new(rate_limiter),
        config: Arc::new(config),
    }
}

/// Build production state: discover shares and stand up the real probes.
/// The deep-handle probe joins only when its backing tool is installed.
pub async fn build_state(config: AppConfig) -> AppState {
    let discovered = shares::discover_share_mappings().await;
    let resolver = Arc::new(HostnameResolver::new());
    let mut probes: Vec<Box<dyn FileProbe>> = vec![
        Box::new(SmbShareProbe::new(resolver)),
        Box::new(LocalOpenProbe::new()),
    ];
    match DeepHandleProbe::locate() {
        Some(probe) => probes.push(Box::new(probe)),
        None => info!(target: "opensight::server", "deep-handle probe disabled: no handle.exe found"),
    }
    build_state_with(config, probes, discovered)
}

/// Mount all routes and the guard middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/files/users", get(get_file_users))
        .route("/files/active", get(get_active_files))
        .route("/files/user/{userName}", get(get_user_files))
        .route("/files/refresh", post(refresh_now))
        .route("/files/health", get(health_check))
        .route("/files/debug", get(debug_dump))
        .route("/files/convert-path", get(convert_path))
        .layer(middleware::from_fn_with_state(state.clone(), guard_layer))
        .with_state(state)
}

/// Run the service until shutdown: start the refresh loop, serve HTTP, and
/// give the in-flight cycle a bounded grace period on the way out.
pub async fn run_with_config(config: AppConfig) -> anyhow::Result<()> {
    let state = build_state(config).await;
    info!(
        target: "opensight::server",
        "starting: port={}, refresh={}s, ttl={}min, share_mappings={}, probes={}",
        state.config.http_port,
        state.config.refresh_interval_seconds,
        state.config.cache_expiration_minutes,
        state.mapper.mapping_count(),
        state.aggregator.probe_count()
    );

    let refresh_loop = refresh::start(
        state.aggregator.clone(),
        state.cache.clone(),
        state.config.refresh_interval(),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", state.config.http_port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind listening port {}", addr))?;
    info!(target: "opensight::server", "listening on {}", addr);

    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    refresh_loop.stop(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!(target: "opensight::server", "failed to listen for shutdown signal");
        return;
    }
    info!(target: "opensight::server", "shutdown signal received");
}

/// Guards in fixed order: allow-list, API key, rate limit. The health
/// check bypasses all of them.
async fn guard_layer(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/files/health" {
        return next.run(req).await;
    }
    let client = addr.ip();
    if !state.allow_list.allows(client) {
        warn!(target: "opensight::guards", "blocked request from {}", client);
        return ApiError::forbidden("Your IP is not in the allowed list").into_response();
    }
    if state.api_key.enabled() {
        let provided = req
            .headers()
            .get(ApiKeyGuard::HEADER)
            .and_then(|v| v.to_str().ok());
        if provided.is_none() {
            warn!(target: "opensight::guards", "API request without key from {}", client);
            return ApiError::unauthorized("API key required: provide the X-API-Key header").into_response();
        }
        if !state.api_key.accepts(provided) {
            warn!(target: "opensight::guards", "invalid API key from {}", client);
            return ApiError::unauthorized("Invalid API key").into_response();
        }
    }
    if let RateDecision::Limited { retry_after_secs } = state.rate_limiter.check(client) {
        return ApiError::rate_limited(
            format!(
                "Rate limit: {} requests per {}s",
                state.rate_limiter.max_requests(),
                state.rate_limiter.window().as_secs()
            ),
            retry_after_secs,
        )
        .into_response();
    }
    next.run(req).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePathQuery {
    #[serde(default)]
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct ConvertQuery {
    #[serde(default)]
    path: String,
}

/// GET /files/users?filePath=... — who has this file open right now.
async fn get_file_users(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let file_path = query.file_path.trim();
    if file_path.is_empty() {
        return Err(ApiError::bad_request("filePath query parameter must not be empty"));
    }
    info!(target: "opensight::server", "file users requested: {}", file_path);
    match state.cache.users_of(&state.mapper, file_path) {
        Some(result) => Ok(Json(result)),
        None => Err(ApiError::not_found(
            "File is not open or not found",
            Some(file_path.to_string()),
        )),
    }
}

/// GET /files/active — all open files, busiest first.
async fn get_active_files(State(state): State<AppState>) -> impl IntoResponse {
    let files = state.cache.active_files(&state.mapper);
    Json(json!({ "count": files.len(), "files": files }))
}

/// GET /files/user/{userName} — everything one user has open.
async fn get_user_files(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_name = user_name.trim().to_string();
    if user_name.is_empty() {
        return Err(ApiError::bad_request("userName must not be empty"));
    }
    info!(target: "opensight::server", "user files requested: {}", user_name);
    let files = state.cache.files_of_user(&user_name);
    Ok(Json(json!({ "userName": user_name, "count": files.len(), "files": files })))
}

/// POST /files/refresh — run an immediate discovery cycle and install the
/// result. The one query-path endpoint allowed to surface a 500.
async fn refresh_now(State(state): State<AppState>) -> Response {
    info!(target: "opensight::server", "forced cache refresh requested");
    let cycle = async {
        let snapshot = state.aggregator.collect().await;
        let count = snapshot.records.len();
        state.cache.replace(snapshot);
        count
    };
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({
                "message": "Cache refreshed",
                "filesCount": count,
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "panic"
            };
            error!(target: "opensight::server", "forced refresh failed: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Cache refresh failed", "error": msg })),
            )
                .into_response()
        }
    }
}

/// GET /files/health — always guard-exempt.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now(),
    }))
}

/// GET /files/debug — diagnostic dump of up to 50 cached entries plus
/// their network-path translation.
async fn debug_dump(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = match state.cache.current() {
        Some(s) => s,
        None => {
            return Json(json!({
                "cached": false,
                "message": "no snapshot cached (never refreshed, cleared, or expired)",
            }))
        }
    };
    let entries: Vec<serde_json::Value> = snapshot
        .records
        .iter()
        .take(DEBUG_DUMP_LIMIT)
        .map(|r| {
            json!({
                "filePath": r.file_path,
                "userName": r.user_name,
                "clientName": r.client_name,
                "accessMode": r.access_mode,
                "openedAt": r.opened_at,
                "networkPath": state.mapper.to_network(&r.file_path),
            })
        })
        .collect();
    Json(json!({
        "cached": true,
        "capturedAt": snapshot.captured_at,
        "count": snapshot.records.len(),
        "shown": entries.len(),
        "entries": entries,
    }))
}

/// GET /files/convert-path?path=... — path-mapping diagnostics.
async fn convert_path(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = query.path.trim();
    if path.is_empty() {
        return Err(ApiError::bad_request("path query parameter must not be empty"));
    }
    Ok(Json(json!({
        "original": path,
        "variants": state.mapper.all_variants(path),
        "isUnc": is_network_path(path),
        "toLocal": state.mapper.to_local(path),
        "toUnc": state.mapper.to_network(path),
    })))
}
