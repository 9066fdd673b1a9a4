//! `GET /export` and `POST /import`.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::import::{self, ImportMode, ImportOptions, ImportPayload};
use crate::state::AppState;
use crate::util::dispatch_async_app_result;
use crate::{export, AppError, AppResult};

type Params = HashMap<String, String>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            warn!(target: "recordkeep", event = "request_failed", code = %self.code, error = %self);
        }
        (status, Json(self)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/export", get(export_handler))
        .route("/import", post(import_handler))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A query flag counts as set when present with any value other than `false`/`0`.
fn flag(params: &Params, name: &str) -> bool {
    match params.get(name) {
        Some(value) => {
            let value = value.trim();
            !(value.eq_ignore_ascii_case("false") || value == "0")
        }
        None => false,
    }
}

fn owner_id(params: &Params) -> Option<&str> {
    params
        .get("ownerId")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn mode(params: &Params) -> AppResult<ImportMode> {
    match params.get("mode").map(|m| m.trim()).filter(|m| !m.is_empty()) {
        Some(raw) => raw.parse(),
        None => Ok(ImportMode::default()),
    }
}

/// File name safe for a `Content-Disposition` header.
pub fn backup_file_name(owner_id: &str) -> String {
    let safe: String = owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("backup_{safe}.json")
}

async fn export_handler(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, AppError> {
    let Some(owner) = owner_id(&params) else {
        return Err(AppError::validation("TENANT_REQUIRED", "ownerId is required"));
    };
    let owner = owner.to_string();
    let pool = state.pool_clone();

    let payload =
        dispatch_async_app_result(|| async { export::export_tenant(&pool, &owner).await }).await?;

    let disposition = format!("attachment; filename=\"{}\"", backup_file_name(&owner));
    let mut response = Json(payload).into_response();
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn import_handler(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Result<Response, AppError> {
    let options = ImportOptions {
        mode: mode(&params)?,
        strict: flag(&params, "strict"),
    };
    let commit = flag(&params, "commit");
    let owner = owner_id(&params).map(str::to_string);
    if commit && owner.is_none() {
        return Err(AppError::validation(
            "TENANT_REQUIRED",
            "ownerId is required to commit an import",
        ));
    }
    let payload = ImportPayload::from_slice(&body)?;
    let pool = state.pool_clone();

    let report = match owner {
        Some(owner) if commit => {
            let _guard = state.tenant_locks.lock(&owner).await;
            info!(
                target: "recordkeep",
                event = "import_commit_start",
                tenant_id = %owner,
                mode = %options.mode,
                strict = options.strict,
                bytes = body.len()
            );
            dispatch_async_app_result(|| async {
                import::commit(&pool, &payload, &owner, &options).await
            })
            .await?
        }
        owner => {
            dispatch_async_app_result(|| async {
                import::dry_run(&pool, &payload, owner.as_deref(), &options).await
            })
            .await?
        }
    };
    Ok(Json(report).into_response())
}

/// Serve the router until ctrl-c.
pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(
        target: "recordkeep",
        event = "server_listening",
        addr = %listener.local_addr()?
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "recordkeep", event = "server_shutdown");
        })
        .await?;
    Ok(())
}
