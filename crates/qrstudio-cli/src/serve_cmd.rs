//! `qrstudio serve`: short-link redirects and a small read-only JSON API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use qrstudio_core::PlanTier;
use qrstudio_core::codes::{self, CodeRepository};
use qrstudio_core::plan::{self, Feature, PlanLimits};

type Repo = Arc<dyn CodeRepository>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub plan: PlanTier,
    pub limits: PlanLimits,
    pub features: Vec<Feature>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(repo: Repo) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/plans", get(list_plans))
        .route("/api/codes/{user_id}", get(list_codes))
        .route("/r/{user_id}/{short_code}", get(redirect))
        .layer(CorsLayer::permissive())
        .with_state(repo)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(repo: Repo, bind: &str, port: u16) -> Result<()> {
    let backend = repo.name().to_string();
    let app = build_router(repo);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!(backend = %backend, "qrstudio serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("qrstudio serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index() -> Html<String> {
    let rows = PlanTier::ALL
        .iter()
        .map(|tier| {
            let limits = plan::limits_for(*tier);
            format!(
                "<tr><td>{tier}</td><td>{dynamic}</td><td>{storage}</td></tr>",
                dynamic = limits.max_dynamic_codes,
                storage = limits.max_storage_mb,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Html(format!(
        "<!DOCTYPE html>\
<html><head><title>qrstudio</title></head><body>\
<h1>qrstudio</h1>\
<p><a href=\"/api/plans\">/api/plans</a></p>\
<table><tr><th>Plan</th><th>Dynamic codes</th><th>Storage (MB)</th></tr>{rows}</table>\
</body></html>"
    ))
}

async fn list_plans() -> Json<Vec<PlanResponse>> {
    Json(
        PlanTier::ALL
            .into_iter()
            .map(|tier| PlanResponse {
                plan: tier,
                limits: plan::limits_for(tier),
                features: plan::features(tier),
            })
            .collect(),
    )
}

async fn list_codes(
    State(repo): State<Repo>,
    Path(user_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let list = repo
        .list_for_user(user_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(list).into_response())
}

async fn redirect(
    State(repo): State<Repo>,
    Path((user_id, short_code)): Path<(Uuid, String)>,
) -> Result<axum::response::Response, AppError> {
    let resolved = codes::record_scan(repo.as_ref(), user_id, &short_code)
        .await
        .map_err(AppError::internal)?;
    match resolved {
        Some(target) => {
            tracing::info!(
                user_id = %user_id,
                short_code = %short_code,
                scans = ?target.scan_count,
                "redirecting"
            );
            Ok(Redirect::temporary(&target.destination_url).into_response())
        }
        None => Err(AppError::not_found(format!(
            "short link {short_code} not found"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
