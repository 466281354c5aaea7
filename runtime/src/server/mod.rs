//! HTTP API over the store, the ticker registry and the batch runner.
//!
//! `/` and `/health` are public; everything else requires the `x-auth-token`
//! header to equal the configured token.

pub mod auth;
pub mod error;
pub mod routes;

use crate::domain::MetricRow;
use crate::live::BatchRunner;
use crate::storage::{CagrStore, TickerRegistry};
use anyhow::{Context, Result};
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CagrStore>,
    pub registry: Arc<TickerRegistry>,
    pub runner: Arc<BatchRunner>,
    pub auth_token: Arc<str>,
    /// Row used by manual scrapes that do not name one.
    pub default_row: MetricRow,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/data", get(routes::all_data))
        .route("/data/:ticker", get(routes::ticker_data))
        .route("/freshness", get(routes::freshness))
        .route("/statistics", get(routes::statistics))
        .route("/tickers", get(routes::list_tickers))
        .route("/tickers/scheduled", get(routes::scheduled_tickers))
        .route("/tickers/manage", post(routes::add_ticker))
        .route("/tickers/manage/batch", post(routes::add_tickers))
        .route(
            "/tickers/manage/:ticker",
            axum::routing::delete(routes::remove_ticker),
        )
        .route("/tickers/manage/:ticker/schedule", put(routes::set_schedule))
        .route("/scrape/manual", post(routes::manual_scrape))
        .route("/scrape/cancel", post(routes::cancel_scrape))
        .route("/scrape/status", get(routes::scrape_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
