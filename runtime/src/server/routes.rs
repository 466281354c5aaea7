//! Request handlers.

use super::error::ApiError;
use super::AppState;
use crate::domain::{MetricRow, RunKind, TickerSymbol};
use crate::storage::ticker_registry::DEFAULT_GROUP;
use crate::storage::Freshness;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "CAGR analyst estimates API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "data": "/data",
            "data_by_ticker": "/data/{ticker}",
            "freshness": "/freshness",
            "statistics": "/statistics",
            "tickers": "/tickers",
            "scheduled_tickers": "/tickers/scheduled",
            "ticker_management": "/tickers/manage",
            "manual_scrape": "/scrape/manual",
            "scrape_status": "/scrape/status",
            "scrape_cancel": "/scrape/cancel",
        },
    }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    match health_snapshot(&state) {
        Ok(body) => Json(body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "unhealthy", "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}

fn health_snapshot(state: &AppState) -> anyhow::Result<Value> {
    let freshness = state.store.freshness()?;
    let all = state.registry.all()?;
    let scheduled = all.iter().filter(|t| t.is_scheduled).count();
    Ok(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "data": {
            "available": freshness.has_data,
            "total_tickers": freshness.ticker_count,
            "last_update": freshness.latest_update,
            "is_fresh": freshness.is_fresh,
        },
        "ticker_management": {
            "scheduled_tickers": scheduled,
            "total_tickers": all.len(),
        },
        "scrape_running": state.runner.is_running(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    search: Option<String>,
}

pub async fn all_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Value>, ApiError> {
    let data = match query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(q) => state.store.search(q)?,
        None => state.store.get_all()?,
    };
    Ok(Json(json!({
        "success": true,
        "total_tickers": data.len(),
        "data": data,
        "timestamp": Utc::now(),
    })))
}

pub async fn ticker_data(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ticker = TickerSymbol::parse(&raw)?;
    let record = state
        .store
        .get(&ticker)?
        .ok_or_else(|| ApiError::NotFound(format!("no data for ticker {ticker}")))?;
    Ok(Json(json!({ "success": true, "data": record })))
}

pub async fn freshness(State(state): State<AppState>) -> Result<Json<Freshness>, ApiError> {
    Ok(Json(state.store.freshness()?))
}

pub async fn statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.store.statistics()?;
    let last_run = state.store.latest_run()?;
    Ok(Json(json!({
        "success": true,
        "statistics": stats,
        "last_run": last_run,
    })))
}

pub async fn list_tickers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tickers = state.registry.all()?;
    Ok(Json(json!({
        "success": true,
        "count": tickers.len(),
        "tickers": tickers,
    })))
}

pub async fn scheduled_tickers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tickers = state.registry.scheduled()?;
    Ok(Json(json!({
        "success": true,
        "count": tickers.len(),
        "tickers": tickers,
    })))
}

fn default_scheduled() -> bool {
    true
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

#[derive(Debug, Deserialize)]
pub struct TickerRequest {
    ticker: String,
    #[serde(default = "default_scheduled")]
    is_scheduled: bool,
    #[serde(default = "default_group")]
    group_name: String,
}

pub async fn add_ticker(
    State(state): State<AppState>,
    Json(req): Json<TickerRequest>,
) -> Result<Response, ApiError> {
    let ticker = TickerSymbol::parse(&req.ticker)?;
    let created = state
        .registry
        .add(&ticker, req.is_scheduled, Some(&req.group_name))?;
    info!(%ticker, created, scheduled = req.is_scheduled, "ticker registered");

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = json!({
        "success": true,
        "ticker": ticker,
        "created": created,
        "is_scheduled": req.is_scheduled,
        "group": req.group_name,
    });
    Ok((status, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TickerListRequest {
    tickers: Vec<String>,
    #[serde(default = "default_scheduled")]
    is_scheduled: bool,
    #[serde(default = "default_group")]
    group_name: String,
}

/// Registers every valid symbol; invalid ones are reported, not fatal.
pub async fn add_tickers(
    State(state): State<AppState>,
    Json(req): Json<TickerListRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut results = Vec::with_capacity(req.tickers.len());
    let mut ok = 0;
    for raw in &req.tickers {
        match TickerSymbol::parse(raw) {
            Ok(ticker) => {
                let created = state
                    .registry
                    .add(&ticker, req.is_scheduled, Some(&req.group_name))?;
                ok += 1;
                results.push(json!({ "ticker": ticker, "success": true, "created": created }));
            }
            Err(e) => {
                results.push(json!({ "ticker": raw, "success": false, "error": e.to_string() }))
            }
        }
    }
    Ok(Json(json!({
        "success": true,
        "processed": req.tickers.len(),
        "successful": ok,
        "results": results,
    })))
}

pub async fn remove_ticker(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ticker = TickerSymbol::parse(&raw)?;
    if !state.registry.remove(&ticker)? {
        return Err(ApiError::NotFound(format!("ticker {ticker} is not registered")));
    }
    info!(%ticker, "ticker removed");
    Ok(Json(json!({ "success": true, "ticker": ticker })))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    is_scheduled: bool,
}

pub async fn set_schedule(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<Value>, ApiError> {
    let ticker = TickerSymbol::parse(&raw)?;
    if !state.registry.set_scheduled(&ticker, req.is_scheduled)? {
        return Err(ApiError::NotFound(format!("ticker {ticker} is not registered")));
    }
    Ok(Json(json!({
        "success": true,
        "ticker": ticker,
        "is_scheduled": req.is_scheduled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ManualScrapeRequest {
    tickers: Vec<String>,
    #[serde(default)]
    row_type: Option<String>,
    #[serde(default)]
    wait_for_completion: bool,
}

pub async fn manual_scrape(
    State(state): State<AppState>,
    Json(req): Json<ManualScrapeRequest>,
) -> Result<Response, ApiError> {
    let tickers = req
        .tickers
        .iter()
        .map(|raw| TickerSymbol::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    if tickers.is_empty() {
        return Err(ApiError::BadRequest("no tickers given".to_string()));
    }
    let row = req
        .row_type
        .as_deref()
        .map(MetricRow::from_name_lossy)
        .unwrap_or(state.default_row);
    info!(tickers = tickers.len(), %row, wait = req.wait_for_completion, "manual scrape requested");

    if req.wait_for_completion {
        let summary = state
            .runner
            .run(tickers.clone(), row, RunKind::Manual, true)
            .await?;
        let body = json!({
            "success": true,
            "run_id": summary.run_id,
            "status": summary.status,
            "requested_tickers": tickers,
            "successful_count": summary.successful_count,
            "failed_count": summary.failed_count,
            "results": summary.results,
        });
        return Ok(Json(body).into_response());
    }

    let run_id = state.runner.start(tickers.clone(), row, RunKind::Manual)?;
    let body = json!({
        "success": true,
        "run_id": run_id,
        "status": "started",
        "requested_tickers": tickers,
    });
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

pub async fn cancel_scrape(State(state): State<AppState>) -> Json<Value> {
    let cancelled = state.runner.cancel();
    Json(json!({ "success": true, "cancelled": cancelled }))
}

pub async fn scrape_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "scrape": state.runner.status() }))
}
