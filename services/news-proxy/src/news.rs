//! News endpoints
//!
//! Each endpoint turns its filters into query parameters for the upstream
//! `/news` endpoint and issues the call through the key rotation driver,
//! which injects the API key as a query parameter. The upstream `results`
//! array is returned as-is.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use key_pool::RetryDriver;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::error::ApiError;
use crate::metrics::{ServiceMetrics, record_request};

/// Shared state for the news handlers.
#[derive(Clone)]
pub struct NewsState {
    pub client: reqwest::Client,
    pub driver: RetryDriver,
    pub base_url: String,
    pub key_param: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub metrics: ServiceMetrics,
}

/// Filters accepted by every news endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct NewsFilters {
    pub q: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub timeframe: Option<String>,
    /// Accepted for client compatibility; sentiment filtering is a paid
    /// upstream feature and is not forwarded.
    #[allow(dead_code)]
    pub sentiment: Option<String>,
}

pub fn build_news_router(state: NewsState) -> Router {
    Router::new()
        .route("/api/news/search", get(search))
        .route("/api/news/category/{category}", get(category))
        .route("/api/news/top-headlines", get(top_headlines))
        .with_state(state)
}

/// GET /api/news/search?q=...: free-text search, `q` required.
async fn search(State(state): State<NewsState>, Query(filters): Query<NewsFilters>) -> Response {
    let request_id = new_request_id();
    let query = filters
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let Some(query) = query else {
        record_request("search", 400, 0.0);
        return ApiError::BadRequest("Search query is required".into())
            .into_response_with_id(&request_id);
    };

    let mut params = vec![("q", query.to_string())];
    params.extend(filter_params(&filters, Utc::now()));
    respond(&state, "search", params, request_id).await
}

/// GET /api/news/category/{category}
async fn category(
    State(state): State<NewsState>,
    Path(category): Path<String>,
    Query(filters): Query<NewsFilters>,
) -> Response {
    let mut params = vec![("category", category.to_lowercase())];
    params.extend(filter_params(&filters, Utc::now()));
    respond(&state, "category", params, new_request_id()).await
}

/// GET /api/news/top-headlines
async fn top_headlines(
    State(state): State<NewsState>,
    Query(filters): Query<NewsFilters>,
) -> Response {
    let mut params = vec![("prioritydomain", "top".to_string())];
    params.extend(filter_params(&filters, Utc::now()));
    respond(&state, "top_headlines", params, new_request_id()).await
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Run the upstream call and turn the result into a response, recording
/// metrics either way.
async fn respond(
    state: &NewsState,
    endpoint: &'static str,
    params: Vec<(&'static str, String)>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    match fetch_news(state, endpoint, &params, &request_id).await {
        Ok(results) => {
            record_request(endpoint, 200, started.elapsed().as_secs_f64());
            Json(results).into_response()
        }
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            let status = e.status();
            record_request(endpoint, status.as_u16(), started.elapsed().as_secs_f64());
            e.into_response_with_id(&request_id)
        }
    }
}

/// Fetch `{base_url}/news` with rotation and return the `results` array
/// (empty when upstream omits it).
#[instrument(skip_all, fields(request_id = %request_id, endpoint = %endpoint))]
pub async fn fetch_news(
    state: &NewsState,
    endpoint: &'static str,
    params: &[(&'static str, String)],
    request_id: &str,
) -> Result<serde_json::Value, ApiError> {
    let url = format!("{}/news", state.base_url.trim_end_matches('/'));

    let response = state
        .driver
        .execute_with_rotation(
            |credential| {
                state
                    .client
                    .get(&url)
                    .query(&[(state.key_param.as_str(), credential.expose())])
                    .query(params)
                    .timeout(state.timeout)
                    .send()
            },
            state.max_attempts,
        )
        .await
        .inspect_err(|e| warn!(error = %e, "news request failed"))?;

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

    let results = match data.get("results") {
        Some(results) if results.is_array() => results.clone(),
        _ => serde_json::Value::Array(Vec::new()),
    };
    info!(
        articles = results.as_array().map(Vec::len).unwrap_or(0),
        "news request served"
    );
    Ok(results)
}

/// Upstream parameters for the shared filters. Blank values are dropped.
pub fn filter_params(filters: &NewsFilters, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(language) = non_blank(filters.language.as_deref()) {
        params.push(("language", language.to_string()));
    }
    if let Some(country) = non_blank(filters.country.as_deref()) {
        params.push(("country", country.to_string()));
    }
    if let Some(from_date) = filters
        .timeframe
        .as_deref()
        .and_then(|t| timeframe_start(t, now))
    {
        params.push(("from_date", from_date));
    }
    params
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `from_date` (UTC, `YYYY-MM-DD`) for a relative timeframe. Unknown
/// timeframes apply no date filter.
pub fn timeframe_start(timeframe: &str, now: DateTime<Utc>) -> Option<String> {
    let lookback = match timeframe {
        "24h" => chrono::Duration::hours(24),
        "7d" => chrono::Duration::days(7),
        "30d" => chrono::Duration::days(30),
        _ => return None,
    };
    Some((now - lookback).format("%Y-%m-%d").to_string())
}
