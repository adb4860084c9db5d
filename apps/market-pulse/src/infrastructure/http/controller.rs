//! HTTP Controller (Driver Adapter)
//!
//! Axum routes over [`MarketDataEngine`]. Handlers only translate between
//! HTTP and engine calls; authorization happens inside the engine.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::application::services::{MarketDataEngine, StreamEvent};
use crate::domain::alert::{AlertId, AlertRule};
use crate::domain::quote::Snapshot;

use super::request::{CreateAlertRequest, TickersQuery, TickersRequest, TokenQuery};
use super::response::{ApiError, TickersResponse};

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared handler state.
pub type ApiState = Arc<MarketDataEngine>;

/// Build the client API router.
pub fn create_router(engine: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/subscriptions",
            post(subscribe_handler).delete(unsubscribe_handler),
        )
        .route("/v1/subscriptions/all", delete(unsubscribe_all_handler))
        .route("/v1/snapshot", get(snapshot_handler))
        .route("/v1/stream", get(stream_handler))
        .route("/v1/alerts", post(create_alert_handler).get(list_alerts_handler))
        .route("/v1/alerts/{id}", delete(delete_alert_handler))
        .with_state(engine)
}

// =============================================================================
// Token extraction
// =============================================================================

/// Caller token from `Authorization: Bearer ...` or `?token=...`.
#[derive(Debug, Clone, Default)]
pub struct ClientToken(pub Option<String>);

impl ClientToken {
    fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientToken {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);

        if bearer.is_some() {
            return Ok(Self(bearer));
        }

        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q.token)
            .unwrap_or_default();
        Ok(Self(query))
    }
}

/// Token from `Bearer <token>`. The scheme name is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// =============================================================================
// Handlers
// =============================================================================

async fn subscribe_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    payload: Result<Json<TickersRequest>, JsonRejection>,
) -> Result<Json<TickersResponse>, ApiError> {
    let request = body(payload)?;
    let tickers = engine.subscribe(token.as_deref(), &request.tickers).await?;
    Ok(Json(TickersResponse { tickers }))
}

async fn unsubscribe_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    payload: Result<Json<TickersRequest>, JsonRejection>,
) -> Result<Json<TickersResponse>, ApiError> {
    let request = body(payload)?;
    let tickers = engine
        .unsubscribe(token.as_deref(), &request.tickers)
        .await?;
    Ok(Json(TickersResponse { tickers }))
}

async fn unsubscribe_all_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
) -> Result<StatusCode, ApiError> {
    engine.unsubscribe_all(token.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn snapshot_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    Query(query): Query<TickersQuery>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = engine.get_snapshot(token.as_deref(), &query.split()).await?;
    Ok(Json(snapshot))
}

async fn stream_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    Query(query): Query<TickersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = engine.open_stream(token.as_deref(), &query.split()).await?;

    let sse_events = events.map(|event| match event {
        StreamEvent::Quotes(snapshot) => Event::default().event("quotes").json_data(snapshot),
        StreamEvent::Expired => Ok(Event::default().event("expired").data("token expired")),
    });

    Ok(Sse::new(sse_events).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

async fn create_alert_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    payload: Result<Json<CreateAlertRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AlertRule>), ApiError> {
    let request = body(payload)?;
    let rule = engine
        .create_alert(
            token.as_deref(),
            &request.ticker,
            request.target_price,
            request.condition,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_alerts_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
) -> Result<Json<Vec<AlertRule>>, ApiError> {
    Ok(Json(engine.list_alerts(token.as_deref()).await?))
}

async fn delete_alert_handler(
    State(engine): State<ApiState>,
    token: ClientToken,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&id)
        .map(AlertId::from_uuid)
        .map_err(|_| ApiError::BadRequest(format!("invalid alert id: {id}")))?;
    engine.delete_alert(token.as_deref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tests
// =============================================================================
