use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateEventRequest, EventListResponse, EventResponse, Pagination},
    services,
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppJson, AppResult},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/:id", get(get_event))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/:id", put(update_event).delete(delete_event))
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Event not found.".into()))
}

/// GET /events?limit=&offset=
pub async fn list_events(
    State(state): State<AppState>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> AppResult<Json<EventListResponse>> {
    let Query(page) = page.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let events = services::list(&state, page.limit, page.offset).await?;
    Ok(Json(EventListResponse { events }))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<EventResponse>> {
    let event = services::get(&state, parse_id(&id)?).await?;
    Ok(Json(EventResponse { event }))
}

#[instrument(skip(state, payload))]
pub async fn create_event(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppJson(payload): AppJson<CreateEventRequest>,
) -> AppResult<(StatusCode, Json<EventResponse>)> {
    let event = services::create(&state, user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(EventResponse { event })))
}

/// The raw body is handed on so a non-owner gets 403 whatever they sent.
#[instrument(skip(state, body))]
pub async fn update_event(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<Json<EventResponse>> {
    let body = body.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let event = services::update(&state, user_id, parse_id(&id)?, &body).await?;
    Ok(Json(EventResponse { event }))
}

#[instrument(skip(state))]
pub async fn delete_event(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    services::delete(&state, user_id, parse_id(&id)?).await?;
    Ok(Json(json!({ "message": "Event deleted successfully." })))
}
