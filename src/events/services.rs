use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    events::{
        dto::{CreateEventRequest, UpdateEventRequest},
        repo_types::{Event, EventPatch, NewEvent},
    },
    state::AppState,
};

const MAX_PAGE: i64 = 100;
const MAX_TITLE_CHARS: usize = 200;

fn not_found() -> AppError {
    AppError::NotFound("Event not found.".into())
}

fn clean_title(raw: &str) -> AppResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("Title is required.".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::InvalidInput(format!(
            "Title must be at most {MAX_TITLE_CHARS} characters."
        )));
    }
    Ok(title.to_string())
}

fn clean_description(raw: &str) -> AppResult<String> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(AppError::InvalidInput("Description is required.".into()));
    }
    Ok(description.to_string())
}

fn clean_image_url(raw: &str) -> AppResult<String> {
    let url = raw.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(AppError::InvalidInput("imageUrl must be an http(s) URL.".into()));
    }
    Ok(url.to_string())
}

pub async fn list(st: &AppState, limit: i64, offset: i64) -> AppResult<Vec<Event>> {
    let limit = limit.clamp(1, MAX_PAGE);
    let offset = offset.max(0);
    Ok(st.events.list(limit, offset).await?)
}

pub async fn get(st: &AppState, id: Uuid) -> AppResult<Event> {
    st.events.find(id).await?.ok_or_else(not_found)
}

#[instrument(skip(st, req))]
pub async fn create(st: &AppState, owner: Uuid, req: CreateEventRequest) -> AppResult<Event> {
    let new = NewEvent {
        title: clean_title(&req.title)?,
        description: clean_description(&req.description)?,
        image_url: clean_image_url(&req.image_url)?,
        created_by: owner,
    };
    let event = st.events.create(new).await?;
    info!(event_id = %event.id, "event created");
    Ok(event)
}

/// Loads the event and checks that `requester` owns it.
async fn owned(st: &AppState, requester: Uuid, id: Uuid) -> AppResult<Event> {
    let event = st.events.find(id).await?.ok_or_else(not_found)?;
    if !event.is_owned_by(requester) {
        warn!(event_id = %id, %requester, "mutation by non-owner");
        return Err(AppError::Forbidden(
            "You are not allowed to modify this event.".into(),
        ));
    }
    Ok(event)
}

/// Ownership is checked before the body is even parsed.
#[instrument(skip(st, body))]
pub async fn update(st: &AppState, requester: Uuid, id: Uuid, body: &[u8]) -> AppResult<Event> {
    owned(st, requester, id).await?;

    let req: UpdateEventRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid event payload: {e}")))?;
    let patch = EventPatch {
        title: req.title.as_deref().map(clean_title).transpose()?,
        description: req.description.as_deref().map(clean_description).transpose()?,
        image_url: req.image_url.as_deref().map(clean_image_url).transpose()?,
    };

    let event = st.events.update(id, patch).await?.ok_or_else(not_found)?;
    info!(event_id = %id, "event updated");
    Ok(event)
}

#[instrument(skip(st))]
pub async fn delete(st: &AppState, requester: Uuid, id: Uuid) -> AppResult<()> {
    owned(st, requester, id).await?;
    if !st.events.delete(id).await? {
        return Err(not_found());
    }
    info!(event_id = %id, "event deleted");
    Ok(())
}
