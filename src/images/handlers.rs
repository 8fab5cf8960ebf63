use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use super::services::{upload_image, ImageUpload, UploadResult};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

const IMAGE_FIELD: &str = "image";
/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn upload_routes(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(max_bytes + MULTIPART_OVERHEAD))
}

/// POST /upload (multipart, field `image`)
#[instrument(skip(state, mp))]
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<UploadResult>> {
    let mut mp = mp.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let mut image = None;
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let file_name = field.file_name().unwrap_or_default().to_string();
        let body = field.bytes().await.map_err(bad_multipart)?;
        image = Some(ImageUpload {
            body,
            content_type,
            file_name,
        });
        break;
    }

    let image = image.ok_or_else(|| AppError::InvalidInput("No file uploaded.".into()))?;
    let result = upload_image(state.storage.as_ref(), &state.config.upload, image).await?;
    Ok(Json(result))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    warn!(error = %e, "malformed multipart upload");
    AppError::InvalidInput(format!("Invalid upload: {}", e.body_text()))
}
