use bytes::Bytes;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use crate::{
    config::UploadConfig,
    error::{AppError, AppResult},
    storage::{StorageClient, StorageError},
};

pub struct ImageUpload {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub url: String,
    pub public_id: String,
}

/// Validates the image, then uploads it with bounded retries.
///
/// Each attempt gets `attempt_timeout`; failed attempts are retried after a
/// fixed `retry_delay` until `max_attempts` is reached. A rejected request is
/// not retried. Objects left behind by failed attempts are not cleaned up.
#[instrument(skip(storage, policy, img), fields(content_type = %img.content_type, size = img.body.len()))]
pub async fn upload_image(
    storage: &dyn StorageClient,
    policy: &UploadConfig,
    img: ImageUpload,
) -> AppResult<UploadResult> {
    validate(policy, &img)?;

    let key = object_key(OffsetDateTime::now_utc(), &img.file_name);
    let mut last_err = StorageError::Timeout;

    for attempt in 1..=policy.max_attempts {
        let put = storage.put_object(&key, img.body.clone(), &img.content_type);
        let outcome = match timeout(policy.attempt_timeout, put).await {
            Ok(res) => res,
            Err(_) => Err(StorageError::Timeout),
        };

        match outcome {
            Ok(()) => {
                info!(%key, attempt, "image uploaded");
                return Ok(UploadResult {
                    url: storage.public_url(&key),
                    public_id: key,
                });
            }
            Err(e) if !e.is_transient() => {
                warn!(%key, attempt, error = %e, "upload rejected");
                last_err = e;
                break;
            }
            Err(e) => {
                warn!(%key, attempt, error = %e, "upload attempt failed");
                last_err = e;
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.retry_delay).await;
        }
    }

    Err(if last_err.is_transient() {
        AppError::ServiceUnavailable("Image storage is temporarily unavailable.".into())
    } else {
        AppError::UploadFailed("Failed to upload image.".into())
    })
}

fn validate(policy: &UploadConfig, img: &ImageUpload) -> AppResult<()> {
    if !img.content_type.starts_with("image/") {
        return Err(AppError::InvalidInput("Only image files are allowed.".into()));
    }
    if img.body.is_empty() {
        return Err(AppError::InvalidInput("Uploaded file is empty.".into()));
    }
    if img.body.len() > policy.max_bytes {
        return Err(AppError::InvalidInput(format!(
            "File too large. Maximum size is {} bytes.",
            policy.max_bytes
        )));
    }
    Ok(())
}

/// `{unix millis}-{file name}`, with the name reduced to a safe basename.
fn object_key(now: OffsetDateTime, file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let mut safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if safe.trim_matches(['.', '-']).is_empty() {
        safe = "image".to_string();
    }
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    format!("{millis}-{safe}")
}
