use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::events::repo_types::{Event, EventPatch, NewEvent};

const EVENT_COLUMNS: &str = "id, title, description, image_url, created_by, created_at, updated_at";

#[async_trait]
pub trait EventRepo: Send + Sync {
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Event>>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Event>>;
    async fn create(&self, new: NewEvent) -> anyhow::Result<Event>;
    async fn update(&self, id: Uuid, patch: EventPatch) -> anyhow::Result<Option<Event>>;
    /// `false` when nothing was deleted.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgEventRepo {
    db: PgPool,
}

impl PgEventRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventRepo for PgEventRepo {
    async fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
              FROM events
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list events")?;
        Ok(rows)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find event")?;
        Ok(row)
    }

    async fn create(&self, new: NewEvent) -> anyhow::Result<Event> {
        let row = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (title, description, image_url, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.image_url)
        .bind(new.created_by)
        .fetch_one(&self.db)
        .await
        .context("insert event")?;
        Ok(row)
    }

    async fn update(&self, id: Uuid, patch: EventPatch) -> anyhow::Result<Option<Event>> {
        let row = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
               SET title = COALESCE($2, title),
                   description = COALESCE($3, description),
                   image_url = COALESCE($4, image_url),
                   updated_at = now()
             WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.title)
        .bind(patch.description)
        .bind(patch.image_url)
        .fetch_optional(&self.db)
        .await
        .context("update event")?;
        Ok(row)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete event")?;
        Ok(res.rows_affected() > 0)
    }
}
