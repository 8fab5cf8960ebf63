use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, email_verified, verification_code, \
                            verification_sent_at, verification_attempts, created_at";

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Inserts the user; `None` when the email is already taken.
    async fn create(&self, new: NewUser) -> anyhow::Result<Option<User>>;
    /// Clears the code and stamps the verification time, only if `code` is still the stored one.
    async fn consume_verification_code(&self, id: Uuid, code: i32) -> anyhow::Result<bool>;
    /// Counts one verification attempt against a pending code, only while
    /// fewer than `max_attempts` have been made. `false` means locked.
    async fn reserve_verification_attempt(&self, id: Uuid, max_attempts: i32) -> anyhow::Result<bool>;
    /// Stores a fresh code and resets the attempt counter.
    async fn replace_verification_code(
        &self,
        id: Uuid,
        code: i32,
        sent_at: OffsetDateTime,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, verification_code, verification_sent_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.verification_code)
        .bind(new.verification_sent_at)
        .fetch_optional(&self.db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn consume_verification_code(&self, id: Uuid, code: i32) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET email_verified = now(),
                   verification_code = NULL,
                   verification_attempts = 0
             WHERE id = $1 AND verification_code = $2
            "#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.db)
        .await
        .context("consume verification code")?;
        Ok(res.rows_affected() == 1)
    }

    async fn reserve_verification_attempt(&self, id: Uuid, max_attempts: i32) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET verification_attempts = verification_attempts + 1
             WHERE id = $1
               AND verification_code IS NOT NULL
               AND verification_attempts < $2
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .execute(&self.db)
        .await
        .context("reserve verification attempt")?;
        Ok(res.rows_affected() == 1)
    }

    async fn replace_verification_code(
        &self,
        id: Uuid,
        code: i32,
        sent_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET verification_code = $2,
                   verification_sent_at = $3,
                   verification_attempts = 0
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(sent_at)
        .execute(&self.db)
        .await
        .context("replace verification code")?;
        Ok(())
    }
}
