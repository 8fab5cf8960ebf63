use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::{
        jwt::JwtKeys,
        repo::{PgUserRepo, UserRepo},
    },
    config::AppConfig,
    events::repo::{EventRepo, PgEventRepo},
    mailer::{self, Mailer},
    storage::{Storage, StorageClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: JwtKeys,
    pub users: Arc<dyn UserRepo>,
    pub events: Arc<dyn EventRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let mailer: Arc<dyn Mailer> = Arc::from(mailer::from_config(&config.mail)?);

        Ok(Self {
            tokens: JwtKeys::new(&config.jwt),
            users: Arc::new(PgUserRepo::new(db.clone())),
            events: Arc::new(PgEventRepo::new(db)),
            storage,
            mailer,
            config: Arc::new(config),
        })
    }
}
