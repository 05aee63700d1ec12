use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::skills::{
    memory::InMemorySkillCatalog,
    repo::{PgSkillCatalogRepository, SkillCatalogRepository},
    services::SkillSynchronizer,
};
use crate::users::{
    memory::InMemoryUserRepository,
    repo::{PgUserRepository, UserRepository},
    services::AccountService,
};

#[derive(Clone)]
pub struct AppState {
    /// `None` when running on the in-memory store.
    pub db: Option<PgPool>,
    pub config: Arc<AppConfig>,
    pub accounts: AccountService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let Some(url) = config.database_url.clone() else {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            return Ok(Self::in_memory(config));
        };

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserRepository::new(db.clone())) as Arc<dyn UserRepository>;
        let catalog =
            Arc::new(PgSkillCatalogRepository::new(db.clone())) as Arc<dyn SkillCatalogRepository>;
        Ok(Self::from_parts(Some(db), config, users, catalog))
    }

    pub fn from_parts(
        db: Option<PgPool>,
        config: Arc<AppConfig>,
        users: Arc<dyn UserRepository>,
        catalog: Arc<dyn SkillCatalogRepository>,
    ) -> Self {
        let skills = SkillSynchronizer::new(catalog, config.skill_sync_timeout());
        let accounts = AccountService::new(users, skills, config.credentials.clone());
        Self {
            db,
            config,
            accounts,
        }
    }

    fn in_memory(config: Arc<AppConfig>) -> Self {
        let users = Arc::new(InMemoryUserRepository::new()) as Arc<dyn UserRepository>;
        let catalog = Arc::new(InMemorySkillCatalog::new()) as Arc<dyn SkillCatalogRepository>;
        Self::from_parts(None, config, users, catalog)
    }

    pub fn fake() -> Self {
        Self::in_memory(Arc::new(AppConfig::default()))
    }
}
