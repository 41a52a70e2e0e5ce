use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::Config;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, 10).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects with the configured pool size and applies pending migrations
    /// when `RUN_MIGRATIONS` is enabled.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = Self::connect(&config.database_url, config.db_max_connections).await?;
        if config.run_migrations {
            db.migrate().await?;
        }
        Ok(db)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}
