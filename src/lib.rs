pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod reminders;
pub mod storage;

use std::sync::Arc;

use actix_web::HttpResponse;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::AuthService;
pub use cache::ResponseCache;
pub use db::DbOperations;
use email::mailer_from_config;
use reminders::{ReminderQueue, ReminderService, ReminderWorker};
use storage::{MinioStorage, ObjectStorage};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: DbOperations,
    pub cache: ResponseCache,
    pub storage: Arc<dyn ObjectStorage>,
    pub auth: Arc<AuthService>,
    pub reminders: ReminderQueue,
}

impl AppState {
    /// Connects to Postgres and starts the reminder worker.
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::connect(&config.database).await?;
        info!("Database pool ready ({} max connections)", config.database.max_connections);
        Self::assemble(config, db)
    }

    /// Same as [`AppState::new`] but the pool connects on first use. Must be
    /// called inside a tokio runtime.
    pub fn new_lazy(config: Settings) -> Result<Self> {
        let db = DbOperations::connect_lazy(&config.database)?;
        Self::assemble(config, db)
    }

    fn assemble(config: Settings, db: DbOperations) -> Result<Self> {
        let cache = ResponseCache::new(&config.cache)?;
        let storage: Arc<dyn ObjectStorage> = Arc::new(MinioStorage::new(&config.storage)?);
        let auth = Arc::new(AuthService::new(&config.auth));
        let mailer = mailer_from_config(&config.email)?;

        let (reminders, receiver) = ReminderQueue::new(config.reminders.queue_capacity);
        let service = ReminderService::new(db.clone(), mailer, &config.reminders, &config.email);
        ReminderWorker::new(service, receiver).spawn();

        Ok(Self {
            config: Arc::new(config),
            db,
            cache,
            storage,
            auth,
            reminders,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        let status = self.db.get_pool_status().await;
        info!(
            "Closing database pool ({} connections, {} active)",
            status.total_connections, status.active_connections
        );
        self.db.close().await;
        Ok(())
    }
}
