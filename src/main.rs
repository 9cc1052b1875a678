use std::net::TcpListener;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::middleware::{from_fn, NormalizePath};
use actix_web::{web, App, HttpServer};
use dicoevent_server::handlers::{configure, route_not_found};
use dicoevent_server::logging::{init_logging, middleware::request_logger};
use dicoevent_server::reminders::spawn_scheduler;
use dicoevent_server::{AppError, AppState, AuthService, Settings};
use dotenv::dotenv;
use tracing::{error, info, warn};

/// Creates the configured superuser on first start.
async fn bootstrap_superuser(state: &AppState) -> dicoevent_server::Result<()> {
    let bootstrap = &state.config.bootstrap;
    let (Some(username), Some(password)) = (
        bootstrap.superuser_username.as_deref(),
        bootstrap.superuser_password.as_deref(),
    ) else {
        return Ok(());
    };

    let hash = AuthService::hash_password(password)?;
    if state.db.ensure_superuser(username, hash).await? {
        info!("Superuser {} created", username);
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> dicoevent_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Settings::new()?;

    // Keep the guards alive so buffered log lines are flushed on exit
    let _log_guards = init_logging(&config.logging)?;
    info!("Configuration loaded ({} environment)", config.environment);

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    state.db.run_migrations().await?;
    info!("Database migrations applied");

    bootstrap_superuser(&state).await?;

    if let Err(e) = state.storage.ensure_bucket().await {
        warn!("Object storage is not ready, poster uploads will fail: {}", e);
    }

    if config.reminders.enabled {
        let interval = Duration::from_secs(config.reminders.scan_interval_minutes.max(1) * 60);
        spawn_scheduler(state.reminders.clone(), interval);
        info!(
            "Reminder scan scheduled every {} minutes",
            config.reminders.scan_interval_minutes
        );
    }

    let state = web::Data::new(state);
    let shutdown_state = state.clone();

    // Create and bind TCP listener
    let listener = TcpListener::bind(config.server_addr())?;
    info!("Starting server at http://{}", config.server_addr());

    let server_config = config.clone();
    let result = HttpServer::new(move || {
        let cors_settings = &server_config.cors;
        let cors = if cors_settings.enabled {
            let cors_config = Cors::default();

            // Apply specific CORS rules based on configuration
            let cors_config = if cors_settings.allow_any_origin {
                cors_config
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .expose_any_header()
            } else {
                cors_config
                    .allowed_origin(&cors_settings.allowed_origin)
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
                    .allowed_headers(vec!["Authorization", "Content-Type"])
                    .supports_credentials()
            };

            cors_config.max_age(cors_settings.max_age as usize)
        } else {
            // CORS disabled - use most restrictive settings
            Cors::default()
        };

        App::new()
            .wrap(NormalizePath::trim())
            .wrap(from_fn(request_logger))
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
            .default_service(web::to(route_not_found))
    })
    .listen(listener)?
    .workers(config.server.workers.max(1) as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()));

    if let Err(e) = &result {
        error!("Server stopped with error: {}", e);
    }
    shutdown_state.shutdown().await?;
    result
}
