pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod signing;
pub mod state;
pub mod storage;
pub mod utils;

use std::{sync::Arc, time::Duration};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    notify::{Dispatcher, LogNotifier, Notifier, SendGridNotifier},
    state::AppState,
    storage::S3Storage,
};

/// Email dispatcher for the configured provider.
pub fn build_dispatcher(config: &AppConfig) -> Dispatcher {
    let notifier: Arc<dyn Notifier> = match &config.sendgrid_api_key {
        Some(key) => Arc::new(SendGridNotifier::new(
            key.clone(),
            config.sendgrid_from_email.clone(),
        )),
        None => {
            tracing::warn!("SENDGRID_API_KEY not set; emails will only be logged");
            Arc::new(LogNotifier)
        }
    };
    Dispatcher::new(notifier, Duration::from_secs(config.notify_timeout_seconds))
}

/// Wires the pool, storage, notifications and token service into the shared state.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    if applied > 0 {
        tracing::info!(applied, "database migrations applied");
    }

    let s3_client = s3::build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(
        s3_client,
        config.spaces_bucket.clone(),
        s3::public_base_url(&config),
    ));
    let jwt = JwtService::from_config(&config)?;
    let notifications = build_dispatcher(&config);

    Ok(AppState::new(pool, config, storage, notifications, jwt))
}
