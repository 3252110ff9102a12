use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use trato_core::config::{AppConfig, ConfigError, LoadOptions};
use trato_core::events::{EventDispatcher, EventSink, NoopEventSink};
use trato_core::NegotiationService;
use trato_db::{connect_with_settings, migrations, DbPool, SqlNegotiationStore};

use crate::webhook::WebhookEventSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<NegotiationService<SqlNegotiationStore>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let sink: Box<dyn EventSink> = match &config.events.webhook_url {
        Some(url) => Box::new(WebhookEventSink::new(url.clone())),
        None => Box::new(NoopEventSink),
    };
    info!(
        event_name = "system.bootstrap.event_sink_wired",
        correlation_id = "bootstrap",
        transport = if config.events.webhook_url.is_some() { "webhook" } else { "noop" },
        "transcript event sink wired"
    );
    let dispatcher = EventDispatcher::spawn(sink, config.events.dispatch_config());

    let service = Arc::new(NegotiationService::new(
        SqlNegotiationStore::new(db_pool.clone()),
        dispatcher,
        config.ledger.ttl(),
    ));

    Ok(Application { config, db_pool, service })
}
