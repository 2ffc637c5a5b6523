//! Stationwatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - STATIONWATCH_CONFIG: Path to the TOML config (default: stationwatch.toml)
//! - STATIONWATCH_HOST: Bind address (default: 0.0.0.0)
//! - STATIONWATCH_PORT: Port number (default: 8080)
//! - RUST_LOG: Log level (default: info)

use std::sync::Arc;

use stationwatch::api::{run_server, ServerConfig};
use stationwatch::clock::{Clock, SystemClock};
use stationwatch::config::{build_rule_store, config_path_from_env, load_settings};
use stationwatch::notify::{
    Dispatcher, LogTransport, NotifierState, NotifyEngine, NotifyService, PushoverTransport,
    ThrottleController, Transport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stationwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path_from_env();
    let settings = load_settings(&config_path)?;

    if !settings.enable {
        tracing::info!("Notifications are disabled; nothing to monitor");
        return Ok(());
    }

    let rules = build_rule_store(&settings)?;
    if rules.is_empty() {
        tracing::warn!("No rules configured; readings will be accepted but never alert");
    }

    let notifier_settings = &settings.notifier;
    let client_error_log_frequency = notifier_settings.client_error_log_frequency()?;

    let transport: Arc<dyn Transport> = match (
        notifier_settings.send,
        &notifier_settings.app_token,
        &notifier_settings.user_key,
    ) {
        (true, Some(app_token), Some(user_key)) => Arc::new(PushoverTransport::new(
            &notifier_settings.server,
            &notifier_settings.api,
            app_token.as_str(),
            user_key.as_str(),
            notifier_settings.send_timeout(),
        )?),
        _ => Arc::new(LogTransport),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier = NotifierState::shared(settings.enable);

    let dispatcher = Dispatcher::new(transport, Arc::clone(&notifier), Arc::clone(&clock))
        .with_send_timeout(notifier_settings.send_timeout())
        .with_client_error_log_frequency(client_error_log_frequency)
        .with_server_error_wait_period(notifier_settings.server_error_wait_period()?)
        .with_log_notifications(notifier_settings.log);

    let engine = Arc::new(NotifyEngine::new(
        rules,
        notifier,
        ThrottleController::new(client_error_log_frequency),
        clock,
    ));

    let rule_count = engine.store().len();
    let (service, worker) =
        NotifyService::start(engine, dispatcher, notifier_settings.queue_capacity);

    let config = ServerConfig::from_env();

    tracing::info!("Stationwatch configuration:");
    tracing::info!("  Config file: {}", config_path.display());
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Rules: {}", rule_count);
    if notifier_settings.send {
        tracing::info!(
            "  Endpoint: https://{}{}",
            notifier_settings.server,
            notifier_settings.api
        );
    } else {
        tracing::info!("  Endpoint: disabled (notifications are logged only)");
    }
    tracing::info!(
        "  Server error wait period: {} seconds",
        notifier_settings.server_error_wait_period
    );
    tracing::info!(
        "  Client error log frequency: {} seconds",
        notifier_settings.client_error_log_frequency
    );

    run_server(config, service, worker).await
}
