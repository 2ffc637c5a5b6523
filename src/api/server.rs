use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, ingest, status, AppState};
use crate::notify::NotifyService;

pub const HOST_ENV: &str = "STATIONWATCH_HOST";
pub const PORT_ENV: &str = "STATIONWATCH_PORT";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Read host and port from the environment, keeping defaults for
    /// anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var(HOST_ENV).unwrap_or(defaults.host),
            port: std::env::var(PORT_ENV)
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest))
        .route("/status", get(status))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server until Ctrl+C, then stop the dispatch worker
pub async fn run_server(
    config: ServerConfig,
    service: NotifyService,
    worker: tokio::task::JoinHandle<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState { service });
    let app = build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting stationwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "Dispatch worker ended abnormally");
    }

    tracing::info!("stationwatch server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping dispatch worker...");
    state.service.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::dispatcher::tests::ScriptedTransport;
    use crate::notify::{
        Dispatcher, NotifierState, NotifyEngine, RuleDefinition, RuleId, RuleKind, RuleStore,
        ThrottleController,
    };
    use crate::observation::Binding;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use tower::util::ServiceExt;

    struct TestApp {
        app: Router,
        state: Arc<AppState>,
        transport: Arc<ScriptedTransport>,
    }

    fn create_test_app() -> TestApp {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let notifier = NotifierState::shared(true);
        let transport = Arc::new(ScriptedTransport::default());
        let rules = vec![
            RuleDefinition::new("outTemp", Binding::Loop, RuleKind::Max { value: 100.0 })
                .with_count(1)
                .with_wait_time(Duration::seconds(60)),
        ];
        let engine = Arc::new(NotifyEngine::new(
            RuleStore::new(rules),
            Arc::clone(&notifier),
            ThrottleController::new(Duration::seconds(3600)),
            clock.clone(),
        ));
        let dispatcher = Dispatcher::new(transport.clone(), notifier, clock);
        let (service, _handle) = NotifyService::start(engine, dispatcher, 8);

        let state = Arc::new(AppState { service });
        TestApp {
            app: build_router(Arc::clone(&state)),
            state,
            transport,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let test = create_test_app();

        let response = test
            .app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ingest_queues_dispatch() {
        let test = create_test_app();

        let response = test
            .app
            .clone()
            .oneshot(post_json(
                "/ingest",
                serde_json::json!({
                    "binding": "loop",
                    "observations": {"outTemp": 120.5, "barometer": null}
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["queued"], 1);

        for _ in 0..100 {
            if test.transport.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(test.transport.sent_count(), 1);

        // Archive batches do not touch loop rules
        let response = test
            .app
            .oneshot(post_json(
                "/ingest",
                serde_json::json!({
                    "binding": "archive",
                    "timestamp": 1_700_000_300,
                    "observations": {"outTemp": 150.0}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["queued"], 0);
    }

    #[tokio::test]
    async fn test_batch_timestamp_does_not_drive_throttling() {
        let test = create_test_app();
        let ingest_at = |timestamp: i64| {
            post_json(
                "/ingest",
                serde_json::json!({
                    "binding": "loop",
                    "timestamp": timestamp,
                    "observations": {"outTemp": 120.0}
                }),
            )
        };

        let response = test.app.clone().oneshot(ingest_at(0)).await.unwrap();
        assert_eq!(body_json(response).await["queued"], 1);

        for _ in 0..100 {
            if !test.state.service.engine().rule_state(RuleId(0)).unwrap().in_flight {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // an hour later by the station's clock, but the engine clock has not moved
        let response = test.app.clone().oneshot(ingest_at(3600)).await.unwrap();
        assert_eq!(body_json(response).await["queued"], 0);

        let response = test.app.oneshot(ingest_at(i64::MAX)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_default_bind_address() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[tokio::test]
    async fn test_ingest_rejects_unknown_binding() {
        let test = create_test_app();

        let response = test
            .app
            .oneshot(post_json(
                "/ingest",
                serde_json::json!({"binding": "hourly", "observations": {}}),
            ))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_status_reports_halt() {
        let test = create_test_app();
        test.state
            .service
            .engine()
            .notifier()
            .lock()
            .halt(test.state.service.engine().now());

        let response = test
            .app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["notifier"]["client_halted"], true);
        assert_eq!(body["rules"].as_array().unwrap().len(), 1);
        assert_eq!(body["rules"][0]["rule"]["observation"], "outTemp");
        assert_eq!(body["rules"][0]["state"]["consecutive_hits"], 0);
    }
}
