//! # mgsync: Model Garden synchronization gateway
//!
//! `mgsync` keeps a local, queryable mirror of the entities managed by Model Garden: projects,
//! use cases, budgets, models, deployments, pricing, subscriptions and limits. Downstream
//! services read the mirror instead of calling Model Garden on their hot path.
//!
//! ## Overview
//!
//! Entities reach the mirror two ways:
//!
//! - **Snapshots**: a sync cycle fetches every collection (or only records changed since a
//!   point in time) from Model Garden and upserts each record by its natural key. Cycles run
//!   on a schedule, on demand through `POST /sync/trigger`, or inline through `POST /sync/all`.
//! - **Events**: Model Garden pushes single create, update and delete events to
//!   `POST /events`. Events are deduplicated by id so redeliveries are harmless.
//!
//! Every ingested event and every cycle publishes one outcome record that observers can page
//! through with `GET /outcomes`.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer.
//! Mirrored rows, dedup markers, sync reports and outcome streams live in PostgreSQL. For local
//! runs and tests, every backend has a process-local counterpart selected by configuration.
//!
//! ### Components
//!
//! - [`sync::upstream`]: HTTP client for the Model Garden sync API, with retry
//! - [`sync::reconciler`]: upsert-by-natural-key of individual records and whole snapshots
//! - [`sync::orchestrator`]: one end-to-end cycle (fetch, reconcile, report, publish)
//! - [`sync::scheduler`]: background worker running cycles on a timer and on demand
//! - [`events`]: single CUD event ingestion with dedup
//! - [`db`]: repositories and units of work over the ten mirrored tables
//! - [`cache`]: dedup markers and persisted sync reports
//! - [`outcomes`]: append-only outcome streams
//! - [`leader_election`]: advisory-lock leadership so only one replica runs scheduled cycles
//!
//! ### Background Services
//!
//! [`Application::new`] starts the sync scheduler and, with a Postgres database and leader
//! election enabled, the leader election task. Both stop when the server shuts down.
//!
//! ## Configuration
//!
//! Configuration is loaded from a YAML file (default `config.yaml`) and can be overridden with
//! `MGSYNC_`-prefixed environment variables. See [`config::Config`].
//!
//! ## Getting Started
//!
//! ```no_run
//! use mgsync::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod leader_election;
pub mod openapi;
pub mod outcomes;
pub mod sync;
pub mod telemetry;
pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    cache::{Cache, MemoryCache, PostgresCache},
    config::{CacheBackend, DatabaseConfig},
    db::{
        in_memory::InMemoryStore,
        store::{PgStore, Store},
    },
    events::EventIngestor,
    leader_election::{SYNC_LEADER_LOCK_ID, leader_election_task},
    openapi::ApiDoc,
    outcomes::{MemoryOutcomeLog, OutcomePublisher, PostgresOutcomeLog},
    sync::{
        orchestrator::SyncOrchestrator,
        reconciler::Reconciler,
        scheduler::{SchedulerSettings, SyncScheduler, SyncTrigger},
        upstream::{FetchSnapshot, ModelGardenClient},
    },
};
pub use config::Config;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .outcomes(outcomes)
///     .ingestor(ingestor)
///     .orchestrator(orchestrator)
///     .trigger(trigger)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub outcomes: Arc<dyn OutcomePublisher>,
    pub ingestor: EventIngestor,
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Queues cycles on the background scheduler
    pub trigger: SyncTrigger,
}

/// Get the mgsync database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Storage backends selected by configuration
struct Backends {
    pool: Option<PgPool>,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    outcomes: Arc<dyn OutcomePublisher>,
}

async fn setup_backends(config: &Config) -> anyhow::Result<Backends> {
    match &config.database {
        DatabaseConfig::Postgres { url, pool: settings } => {
            info!("Using postgres database");
            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .min_connections(settings.min_connections)
                .acquire_timeout(settings.acquire_timeout)
                .idle_timeout(Some(settings.idle_timeout))
                .connect(url)
                .await?;
            migrator().run(&pool).await?;

            let cache: Arc<dyn Cache> = match config.cache.backend {
                CacheBackend::Postgres => Arc::new(PostgresCache::new(pool.clone())),
                CacheBackend::Memory => Arc::new(MemoryCache::new(config.cache.max_capacity)),
            };

            Ok(Backends {
                store: Arc::new(PgStore::new(pool.clone())),
                cache,
                outcomes: Arc::new(PostgresOutcomeLog::new(pool.clone())),
                pool: Some(pool),
            })
        }
        DatabaseConfig::Memory => {
            info!("Using in-memory database: nothing survives a restart");
            Ok(Backends {
                pool: None,
                store: Arc::new(InMemoryStore::new()),
                cache: Arc::new(MemoryCache::new(config.cache.max_capacity)),
                outcomes: Arc::new(MemoryOutcomeLog::new()),
            })
        }
    }
}

/// Build the HTTP router: the API under `/api/v1/model-garden`, plus health, docs and metrics
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/events", post(api::handlers::events::ingest_event))
        .route("/sync/all", post(api::handlers::sync::sync_all))
        .route("/sync/trigger", post(api::handlers::sync::trigger_sync))
        .route("/sync/status", get(api::handlers::sync::sync_status))
        .route("/entities/{kind}", get(api::handlers::entities::list_entities))
        .route("/outcomes", get(api::handlers::outcomes::list_outcomes))
        .route("/health", get(api::handlers::health::health))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1/model-garden", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    // Add Prometheus metrics if enabled. Counters recorded through `metrics` land in the
    // same registry.
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Container for background services and their lifecycle management.
///
/// Holds the sync scheduler and, when enabled, the leader election task. When dropped, the
/// `drop_guard` cancels the shutdown token, signaling all tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Wire the core services together and start the background tasks
fn setup_services(
    config: &Config,
    backends: &Backends,
    upstream: Arc<dyn FetchSnapshot>,
    shutdown_token: CancellationToken,
) -> (AppState, BackgroundServices) {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let reconciler = Reconciler::new(backends.store.clone());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        upstream,
        reconciler,
        backends.cache.clone(),
        backends.outcomes.clone(),
        config.sync.report_ttl,
    ));
    let ingestor = EventIngestor::new(
        backends.store.clone(),
        backends.cache.clone(),
        backends.outcomes.clone(),
        config.events.dedup_ttl,
    );

    let is_leader = Arc::new(AtomicBool::new(false));
    match (&backends.pool, config.leader_election.enabled) {
        (Some(pool), true) => {
            info!("Starting leader election");
            background_tasks.push(tokio::spawn(leader_election_task(
                pool.clone(),
                config.leader_election.clone(),
                is_leader.clone(),
                SYNC_LEADER_LOCK_ID,
                shutdown_token.clone(),
            )));
        }
        _ => {
            info!("Leader election disabled, this replica runs scheduled syncs");
            is_leader.store(true, Ordering::Relaxed);
        }
    }

    let (scheduler, trigger) = SyncScheduler::new(
        orchestrator.clone(),
        backends.cache.clone(),
        SchedulerSettings {
            enabled: config.sync.enabled,
            interval: config.sync.interval,
            incremental: config.sync.incremental,
        },
        is_leader,
    );
    background_tasks.push(tokio::spawn(scheduler.run(shutdown_token.clone())));

    let state = AppState::builder()
        .config(config.clone())
        .store(backends.store.clone())
        .outcomes(backends.outcomes.clone())
        .ingestor(ingestor)
        .orchestrator(orchestrator)
        .trigger(trigger)
        .build();

    let bg_services = BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    };

    (state, bg_services)
}

/// Main application struct that owns all resources.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations and starts
///    background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops the background services,
///    then closes the database pool
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance talking to the configured Model Garden
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let upstream = Arc::new(ModelGardenClient::new(&config.upstream)?);
        Self::with_upstream(config, upstream).await
    }

    /// Create a new application instance fetching snapshots from `upstream`
    pub async fn with_upstream(config: Config, upstream: Arc<dyn FetchSnapshot>) -> anyhow::Result<Self> {
        debug!("Starting mgsync with configuration: {:#?}", config);

        let backends = setup_backends(&config).await?;
        let shutdown_token = CancellationToken::new();
        let (state, bg_services) = setup_services(&config, &backends, upstream, shutdown_token);
        let router = build_router(state);

        Ok(Self {
            router,
            config,
            pool: backends.pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "mgsync listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Stop the scheduler (finishing any running cycle's current record) and release leadership
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CacheConfig;
    use crate::sync::upstream::{FetchError, Snapshot, StaticSnapshot};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn memory_config() -> Config {
        let mut config = Config {
            database: DatabaseConfig::Memory,
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                ..Default::default()
            },
            enable_metrics: false,
            ..Default::default()
        };
        config.sync.enabled = false;
        config.leader_election.enabled = false;
        config
    }

    fn fixture() -> Arc<dyn FetchSnapshot> {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "projects": [{"id": "p1", "project_name": "Alpha", "project_code": "PRJ-1"}],
            "use_cases": [{"id": "uc1", "project_id": "p1", "use_case_name": "chatbot"}]
        }))
        .unwrap();
        Arc::new(StaticSnapshot::new(snapshot))
    }

    struct Unreachable;

    #[async_trait]
    impl FetchSnapshot for Unreachable {
        async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<Snapshot, FetchError> {
            Err(FetchError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "maintenance".to_string(),
            })
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    async fn test_server(config: Config, upstream: Arc<dyn FetchSnapshot>) -> (axum_test::TestServer, BackgroundServices) {
        Application::with_upstream(config, upstream)
            .await
            .expect("Failed to create application")
            .into_test_server()
    }

    fn project_event(event_id: &str) -> Value {
        json!({
            "event_id": event_id,
            "event_type": "CREATE",
            "entity_type": "project",
            "entity_id": "proj-001",
            "timestamp": "2025-07-01T12:00:00Z",
            "payload": {"project_name": "Credit AI", "project_code": "CREDIT_AI"}
        })
    }

    #[tokio::test]
    async fn test_health_routes() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");

        let body: Value = server.get("/api/v1/model-garden/health").await.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "mgsync");
        assert_eq!(body["upstream"], true);

        let body: Value = test_server(memory_config(), Arc::new(Unreachable))
            .await
            .0
            .get("/api/v1/model-garden/health")
            .await
            .json();
        assert_eq!(body["upstream"], false);
    }

    #[test_log::test(tokio::test)]
    async fn test_event_is_applied_listed_and_published() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        let response = server.post("/api/v1/model-garden/events").json(&project_event("evt-1")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["outcome"], "created");
        assert_eq!(body["entity_id"], "proj-001");

        // Redelivery is acknowledged without being applied again
        let body: Value = server
            .post("/api/v1/model-garden/events")
            .json(&project_event("evt-1"))
            .await
            .json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["outcome"], "already_processed");

        let page: Value = server.get("/api/v1/model-garden/entities/project").await.json();
        assert_eq!(page["kind"], "project");
        assert_eq!(page["data"].as_array().unwrap().len(), 1);
        assert_eq!(page["data"][0]["project_code"], "CREDIT_AI");

        let outcomes: Value = server.get("/api/v1/model-garden/outcomes").await.json();
        assert_eq!(outcomes["stream"], "event_processed");
        let entries = outcomes["data"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["record"]["status"], "success");
        assert_eq!(outcomes["last_id"], entries[0]["id"]);

        let next: Value = server
            .get("/api/v1/model-garden/outcomes")
            .add_query_param("after", outcomes["last_id"].as_i64().unwrap())
            .await
            .json();
        assert!(next["data"].as_array().unwrap().is_empty());
        assert!(next.get("last_id").is_none());
    }

    #[tokio::test]
    async fn test_failed_event_is_still_acknowledged() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        let mut event = project_event("evt-1");
        event["entity_type"] = json!("widget");
        let response = server.post("/api/v1/model-garden/events").json(&event).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "error");
        assert_eq!(body["outcome"], "failed");
        assert!(body["message"].as_str().unwrap().contains("unsupported entity type: widget"));
    }

    #[tokio::test]
    async fn test_sync_all_returns_received_collections() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        let response = server.post("/api/v1/model-garden/sync/all").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["projects"].as_array().unwrap().len(), 1);
        assert_eq!(body["use_cases"][0]["use_case_name"], "chatbot");
        assert!(body["model_deployments"].as_array().unwrap().is_empty());

        let page: Value = server
            .get("/api/v1/model-garden/entities/usecase")
            .add_query_param("parent_id", "p1")
            .await
            .json();
        assert_eq!(page["data"].as_array().unwrap().len(), 1);

        let status: Value = server.get("/api/v1/model-garden/sync/status").await.json();
        assert_eq!(status["state"], "idle");
        assert_eq!(status["last_report"]["totals"]["created"], 2);

        let outcomes: Value = server
            .get("/api/v1/model-garden/outcomes")
            .add_query_param("stream", "sync_events")
            .await
            .json();
        assert_eq!(outcomes["data"][0]["record"]["event_type"], "sync_completed");
    }

    #[tokio::test]
    async fn test_sync_all_with_unreachable_upstream_is_bad_gateway() {
        let (server, _bg) = test_server(memory_config(), Arc::new(Unreachable)).await;

        let response = server
            .post("/api/v1/model-garden/sync/all")
            .json(&json!({"updated_since": "2025-07-01T00:00:00Z"}))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert!(body["message"].as_str().unwrap().starts_with("Sync failed:"));

        let status: Value = server.get("/api/v1/model-garden/sync/status").await.json();
        assert_eq!(status["last_failure"]["sync_type"], "incremental");
    }

    #[tokio::test]
    async fn test_trigger_runs_cycle_in_background() {
        let (server, bg) = test_server(memory_config(), fixture()).await;

        let response = server.post("/api/v1/model-garden/sync/trigger").await;
        response.assert_status(axum::http::StatusCode::ACCEPTED);

        let mut completed = false;
        for _ in 0..50 {
            let status: Value = server.get("/api/v1/model-garden/sync/status").await.json();
            if !status["last_report"].is_null() {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(completed, "triggered cycle did not complete");

        bg.shutdown().await;
        let response = server.post("/api/v1/model-garden/sync/trigger").await;
        response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_listing_requests() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        server
            .get("/api/v1/model-garden/entities/widget")
            .await
            .assert_status_not_found();
        server
            .get("/api/v1/model-garden/entities/project")
            .add_query_param("type", "usage")
            .await
            .assert_status_bad_request();
        server
            .get("/api/v1/model-garden/entities/budget")
            .add_query_param("type", "usage")
            .await
            .assert_status_ok();
        server
            .get("/api/v1/model-garden/outcomes")
            .add_query_param("stream", "bogus")
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        let response = server.get("/openapi.json").await;
        response.assert_status_ok();
        let doc: Value = response.json();
        assert!(doc["paths"].get("/events").is_some());
        assert!(doc["paths"].get("/sync/all").is_some());

        server.get("/docs").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_enabled() {
        let mut config = memory_config();
        config.enable_metrics = true;
        let (server, _bg) = test_server(config, fixture()).await;

        server.get("/healthz").await.assert_status_ok();
        let response = server.get("/internal/metrics").await;
        response.assert_status_ok();
        let metrics = response.text();
        assert!(metrics.contains("# HELP") || metrics.contains("# TYPE"));
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_disabled() {
        let (server, _bg) = test_server(memory_config(), fixture()).await;

        server.get("/internal/metrics").await.assert_status_not_found();
    }

    #[cfg(feature = "postgres-tests")]
    mod postgres_tests {
        use super::*;
        use sqlx::ConnectOptions;

        #[sqlx::test]
        async fn test_application_integration(pool: PgPool) {
            let mut config = memory_config();
            config.database = DatabaseConfig::Postgres {
                url: pool.connect_options().to_url_lossy().to_string(),
                pool: Default::default(),
            };
            config.cache.backend = CacheBackend::Postgres;

            let (server, _bg) = test_server(config, fixture()).await;

            server.post("/api/v1/model-garden/sync/all").await.assert_status_ok();
            let page: Value = server.get("/api/v1/model-garden/entities/project").await.json();
            assert_eq!(page["data"][0]["id"], "p1");

            let body: Value = server
                .post("/api/v1/model-garden/events")
                .json(&project_event("evt-1"))
                .await
                .json();
            assert_eq!(body["outcome"], "created");

            let outcomes: Value = server.get("/api/v1/model-garden/outcomes").await.json();
            assert_eq!(outcomes["data"].as_array().unwrap().len(), 1);
        }
    }
}
