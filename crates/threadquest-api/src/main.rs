//! Threadquest API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use sqlx::postgres::PgPoolOptions;
use threadquest_api::adapters::{OpenAiGenerator, XClient};
use threadquest_api::config::{AppConfig, SchedulerBackend};
use threadquest_api::error::AppError;
use threadquest_api::routes;
use threadquest_api::state::AppState;
use threadquest_api::telemetry::Telemetry;
use threadquest_core::clock::{Clock, SystemClock};
use threadquest_core::rng::{DeterministicRng, SystemRng};
use threadquest_core::scheduler::Scheduler;
use threadquest_core::store::QuestStore;
use threadquest_quest::application::{CollectVotesHandler, QuestEngine, RecoveryScanner};
use threadquest_quest::domain::tasks::COLLECT_VOTES;
use threadquest_scheduler::{InProcessScheduler, PgTaskQueue};
use threadquest_store::PgQuestStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The scheduler chosen at startup, kept concrete so its worker can run.
enum SchedulerRuntime {
    Postgres(Arc<PgTaskQueue>),
    InProcess(Arc<InProcessScheduler>),
}

impl SchedulerRuntime {
    fn scheduler(&self) -> Arc<dyn Scheduler> {
        match self {
            Self::Postgres(queue) => queue.clone(),
            Self::InProcess(scheduler) => scheduler.clone(),
        }
    }

    /// Starts delivering due tasks until `cancel` fires.
    fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        match self {
            Self::Postgres(queue) => {
                let queue = queue.clone();
                tokio::spawn(async move { queue.run(cancel).await })
            }
            Self::InProcess(scheduler) => {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    scheduler.shutdown();
                })
            }
        }
    }
}

/// Cancels `cancel` on Ctrl+C or SIGTERM.
fn setup_shutdown_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
            () = terminate => tracing::info!("received SIGTERM, shutting down"),
        }

        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let telemetry = Telemetry::init(otlp_endpoint.as_deref())?;

    let result = run().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "server exited with error");
    }

    telemetry.shutdown();
    result.map_err(Into::into)
}

async fn run() -> Result<(), AppError> {
    tracing::info!("Starting threadquest API server");

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(SystemRng::new()));
    let store: Arc<dyn QuestStore> = Arc::new(PgQuestStore::new(pool.clone()));

    let runtime = match config.scheduler_backend {
        SchedulerBackend::Postgres => SchedulerRuntime::Postgres(Arc::new(PgTaskQueue::new(
            pool.clone(),
            clock.clone(),
            config.worker,
        ))),
        SchedulerBackend::InProcess => SchedulerRuntime::InProcess(Arc::new(
            InProcessScheduler::new(clock.clone(), config.worker.retry),
        )),
    };
    let scheduler = runtime.scheduler();

    let engine = Arc::new(
        QuestEngine::new(
            store.clone(),
            Arc::new(OpenAiGenerator::new(&config.generator)),
            Arc::new(XClient::new(&config.x)),
            scheduler.clone(),
            clock.clone(),
            rng,
            config.progression,
        )
        .with_bot_handle(&config.bot_handle),
    );
    scheduler.on_due(COLLECT_VOTES, Arc::new(CollectVotesHandler::new(engine.clone())));

    let recovery = Arc::new(RecoveryScanner::new(
        store.clone(),
        engine.clone(),
        clock,
        config.progression,
    ));
    match recovery.run().await {
        Ok(report) => tracing::info!(?report, "startup recovery finished"),
        Err(e) => tracing::error!(error = %e, "startup recovery failed"),
    }

    let cancel = CancellationToken::new();
    setup_shutdown_signal(cancel.clone());
    let worker = runtime.spawn(cancel.clone());

    let app_state = AppState::new(engine, store, recovery);

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "task worker did not stop cleanly");
    }
    tracing::info!("server stopped");
    Ok(())
}
