use crate::cli::ServeArgs;
use crate::infra::{AppState, OutboxMailer};
use crate::routes::with_enrollment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use enrollment_portal::config::AppConfig;
use enrollment_portal::error::AppError;
use enrollment_portal::telemetry;
use enrollment_portal::workflows::enrollment::{EnrollmentService, MemoryApplicationStore};
use enrollment_portal::workflows::notifications::{ClientDirectory, EmailComposer};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let directory = Arc::new(ClientDirectory::new(config.notifications));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        directory: directory.clone(),
    };

    let store = Arc::new(MemoryApplicationStore::new());
    let mailer = Arc::new(OutboxMailer::default());
    let service = Arc::new(EnrollmentService::new(
        store,
        mailer,
        directory.clone(),
        EmailComposer::new(&config.email),
    ));

    let app = with_enrollment_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "enrollment portal ready");

    let shutdown_flag = readiness_flag.clone();
    let teardown = directory.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            shutdown_flag.store(false, Ordering::Release);
            teardown.shutdown();
            info!("shutdown requested; closing real-time connections");
        })
        .await?;

    directory.shutdown();
    Ok(())
}
