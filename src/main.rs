use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use pasal_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool)
            .await
            .context("failed running migrations")?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Payment gateway: HTTP clients when provider endpoints are configured,
    // otherwise the mock (dev/test only).
    let gateway = api::payments::gateway_from_config(&cfg)?;

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        event_sender.clone(),
        gateway,
        &cfg,
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services: services.clone(),
    };

    // Expired-reservation sweeper
    let sweeper = services.reservations.clone();
    let sweep_interval = Duration::from_secs(cfg.reservation_sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.cleanup_expired_reservations().await {
                warn!(error = %e, "reservation sweep failed");
            }
        }
    });

    // In-process order worker loops. Deployments that drain via the
    // /order-worker endpoint or an out-of-process worker disable these.
    if cfg.worker_enabled {
        for i in 0..cfg.worker_concurrency {
            let worker = (*services.order_worker).clone();
            let worker_id = format!("pasal-worker-{}-{}", std::process::id(), i);
            let poll_interval = Duration::from_millis(cfg.worker_poll_interval_ms);
            tokio::spawn(worker.run_loop(worker_id, poll_interval));
        }
        info!(concurrency = cfg.worker_concurrency, "order worker loops started");
    }

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.is_development() || cfg.is_test() {
        info!("using permissive CORS (no explicit origins configured)");
        CorsLayer::permissive()
    } else {
        anyhow::bail!("missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS");
    };

    // Build router: root + full v1 API + Swagger UI
    let app = Router::new()
        .route("/", get(|| async { "pasal-api up" }))
        .route("/health", get(api::handlers::health::health_check))
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer)
        .layer(axum::middleware::from_fn(api::request_logging_middleware))
        .layer(axum::middleware::from_fn(
            api::request_id::request_id_middleware,
        ))
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port configuration")?;
    info!("pasal-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
