mod api;
mod config;
mod shutdown;
mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use state::AppState;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=info,execution=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    info!(
        port = config.port,
        execution_config = %config.execution_path.display(),
        mode = %config.execution.worker.mode,
        strategy = %config.execution.dispatcher.strategy,
        "gateway starting"
    );

    let dispatcher = execution::build_dispatcher(&config.execution)?;
    dispatcher.start(&CancellationToken::new()).await?;

    let state = Arc::new(AppState {
        dispatcher: Arc::clone(&dispatcher),
    });

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    info!("listener closed, stopping workers");
    dispatcher.shutdown().await?;
    info!("gateway stopped");
    Ok(())
}
