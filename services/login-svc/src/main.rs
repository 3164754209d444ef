use std::net::SocketAddr;
use std::sync::Arc;

use common_config::load;
use common_obs::ObsInit;
use login_svc::config::LoginSvcConfig;
use login_svc::{build_router, AppState, SERVICE_NAME, VERSION};
use tokio::net::TcpListener;
use tokio::signal;

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME)?;

    let config = load::<LoginSvcConfig>()?;
    let addr = config.socket_addr()?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        listen_addr = %addr,
        cors_origins = ?config.cors.allowed_origins,
        "starting service"
    );

    let state = Arc::new(AppState::new(&config));
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(event = "shutdown_requested", service = SERVICE_NAME);
}
