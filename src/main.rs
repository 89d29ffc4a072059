use crate::cluster::KubeCluster;
use crate::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cluster;
mod config;
mod notification;
mod reconciler;
mod restart;
mod secret_string;
mod state;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-rollout-webhook {}", env!("CARGO_PKG_VERSION"));

    let config = config::load_from_env()?;

    let cluster = KubeCluster::new(cluster::create_client().await?);
    let default_namespace = config.default_namespace_or(cluster.default_namespace());
    info!(
        "Notifications without pod_namespace resolve to namespace {}",
        default_namespace
    );
    if config.webserver.webhook_token.is_none() {
        warn!("No webhook token configured, accepting unauthenticated notifications");
    }

    let state = AppState {
        cluster,
        default_namespace,
        restart_annotation: restart::restart_annotation(config.rollout.enable_kubectl_annotation),
        webhook_token: config.webserver.webhook_token.clone(),
    };
    let app = webserver::create_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, draining in-flight requests");
        signal_token.cancel();
    });

    let grace_period = config.webserver.shutdown_grace_period();
    let grace_expired = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace_period).await;
    };

    tokio::select! {
        result = server => {
            result??;
            info!("Webserver stopped");
        }
        _ = grace_expired => {
            warn!(
                "Shutdown grace period of {:?} expired, abandoning in-flight requests",
                grace_period
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt signal: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for terminate signal: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
