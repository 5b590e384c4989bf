mod routes;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use sphttpd_core::catalog::Catalog;
use sphttpd_core::event_loop::EventLoop;
use sphttpd_core::session::memory::MemorySession;
use sphttpd_core::session::MainLoopNotifier;

use routes::api_router;

/// sphttpd: HTTP/JSON front end for reading and editing remote playlists.
#[derive(Parser)]
#[command(name = "sphttpd-server")]
struct Args {
    /// Path to the catalog YAML file seeding the session.
    #[arg(long, env = "SPHTTPD_CATALOG_PATH")]
    catalog_path: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value = "1337", env = "SPHTTPD_PORT")]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "SPHTTPD_BIND")]
    bind: String,

    /// Seconds before an unanswered request is dropped by the transport.
    #[arg(long, default_value = "60", env = "SPHTTPD_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: u64,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let catalog = Catalog::load(&args.catalog_path).unwrap_or_else(|e| {
        error!("failed to load catalog: {e}");
        std::process::exit(1);
    });

    info!(
        "loaded catalog for {} with {} playlists",
        catalog.username,
        catalog.playlists.len()
    );

    let notifier = MainLoopNotifier::new();
    let session = MemorySession::new(&catalog, notifier.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_loop, handle) = EventLoop::new(session, notifier, shutdown_rx);

    // The session lives on its own thread for the whole process lifetime.
    let (stopped_tx, stopped_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("session-loop".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build session runtime");
            rt.block_on(event_loop.run());
            let _ = stopped_tx.send(());
        })
        .unwrap_or_else(|e| {
            error!("failed to start session thread: {e}");
            std::process::exit(1);
        });

    let app = api_router(handle, Duration::from_secs(args.request_timeout_secs));
    let addr = format!("{}:{}", args.bind, args.port);

    info!("binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    info!("sphttpd listening on http://{addr}");
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        wait_for_interrupt().await;
        // Parked requests are answered by the loop before connections drain.
        let _ = shutdown_tx.send(true);
    });
    if let Err(e) = serve.await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    let _ = stopped_rx.await;
    info!("sphttpd stopped");
}

async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("interrupt received, shutting down");
}
