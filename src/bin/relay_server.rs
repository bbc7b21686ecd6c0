//! Signaling relay server binary
//!
//! Runs the room-membership and message-forwarding relay that studymesh
//! clients connect to. The relay holds no media and keeps no state beyond
//! live room membership.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:9900)
//! cargo run --bin relay-server
//!
//! # Custom bind address
//! STUDYMESH_BIND="127.0.0.1:9000" cargo run --bin relay-server
//! ```
//!
//! # Environment Variables
//!
//! - `STUDYMESH_BIND`: Socket address to listen on (default: `0.0.0.0:9900`)
//! - `RUST_LOG`: Logging level (default: `info`, options: `trace`, `debug`, `info`, `warn`, `error`)

use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use studymesh::signaling::relay::{serve, RelayState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down");
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // watchdog in case graceful shutdown stalls
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(shutdown_flag))
}

async fn async_main(shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = studymesh::version(),
        "studymesh signaling relay starting"
    );

    let bind = std::env::var("STUDYMESH_BIND").unwrap_or_else(|_| "0.0.0.0:9900".to_string());
    info!(bind = %bind, "configuration loaded");

    let state = RelayState::new();
    let server_state = state.clone();
    let server = tokio::spawn(async move { serve(server_state, &bind).await });

    info!("relay running, press Ctrl+C to shut down");
    while !shutdown_flag.load(Ordering::SeqCst) {
        if server.is_finished() {
            return server
                .await
                .context("relay task panicked")?
                .context("relay server exited");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!(
        rooms = state.room_count().await,
        participants = state.participant_count().await,
        "shutdown signal received"
    );
    server.abort();
    info!("relay shut down");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
