mod api;
mod catalog;
mod config;
mod engine;
mod sched;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::api::AppState;
use crate::engine::{ShowControl, Timing};

/// Show control engine: fires scheduled tracks on the audio engine and the
/// video players, and takes manual overrides over HTTP.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory containing showrunner.yml, schedule.yml and the tracks/
    /// folder. Defaults to ./config, ~/.config/showrunner, /etc/showrunner.
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Any load error here is fatal; after this point the engine only
    // degrades gracefully.
    let paths = config::locate(args.config_dir.as_deref())?;
    let settings = config::load_settings(&paths).context("reading settings")?;
    let catalog = Arc::new(config::load_catalog(&paths).context("reading catalog")?);
    let entries = config::load_schedule(&paths, &catalog).context("reading schedule")?;
    info!(
        tracks = catalog.track_count(),
        blocks = catalog.block_count(),
        "catalog loaded"
    );

    let link = transport::UdpLink::new(&settings)
        .with_context(|| format!("connecting to audio engine at {}:{}", settings.audio_host, settings.audio_port))?;
    info!(
        "audio engine at {}:{}, video broadcast to {} ports {}/{}",
        settings.audio_host, settings.audio_port,
        settings.broadcast_ip, settings.video_port, settings.info_port
    );

    let engine = Arc::new(ShowControl::new(
        catalog,
        Box::new(link),
        Timing::from_settings(&settings),
    ));
    engine.load_schedule(entries).await;

    let worker = tokio::spawn(engine.clone().run());

    let state = AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine,
    };
    let app = api::build_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.listen_ip, settings.http_port)
        .parse()
        .context("parsing listen address")?;
    info!("showrunner engine starting on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight delay sequences are not drained; sends are best-effort.
    worker.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
