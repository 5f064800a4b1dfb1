use anyhow::{Context, Result};
use clap::Parser;
use sarflood::compute::earthengine::{EarthEngineClient, EarthEngineSession};
use sarflood::config::FloodConfig;
use sarflood::core::FloodPipeline;
use sarflood::server::{create_router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sentinel-1 flood mapping web service")]
struct Args {
    #[arg(short, long, help = "JSON configuration file")]
    config: Option<PathBuf>,

    #[arg(short = 'p', long, help = "Listen port (overrides configuration)")]
    port: Option<u16>,

    #[arg(short = 'b', long, help = "Bind address (overrides configuration)")]
    bind_address: Option<String>,

    #[arg(long, env = "EARTHENGINE_PROJECT", help = "Cloud project for remote compute")]
    project: Option<String>,

    #[arg(short, long, help = "Directory receiving exported GeoPackages")]
    output_dir: Option<PathBuf>,

    #[arg(long, help = "Query scene counts and fail on empty periods")]
    diagnostics: bool,
}

fn load_config(args: &Args) -> Result<FloodConfig> {
    let mut config = match &args.config {
        Some(path) => FloodConfig::load_from_file(path)?,
        None => FloodConfig::default(),
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(project) = &args.project {
        config.earthengine.project = project.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        config.server.output_dir = output_dir.clone();
    }
    if args.diagnostics {
        config.pipeline.collection.diagnostics = true;
    }
    Ok(config.fit_remote_budget())
}

async fn serve(state: Arc<AppState<EarthEngineClient>>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.bind_address, state.config.port)
        .parse()
        .context("Invalid bind address")?;

    std::fs::create_dir_all(&state.config.output_dir).with_context(|| {
        format!(
            "Cannot create output directory {}",
            state.config.output_dir.display()
        )
    })?;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    log::info!("Flood mapping service listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    log::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => log::info!("Received SIGTERM, shutting down..."),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    // The blocking HTTP client is created and dropped outside the async runtime
    let session = EarthEngineSession::initialize(&config.earthengine)
        .context("Failed to initialize the remote compute session")?;
    let engine = Arc::new(EarthEngineClient::new(session));

    let pipeline = FloodPipeline::new(Arc::clone(&engine), config.pipeline.clone())?;
    let state = Arc::new(AppState::new(pipeline, config.server.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;
    let result = runtime.block_on(serve(state));
    drop(runtime);

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown(),
        Err(_) => log::warn!("Remote session still referenced at exit"),
    }
    result
}
