//! Farmhand - runs the farming bot behind the operator console gateway
//!
//! Connects to the emulator over adb, then serves the console WebSocket
//! until Ctrl-C. The bot itself is started from the console.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use coc_farmhand::android::adb::{locate_adb, DEFAULT_DEVICE_ID};
use coc_farmhand::android::AdbDevice;
use coc_farmhand::config::{self, RunConfig};
use coc_farmhand::gateway::{Gateway, DEFAULT_LISTEN_ADDR};
use coc_farmhand::vision::{Tesseract, TextRecognizer};
use coc_farmhand::Farmhand;

#[derive(Debug, Parser)]
#[command(name = "farmhand", version, about = "OCR-guided Clash of Clans farming bot")]
struct Cli {
    /// Address of the operator console WebSocket
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// adb serial of the emulator
    #[arg(long, default_value = DEFAULT_DEVICE_ID)]
    device: String,

    /// Path to the adb executable (searched for when omitted)
    #[arg(long)]
    adb: Option<PathBuf>,

    /// JSON file with initial settings, using the console parameter names
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for debug screenshots
    #[arg(long, default_value = "debug_victory")]
    debug_dir: PathBuf,

    /// Stop the bot when the console disconnects
    #[arg(long)]
    stop_on_disconnect: bool,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let (settings, rejected) = config::load_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    for error in rejected {
        log::warn!("Config file: {}", error);
    }
    log::info!("Loaded config from {}", path.display());
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let settings = load_config(cli.config.as_ref())?;

    let adb = cli.adb.clone().unwrap_or_else(locate_adb);
    log::info!("Using adb at {}", adb.display());
    let device = Arc::new(AdbDevice::new(adb, cli.device.clone()));

    let ocr = Arc::new(Tesseract::discover());
    match ocr.probe() {
        Ok(()) => log::info!("Tesseract {}", ocr.version().unwrap_or("(unknown version)")),
        Err(e) => log::warn!("{}; OCR reads will fail until it is installed", e),
    }

    let farmhand = Arc::new(Farmhand::new(device, ocr, settings).with_debug_dir(cli.debug_dir));

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", cli.listen))?;
    let gateway = Arc::new(Gateway::new(farmhand.clone()).stop_on_disconnect(cli.stop_on_disconnect));

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(gateway.serve(listener, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Shutting down");

    shutdown.cancel();
    farmhand.shutdown().await;
    server
        .await
        .context("Gateway task panicked")?
        .context("Gateway failed")?;
    Ok(())
}
