//! scannerd - product scanner daemon
//!
//! Opens the product store, loads the classifier, and serves the control
//! page, the start/stop routes and the annotated MJPEG feed until Ctrl-C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use product_scanner::{
    api::{ApiConfig, ApiServer},
    catalog::LabelCatalog,
    classify::FrameClassifier,
    config::ScannerConfig,
    frame::FrameHub,
    session::{DetectionPipeline, DetectionPolicy, SessionManager},
    storage::{ProductStore, SqliteProductStore},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect products on camera and record them")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "SCANNER_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config and SCANNER_HTTP_ADDR).
    #[arg(long)]
    addr: Option<String>,

    /// Begin detection immediately instead of waiting for /start.
    #[arg(long)]
    autostart: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ScannerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.http_addr = addr;
    }

    let store: Arc<dyn ProductStore> = Arc::new(SqliteProductStore::open(&cfg.db_path)?);
    log::info!(
        "product store {} ready ({} records)",
        cfg.db_path,
        store.list_all()?.len()
    );

    let classifier = FrameClassifier::from_settings(&cfg.model, LabelCatalog::default())
        .context("load classifier")?;
    classifier.warm_up().context("warm up classifier")?;
    log::info!(
        "classifier backend {} ready for {} labels",
        classifier.backend_name(),
        classifier.catalog().len()
    );

    let pipeline = DetectionPipeline::new(
        Arc::new(classifier),
        store,
        DetectionPolicy::from(&cfg.detection),
    );
    let hub = Arc::new(FrameHub::new(cfg.detection.hub_capacity));
    let sessions = Arc::new(SessionManager::new(cfg.camera.clone(), pipeline, hub));
    if args.autostart {
        sessions.start()?;
    }

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.http_addr.clone(),
        },
        sessions.clone(),
    )
    .spawn()?;
    log::info!("scannerd serving http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("scannerd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    sessions.stop_and_wait()?;

    Ok(())
}
