//! roadscan_api - HTTP service for road defect detection
//!
//! This daemon:
//! 1. Loads the service config (file + ROADSCAN_* env)
//! 2. Loads the detector once and shares it across requests
//! 3. Serves image and video detection until Ctrl-C

use anyhow::Result;
use std::sync::mpsc;

use roadscan::{
    api::ApiServer,
    detect::{load_model, BackendKind},
    ServiceConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let kind = BackendKind::preferred(&config.model);
    if kind == BackendKind::Scripted {
        log::warn!(
            "no ONNX model configured (set ROADSCAN_MODEL_PATH and build with backend-tract); \
             serving with the scripted backend, every request will report zero detections"
        );
    }
    let model = load_model(kind, &config.model)?;
    model.warm_up()?;
    log::info!(
        "detector '{}' ready, classes {:?}",
        model.name(),
        model.class_names()?
    );

    let output_dir = config.output_dir.clone();
    let api_handle = ApiServer::new(config, model).spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);
    log::info!("annotated outputs stored in {}", output_dir.display());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("roadscan_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
