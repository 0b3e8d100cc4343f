//! wardend - motion-warden daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by WARDEN_CONFIG, env overrides)
//! 2. Opens the capture store and starts the external detector
//! 3. Serves the token-gated capture/control API
//! 4. Shuts the API and the detector down on SIGINT/SIGTERM

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use motion_warden::api::{ApiConfig, ApiServer, AppState};
use motion_warden::config::WardendConfig;
use motion_warden::{CaptureStore, Gate, StoreConfig, Supervisor};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = WardendConfig::load()?;

    let gate = Gate::new(&cfg.auth)?;
    let store = CaptureStore::open(&StoreConfig {
        data_dir: cfg.data_dir.clone(),
    })?;
    let supervisor = Supervisor::new(cfg.detector.clone());

    // The detector runs from boot; a launch failure is logged and can be
    // retried over the API.
    if let Err(err) = supervisor.start() {
        log::warn!("detector did not start at boot: {}", err);
    }

    let state = Arc::new(AppState {
        gate,
        supervisor,
        store,
    });

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        state.clone(),
    )
    .spawn()?;
    log::info!("capture api listening on {}", api_handle.addr);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    api_handle.stop()?;
    if let Err(err) = state.supervisor.stop() {
        log::warn!("detector stop during shutdown: {}", err);
    }
    Ok(())
}
