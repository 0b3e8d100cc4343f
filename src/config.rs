//! wardend daemon configuration.
//!
//! A JSON config file named by `WARDEN_CONFIG` supplies defaults,
//! individual `WARDEN_*` environment variables override it, and the
//! merged result is validated before the daemon starts. Secrets (the
//! password digest and token key seed) have no baked-in defaults.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::auth::GateConfig;
use crate::supervisor::DetectorConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:3001";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DETECTOR_PROGRAM: &str = "motion";
const DEFAULT_DETECTOR_CONFIG: &str = "config/motion.conf";

#[derive(Debug, Deserialize, Default)]
struct WardendConfigFile {
    api: Option<ApiConfigFile>,
    store: Option<StoreConfigFile>,
    detector: Option<DetectorConfigFile>,
    auth: Option<AuthConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    program: Option<String>,
    config_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthConfigFile {
    username: Option<String>,
    password_sha256: Option<String>,
    token_key_seed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WardendConfig {
    pub api_addr: String,
    pub data_dir: PathBuf,
    pub detector: DetectorConfig,
    pub auth: GateConfig,
}

impl WardendConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WARDEN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WardendConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let data_dir = file
            .store
            .and_then(|store| store.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let program = file
            .detector
            .as_ref()
            .and_then(|detector| detector.program.clone())
            .unwrap_or_else(|| DEFAULT_DETECTOR_PROGRAM.to_string());
        let detector_config = file
            .detector
            .and_then(|detector| detector.config_path)
            .unwrap_or_else(|| DEFAULT_DETECTOR_CONFIG.to_string());
        let auth = GateConfig {
            username: file
                .auth
                .as_ref()
                .and_then(|auth| auth.username.clone())
                .unwrap_or_default(),
            password_sha256: file
                .auth
                .as_ref()
                .and_then(|auth| auth.password_sha256.clone())
                .unwrap_or_default(),
            token_key_seed: file
                .auth
                .and_then(|auth| auth.token_key_seed)
                .unwrap_or_default(),
        };
        Self {
            api_addr,
            data_dir,
            detector: DetectorConfig {
                program,
                args: vec!["-c".to_string(), detector_config],
            },
            auth,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("WARDEN_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("WARDEN_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(program) = std::env::var("WARDEN_DETECTOR_CMD") {
            if !program.trim().is_empty() {
                self.detector.program = program;
            }
        }
        if let Ok(path) = std::env::var("WARDEN_DETECTOR_CONFIG") {
            if !path.trim().is_empty() {
                self.detector.args = vec!["-c".to_string(), path];
            }
        }
        if let Ok(username) = std::env::var("WARDEN_USERNAME") {
            if !username.trim().is_empty() {
                self.auth.username = username;
            }
        }
        if let Ok(digest) = std::env::var("WARDEN_PASSWORD_SHA256") {
            if !digest.trim().is_empty() {
                self.auth.password_sha256 = digest;
            }
        }
        if let Ok(seed) = std::env::var("WARDEN_TOKEN_KEY_SEED") {
            if !seed.trim().is_empty() {
                self.auth.token_key_seed = seed;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.auth.username.trim().is_empty() {
            return Err(anyhow!("auth username is required (WARDEN_USERNAME)"));
        }
        if self.auth.password_sha256.trim().is_empty() {
            return Err(anyhow!(
                "auth password digest is required (WARDEN_PASSWORD_SHA256)"
            ));
        }
        if self.auth.token_key_seed.trim().is_empty() {
            return Err(anyhow!(
                "auth token key seed is required (WARDEN_TOKEN_KEY_SEED)"
            ));
        }
        if self.detector.program.trim().is_empty() {
            return Err(anyhow!("detector program must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WardendConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
