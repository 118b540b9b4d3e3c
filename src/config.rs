use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DB_PATH: &str = "gatewatch.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8899";
const DEFAULT_CAMERA: &str = "stub://gate_camera";

#[derive(Debug, Deserialize, Default)]
struct GatewatchConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    snapshots: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GatewatchConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: String,
    /// Snapshot directory; none means snapshots go to the stub sink.
    pub snapshot_dir: Option<PathBuf>,
}

impl GatewatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GATEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GatewatchConfigFile) -> Self {
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera: file
                .camera
                .and_then(|camera| camera.device)
                .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            snapshot_dir: file.snapshots.and_then(|snapshots| snapshots.dir),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GATEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("GATEWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(camera) = std::env::var("GATEWATCH_CAMERA") {
            if !camera.trim().is_empty() {
                self.camera = camera;
            }
        }
        if let Ok(dir) = std::env::var("GATEWATCH_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        self.api_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;
        if self.camera.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GatewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_the_file_is_empty() {
        let cfg = GatewatchConfig::from_file(GatewatchConfigFile::default());
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.api_addr, DEFAULT_API_ADDR);
        assert_eq!(cfg.camera, DEFAULT_CAMERA);
        assert_eq!(cfg.snapshot_dir, None);
        cfg.validate().unwrap();
    }

    #[test]
    fn file_values_override_defaults() {
        let file: GatewatchConfigFile = serde_json::from_str(
            r#"{
                "db_path": "/var/lib/gatewatch/gate.db",
                "api": {"addr": "127.0.0.1:9000"},
                "camera": {"device": "stub://side_gate"},
                "snapshots": {"dir": "/var/lib/gatewatch/snapshots"}
            }"#,
        )
        .unwrap();
        let cfg = GatewatchConfig::from_file(file);
        assert_eq!(cfg.db_path, "/var/lib/gatewatch/gate.db");
        assert_eq!(cfg.api_addr, "127.0.0.1:9000");
        assert_eq!(cfg.camera, "stub://side_gate");
        assert_eq!(
            cfg.snapshot_dir.as_deref(),
            Some(Path::new("/var/lib/gatewatch/snapshots"))
        );
    }

    #[test]
    fn validate_rejects_a_bad_api_addr() {
        let mut cfg = GatewatchConfig::from_file(GatewatchConfigFile::default());
        cfg.api_addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_err());
    }
}
