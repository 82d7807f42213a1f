//! Backend configuration and path resolution

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::BackendError;

/// Minimal SuperDirt boot script written out when no startup file exists
const DEFAULT_STARTUP_FILE: &str = r#"(
s.options.numBuffers = 1024 * 256;
s.options.memSize = 8192 * 32;
s.options.numWireBufs = 128;
s.options.maxNodes = 1024 * 32;
s.waitForBoot {
    ~dirt = SuperDirt(2, s);
    ~dirt.loadSoundFiles;
    s.sync;
    ~dirt.start(57120, 0 ! 12);
};
)
"#;

/// Sound backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Explicit path to the sclang executable
    #[serde(rename = "sclang-path")]
    pub sclang_path: Option<PathBuf>,

    /// SuperCollider startup file loaded on boot
    #[serde(rename = "startup-file")]
    pub startup_file: Option<PathBuf>,

    /// Directory of .scd/.sc synth definitions sent after boot
    #[serde(rename = "synthdef-dir")]
    pub synthdef_dir: Option<PathBuf>,

    /// Kill stale SuperCollider processes before booting
    #[serde(rename = "preemptive-kill")]
    pub preemptive_kill: bool,

    /// Forward raw backend output instead of only classified notices
    pub verbose: bool,

    /// How long to wait for the backend to report ready
    #[serde(rename = "boot-timeout-ms")]
    pub boot_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sclang_path: None,
            startup_file: None,
            synthdef_dir: None,
            preemptive_kill: true,
            verbose: false,
            boot_timeout_ms: 15_000,
        }
    }
}

impl BackendConfig {
    /// Get the boot timeout as a Duration
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    /// Path to the sclang executable, configured or platform default
    pub fn resolve_sclang(&self) -> Result<PathBuf, BackendError> {
        if let Some(path) = &self.sclang_path {
            debug!(path = %path.display(), "BackendConfig::resolve_sclang: using configured path");
            return Ok(path.clone());
        }
        default_sclang_path()
    }

    /// Startup file to load on boot
    ///
    /// A configured file that does not exist falls back to the default,
    /// which is materialized under the user data directory on first use.
    pub fn resolve_startup_file(&self) -> Result<PathBuf, BackendError> {
        if let Some(path) = &self.startup_file {
            if path.is_file() {
                debug!(path = %path.display(), "BackendConfig::resolve_startup_file: using configured file");
                return Ok(path.clone());
            }
            warn!(path = %path.display(), "BackendConfig::resolve_startup_file: configured file missing, using default");
        }

        let dir = data_dir()?;
        std::fs::create_dir_all(&dir)?;
        let default = dir.join("default_superdirt.scd");
        if !default.is_file() {
            debug!(path = %default.display(), "BackendConfig::resolve_startup_file: writing default startup file");
            std::fs::write(&default, DEFAULT_STARTUP_FILE)?;
        }
        Ok(default)
    }

    /// Directory holding user synth definitions, created if missing
    pub fn resolve_synthdef_dir(&self) -> Result<PathBuf, BackendError> {
        let dir = match &self.synthdef_dir {
            Some(dir) => dir.clone(),
            None => data_dir()?.join("synths"),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn data_dir() -> Result<PathBuf, BackendError> {
    dirs::data_dir()
        .map(|dir| dir.join("shoal"))
        .ok_or_else(|| BackendError::UnsupportedPlatform("no user data directory".to_string()))
}

fn default_sclang_path() -> Result<PathBuf, BackendError> {
    if cfg!(target_os = "linux") {
        Ok(PathBuf::from("sclang"))
    } else if cfg!(target_os = "macos") {
        Ok(PathBuf::from(
            "/Applications/SuperCollider.app/Contents/MacOS/sclang",
        ))
    } else if cfg!(target_os = "windows") {
        find_windows_sclang()
    } else {
        Err(BackendError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}

/// The Windows installer does not add sclang to PATH, so scan the
/// program files directory for the newest SuperCollider install
fn find_windows_sclang() -> Result<PathBuf, BackendError> {
    let Ok(program_files) = std::env::var("ProgramFiles") else {
        return Err(BackendError::SclangNotFound);
    };
    let mut colliders: Vec<PathBuf> = std::fs::read_dir(&program_files)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("SuperCollider"))
        })
        .collect();
    colliders.sort();
    match colliders.pop() {
        Some(dir) => Ok(dir.join("sclang.exe")),
        None => Err(BackendError::SclangNotFound),
    }
}
