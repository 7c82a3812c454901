//! Data-root resolution, mirroring the teacher crate's `linggen_home()`.

use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Returns the core's data root (`~/.core-runtime/` by default).
/// `CORE_DATA_ROOT` overrides it. Cached via `OnceLock` for the process lifetime.
pub fn data_root() -> &'static PathBuf {
    DATA_ROOT.get_or_init(|| {
        if let Ok(val) = std::env::var("CORE_DATA_ROOT") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".core-runtime")
    })
}

pub fn tools_dir() -> PathBuf {
    data_root().join("tools")
}

pub fn promoted_tools_dir() -> PathBuf {
    data_root().join("tools_promoted")
}

pub fn skills_dir() -> PathBuf {
    data_root().join("skills")
}

pub fn router_dir() -> PathBuf {
    data_root().join("router")
}

pub fn scheduler_dir() -> PathBuf {
    data_root().join("scheduler")
}

pub fn logs_dir() -> PathBuf {
    data_root().join("logs")
}

pub fn credentials_file() -> PathBuf {
    data_root().join("keys.json")
}
