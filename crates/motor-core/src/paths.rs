//! Data-directory layout

use std::path::PathBuf;

/// Root data directory: `~/.motor` (overridable via `MOTOR_HOME`).
pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("MOTOR_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".motor")
}

pub fn db_path() -> PathBuf {
    data_dir().join("motor.db")
}

pub fn workspaces_dir() -> PathBuf {
    data_dir().join("workspaces")
}

pub fn skills_dir() -> PathBuf {
    data_dir().join("skills")
}

pub fn oneshot_dir() -> PathBuf {
    data_dir().join("oneshot")
}

pub fn config_path() -> PathBuf {
    data_dir().join("motor.toml")
}
