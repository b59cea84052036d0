//! Process configuration
//!
//! Layered, lowest precedence first: built-in defaults, an optional TOML
//! file, then `SLICEDB_*` environment variables. Command-line flags are
//! applied on top by the binary.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the database/frame/view tree
    pub data_dir: PathBuf,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// host:port this node is reachable on
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/slicedb"),
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            host: "localhost:15000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder
            .add_source(config::Environment::with_prefix("SLICEDB"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Directory holding the views of `frame` in `db`
    pub fn frame_path(&self, db: &str, frame: &str) -> PathBuf {
        self.data_dir.join(db).join(frame)
    }
}
