//! Settings that can be loaded from a JSON file.
//!
//! ```json
//! {
//!   "listen": "0.0.0.0:7879",
//!   "accept_timeout_ms": 0,
//!   "stream": { "read_timeout_ms": 30000, "eol": 10, "buffered": true }
//! }
//! ```
//!
//! Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::stream::{DEFAULT_EOL, WriteMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading settings from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing settings")]
    Parse(#[from] serde_json::Error),
}

/// Per-connection stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSettings {
    /// Zero disables the read deadline.
    pub read_timeout_ms: u64,
    /// Zero disables the write deadline.
    pub write_timeout_ms: u64,
    /// Delimiter for `read_bytes`.
    pub eol: u8,
    pub buffered: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            eol: DEFAULT_EOL,
            buffered: false,
        }
    }
}

impl StreamSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn write_mode(&self) -> WriteMode {
        if self.buffered {
            WriteMode::Buffered
        } else {
            WriteMode::Direct
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub listen: String,
    /// Zero means accept blocks indefinitely.
    pub accept_timeout_ms: u64,
    pub stream: StreamSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7879".to_string(),
            accept_timeout_ms: 0,
            stream: StreamSettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let settings = serde_json::from_str(contents)?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Self::from_json(&contents)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}
