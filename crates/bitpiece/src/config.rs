//! Tunables of a download session.
//!
//! Loaded from `config.toml` in the user's config folder, every key is
//! optional and falls back to its default:
//!
//! ```toml
//! block_len = 16384
//! pipeline_len = 5
//! request_timeout = 10
//! max_retries = 3
//! handshake_timeout = 10
//! idle_timeout = 120
//! connect_timeout = 10
//! ```
use std::{io, time::Duration};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::Error, tcp_wire::BLOCK_LEN};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Size of the blocks requested from the peer, at most 16 KiB.
    pub block_len: u32,

    /// How many requests are kept outstanding at once.
    pub pipeline_len: usize,

    /// Seconds to wait for a requested block before asking again.
    pub request_timeout: u64,

    /// How many times a block is requested again before the peer is
    /// considered unresponsive.
    pub max_retries: u32,

    /// Seconds to wait for the peer's handshake.
    pub handshake_timeout: u64,

    /// Seconds to wait for any message while choked.
    pub idle_timeout: u64,

    /// Seconds to wait for the TCP connection.
    pub connect_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_len: BLOCK_LEN,
            pipeline_len: 5,
            request_timeout: 10,
            max_retries: 3,
            handshake_timeout: 10,
            idle_timeout: 120,
            connect_timeout: 10,
        }
    }
}

impl Config {
    /// Parse and validate a toml document, missing keys take their default.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.toml` from the user's config folder.
    ///
    /// When the folder or the file do not exist, the defaults are used.
    pub async fn load() -> Result<Self, Error> {
        let Some(dirs) = ProjectDirs::from("", "", "bitpiece") else {
            debug!("no home folder, using the default config");
            return Ok(Self::default());
        };

        let path = dirs.config_dir().join("config.toml");

        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Self::from_toml_str(&s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{path:?} not found, using the default config");
                Ok(Self::default())
            }
            Err(e) => Err(Error::ConfigError(format!(
                "could not read {path:?}: {e}"
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.pipeline_len == 0 {
            return Err(Error::ConfigError("pipeline_len must be at least 1".into()));
        }
        if self.block_len == 0 || self.block_len > BLOCK_LEN {
            return Err(Error::ConfigError(format!(
                "block_len must be between 1 and {BLOCK_LEN}, got {}",
                self.block_len
            )));
        }
        for (name, secs) in [
            ("request_timeout", self.request_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("idle_timeout", self.idle_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if secs == 0 {
                return Err(Error::ConfigError(format!(
                    "{name} must be at least 1 second"
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}
