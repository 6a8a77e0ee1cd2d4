//! Bridge configuration.
//!
//! The size limits of the native-messaging channel are spelled out here instead of
//! being assumed. [`BridgeConfig::validate`] rejects combinations that the browser
//! would refuse at runtime.

use crate::frame::{Chunker, MAX_PAYLOAD};
use crate::host::{MAX_FROM_ENGINE, MAX_TO_ENGINE};
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf, time::Duration};

/// Bytes a wire frame adds on top of its base64 chunk (`id`, `index`, `total`, JSON punctuation).
pub const FRAME_OVERHEAD: usize = 256;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024;

/// How to launch the engine process.
///
/// The program must speak id-tagged wire frames on stdio. The default name assumes a
/// frame-aware `gpgme-json` host is on `PATH`; a bare gpgme-json needs a wrapper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gpgme-json"),
            args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Largest raw chunk carried by one frame, in both directions.
    pub max_frame_size: usize,

    /// Largest payload the bridge will send or accept.
    pub payload_ceiling: usize,

    /// Reject a request that has not settled after this many milliseconds. `None` waits
    /// until the channel closes.
    pub response_timeout_ms: Option<u64>,

    /// Depth of the command queue between callers and the bridge task.
    pub command_queue: usize,

    pub engine: EngineConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            payload_ceiling: MAX_PAYLOAD,
            response_timeout_ms: None,
            command_queue: 64,
            engine: EngineConfig::default(),
        }
    }
}

/// Size of the native message carrying a frame of `chunk_len` raw bytes.
pub fn wire_frame_size(chunk_len: usize) -> usize {
    chunk_len.div_ceil(3) * 4 + FRAME_OVERHEAD
}

impl BridgeConfig {
    pub fn validate(&self) -> io::Result<()> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidInput, msg);

        if self.max_frame_size == 0 {
            return Err(invalid("max_frame_size must be greater than zero".into()));
        }
        // Engine answers use the same chunk size and must fit the smaller direction.
        let wire = wire_frame_size(self.max_frame_size);
        if wire > MAX_FROM_ENGINE {
            return Err(invalid(format!(
                "max_frame_size {} encodes to {wire} bytes, above the {MAX_FROM_ENGINE} byte message limit",
                self.max_frame_size
            )));
        }
        if self.payload_ceiling > MAX_TO_ENGINE {
            return Err(invalid(format!(
                "payload_ceiling {} is above the {MAX_TO_ENGINE} byte transport limit",
                self.payload_ceiling
            )));
        }
        if self.command_queue == 0 {
            return Err(invalid("command_queue must be greater than zero".into()));
        }
        if self.response_timeout_ms == Some(0) {
            return Err(invalid("response_timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.max_frame_size, self.payload_ceiling)
    }

    /// Parse and validate a TOML document. Missing keys keep their defaults.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(s: &str) -> io::Result<Self> {
        let cfg: BridgeConfig = toml::from_str(s)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "toml-config")]
    pub fn load(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
