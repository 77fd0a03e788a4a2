//! Configuration for a debugger instance.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default seed fed to the cell content hash.
pub const DEFAULT_HASH_SEED: u32 = 0xDEAD_BEEF;

/// Tunables for the debug bridge.
///
/// Every field has a default, so embedders only override what they need:
///
/// ```
/// use nbdebug_core::BridgeConfig;
///
/// let config = BridgeConfig::default().with_engine_port(5678);
/// assert_eq!(config.engine_port, Some(5678));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Loopback host the engine listens on.
    pub host: String,

    /// First port probed when allocating the engine port.
    pub port_range_start: u16,

    /// One past the last port probed.
    pub port_range_end: u16,

    /// Maximum number of probes before giving up.
    pub port_max_tries: u32,

    /// Fixed engine port. Skips allocation when set.
    pub engine_port: Option<u16>,

    /// Overrides the system temp root for logs and cell files.
    pub temp_dir: Option<PathBuf>,

    /// Directory name prefix for engine logs; the pid is appended.
    pub log_dir_prefix: String,

    /// Directory name prefix for dumped cells; the pid is appended.
    pub tmp_dir_prefix: String,

    /// Extension given to dumped cell files.
    pub tmp_file_suffix: String,

    /// Seed of the cell content hash.
    pub hash_seed: u32,

    /// Abort `initialize` when the engine fails to come up in the interpreter.
    ///
    /// Off by default: the failure is logged and the session starts anyway.
    pub abort_on_engine_start_failure: bool,

    /// Upper bound for each engine round-trip and sync handshake.
    pub request_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_range_start: 5678,
            port_range_end: 5900,
            port_max_tries: 100,
            engine_port: None,
            temp_dir: None,
            log_dir_prefix: "nbdebug_logs_".to_string(),
            tmp_dir_prefix: "nbdebug_".to_string(),
            tmp_file_suffix: ".py".to_string(),
            hash_seed: DEFAULT_HASH_SEED,
            abort_on_engine_start_failure: false,
            request_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Use a fixed engine port instead of allocating one.
    #[must_use]
    pub const fn with_engine_port(mut self, port: u16) -> Self {
        self.engine_port = Some(port);
        self
    }

    /// Root logs and dumped cells under `dir`.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Bound every engine round-trip.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Choose whether an engine bring-up failure aborts `initialize`.
    #[must_use]
    pub const fn with_abort_on_engine_start_failure(mut self, abort: bool) -> Self {
        self.abort_on_engine_start_failure = abort;
        self
    }

    /// Round-trip bound as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }
}
