//! Handler configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wire::{FRAGMENT_GRANULARITY, FRAME_MODULUS, MAX_FRAME_LEN};

/// Tunables for one EoE handler.
///
/// The defaults suit a typical 1 ms cycle and a 128-octet mailbox; the
/// retry and fairness bounds are deliberately configuration, not constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EoeConfig {
    /// Octet budget the slave's mailbox leaves for one fragment payload.
    /// Must be at least one 32-octet block.
    #[serde(default = "default_max_fragment_payload")]
    pub max_fragment_payload: usize,

    /// Transport retries per in-flight mailbox operation before the frame
    /// (or the reassembly in progress) is dropped.
    #[serde(default = "default_transport_retry_limit")]
    pub transport_retry_limit: u32,

    /// Consecutive write dispatches before a read check is forced, so
    /// receive polling is never starved by a busy transmit queue.
    #[serde(default = "default_tx_fairness_limit")]
    pub tx_fairness_limit: u32,

    /// Capacity of the transmit queue shared with the host glue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Rate measurement window in milliseconds.
    #[serde(default = "default_rate_interval_ms")]
    pub rate_interval_ms: u64,

    /// EoE port on the slave, 0 for the default port.
    #[serde(default)]
    pub port: u8,
}

fn default_max_fragment_payload() -> usize {
    128
}
fn default_transport_retry_limit() -> u32 {
    3
}
fn default_tx_fairness_limit() -> u32 {
    8
}
fn default_queue_capacity() -> usize {
    16
}
fn default_rate_interval_ms() -> u64 {
    1000
}

impl Default for EoeConfig {
    fn default() -> Self {
        Self {
            max_fragment_payload: default_max_fragment_payload(),
            transport_retry_limit: default_transport_retry_limit(),
            tx_fairness_limit: default_tx_fairness_limit(),
            queue_capacity: default_queue_capacity(),
            rate_interval_ms: default_rate_interval_ms(),
            port: 0,
        }
    }
}

impl EoeConfig {
    /// The rate measurement window as a `Duration`.
    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    /// Reject settings the wire format or the cyclic loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_fragment_payload < FRAGMENT_GRANULARITY {
            return Err(Error::InvalidConfig(format!(
                "max_fragment_payload {} is below one {FRAGMENT_GRANULARITY}-octet block",
                self.max_fragment_payload
            )));
        }
        if self.max_fragment_payload > MAX_FRAME_LEN {
            return Err(Error::InvalidConfig(format!(
                "max_fragment_payload {} exceeds the {MAX_FRAME_LEN}-octet frame bound",
                self.max_fragment_payload
            )));
        }
        if self.port >= FRAME_MODULUS {
            return Err(Error::InvalidConfig(format!(
                "port {} does not fit the 4-bit port field",
                self.port
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.rate_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "rate_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: EoeConfig =
            serde_json::from_str(&data).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
