use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::NetError;

pub const DEFAULT_INTR_THREAD_NAME: &str = "intr";
pub const DEFAULT_LOOPBACK_QUEUE_LIMIT: usize = 16;
pub const DEFAULT_PROTOCOL_QUEUE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub intr: IntrConfig,
    pub loopback: LoopbackConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IntrConfig {
    pub thread_name: String,
}

impl Default for IntrConfig {
    fn default() -> Self {
        Self { thread_name: DEFAULT_INTR_THREAD_NAME.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub queue_limit: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self { queue_limit: DEFAULT_LOOPBACK_QUEUE_LIMIT }
    }
}

/// Inbound queue settings shared by every registered protocol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub queue_limit: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { queue_limit: DEFAULT_PROTOCOL_QUEUE_LIMIT }
    }
}

impl StackConfig {
    pub fn from_toml(input: &str) -> Result<Self, NetError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, NetError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.intr.thread_name.trim().is_empty() {
            return Err(NetError::InvalidConfig { reason: "intr.thread_name is empty".into() });
        }
        if self.loopback.queue_limit == 0 {
            return Err(NetError::InvalidConfig {
                reason: "loopback.queue_limit must be > 0".into(),
            });
        }
        if self.protocol.queue_limit == 0 {
            return Err(NetError::InvalidConfig {
                reason: "protocol.queue_limit must be > 0".into(),
            });
        }
        Ok(())
    }
}
