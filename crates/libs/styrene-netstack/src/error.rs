use crate::intr::Irq;

/// Errors returned by the device, interrupt and protocol layers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NetError {
    #[error("allocation failure: {len} bytes")]
    AllocationFailure { len: usize },

    #[error("conflicts with already registered irq: {irq}")]
    IrqConflict { irq: Irq },

    #[error("protocol already registered: type=0x{ty:04x}")]
    DuplicateProtocol { ty: u16 },

    #[error("already opened: dev={dev}")]
    AlreadyOpened { dev: String },

    #[error("not opened: dev={dev}")]
    NotOpened { dev: String },

    #[error("device is down: dev={dev}")]
    DeviceDown { dev: String },

    #[error("too long: dev={dev}, mtu={mtu}, len={len}")]
    TooLong { dev: String, mtu: usize, len: usize },

    #[error("queue is full: {name} (limit {limit})")]
    QueueFull { name: String, limit: usize },

    #[error("interrupt thread not running: irq={irq}")]
    IntrNotRunning { irq: Irq },

    #[error("interrupt thread already running")]
    IntrAlreadyRunning,

    #[error("failed to spawn interrupt thread: {0}")]
    IntrSpawn(#[source] std::io::Error),

    #[error("driver failure: dev={dev}: {reason}")]
    Driver { dev: String, reason: String },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Returns `true` for transient errors that may succeed once a queue drains.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    pub fn driver(dev: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Driver { dev: dev.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queue_full_is_retryable() {
        let full = NetError::QueueFull { name: "net0".into(), limit: 16 };
        assert!(full.is_retryable());
        assert!(!NetError::DeviceDown { dev: "net0".into() }.is_retryable());
        assert!(!NetError::IntrAlreadyRunning.is_retryable());
    }

    #[test]
    fn messages_carry_device_context() {
        let err = NetError::TooLong { dev: "net1".into(), mtu: 1500, len: 1501 };
        assert_eq!(err.to_string(), "too long: dev=net1, mtu=1500, len=1501");

        let err = NetError::DuplicateProtocol { ty: 0x0800 };
        assert_eq!(err.to_string(), "protocol already registered: type=0x0800");
    }
}
