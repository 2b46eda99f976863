//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use netstack::{Irq, NetDevice, NetError};

pub const WAIT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn ignore(_data: &[u8], _dev: &Arc<NetDevice>) {}

pub fn noop(_irq: Irq, _dev: &Arc<NetDevice>) -> Result<(), NetError> {
    Ok(())
}
