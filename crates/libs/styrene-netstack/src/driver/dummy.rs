//! Sink device: accepts every frame and drops it. Nothing is ever received.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::device::{NetDevice, NetDeviceDriver, NetDeviceType};
use crate::error::NetError;
use crate::intr::{Irq, IrqFlags, IrqRaiser, INTR_IRQ_BASE};
use crate::stack::NetStack;
use crate::util::trace_dump;

pub const DUMMY_MTU: usize = u16::MAX as usize;
pub const DUMMY_IRQ: Irq = INTR_IRQ_BASE;

pub struct Dummy {
    irq: Irq,
    raiser: IrqRaiser,
    interrupts: AtomicU64,
}

impl Dummy {
    /// Number of times the interrupt handler has run for this device.
    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Acquire)
    }
}

impl NetDeviceDriver for Dummy {
    fn transmit(
        &self,
        dev: &NetDevice,
        ty: u16,
        data: &[u8],
        _dst: Option<&[u8]>,
    ) -> Result<(), NetError> {
        log::debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ty, data.len());
        trace_dump("dummy", data);
        // drop data; the raise only signals liveness
        if let Err(err) = self.raiser.raise(self.irq) {
            log::warn!("raise failed, dev={}: {}", dev.name(), err);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn dummy_isr(irq: Irq, dev: &Arc<NetDevice>) -> Result<(), NetError> {
    log::debug!("irq={}, dev={}", irq, dev.name());
    if let Some(dummy) = dev.driver::<Dummy>() {
        dummy.interrupts.fetch_add(1, Ordering::AcqRel);
    }
    Ok(())
}

pub fn init(stack: &mut NetStack) -> Result<Arc<NetDevice>, NetError> {
    let driver =
        Dummy { irq: DUMMY_IRQ, raiser: stack.irq_raiser(), interrupts: AtomicU64::new(0) };
    let dev = NetDevice::alloc(NetDeviceType::Dummy, driver).with_mtu(DUMMY_MTU);
    let dev = stack.register_device_with_irq(dev, DUMMY_IRQ, dummy_isr, IrqFlags::SHARED)?;
    log::debug!("initialized, dev={}", dev.name());
    Ok(dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;

    #[test]
    fn dummy_device_shape() {
        let mut stack = NetStack::new(StackConfig::default()).expect("stack");
        let dev = init(&mut stack).expect("dummy");
        assert_eq!(dev.name(), "net0");
        assert_eq!(dev.kind(), NetDeviceType::Dummy);
        assert_eq!(dev.mtu(), 65535);
        assert_eq!(dev.header_len(), 0);
        assert_eq!(dev.addr_len(), 0);
        assert!(dev.driver::<Dummy>().is_some());
    }

    #[test]
    fn transmit_succeeds_even_without_dispatch_thread() {
        let mut stack = NetStack::new(StackConfig::default()).expect("stack");
        let dev = init(&mut stack).expect("dummy");
        let dummy = dev.driver::<Dummy>().expect("dummy driver");
        dummy.transmit(&dev, 0x0800, b"discarded", None).expect("sink accepts");
        assert_eq!(dummy.interrupts(), 0);
    }

    #[test]
    fn shares_its_line_with_a_second_dummy() {
        let mut stack = NetStack::new(StackConfig::default()).expect("stack");
        let first = init(&mut stack).expect("first dummy");
        let second = init(&mut stack).expect("second dummy shares DUMMY_IRQ");
        assert_eq!(first.name(), "net0");
        assert_eq!(second.name(), "net1");
    }
}
