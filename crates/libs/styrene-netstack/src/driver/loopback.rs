//! Loopback device.
//!
//! `transmit` copies the frame into a bounded private queue and raises the
//! device's line; the caller returns right away. The interrupt handler runs on
//! the dispatch thread, drains the queue to empty and hands every frame back to
//! the stack as received traffic.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{NetDevice, NetDeviceDriver, NetDeviceFlags, NetDeviceType, NetInput};
use crate::error::NetError;
use crate::intr::{Irq, IrqFlags, IrqHandler, IrqRaiser, INTR_IRQ_BASE};
use crate::stack::NetStack;
use crate::util::{copy_frame, trace_dump};

/// Largest IP datagram.
pub const LOOPBACK_MTU: usize = u16::MAX as usize;
pub const LOOPBACK_QUEUE_LIMIT: usize = 16;
pub const LOOPBACK_IRQ: Irq = INTR_IRQ_BASE + 1;

struct LoopbackQueueEntry {
    ty: u16,
    data: Vec<u8>,
}

pub struct Loopback {
    irq: Irq,
    limit: usize,
    queue: Mutex<VecDeque<LoopbackQueueEntry>>,
    raiser: IrqRaiser,
}

impl Loopback {
    fn new(irq: Irq, limit: usize, raiser: IrqRaiser) -> Self {
        Self { irq, limit, queue: Mutex::new(VecDeque::with_capacity(limit)), raiser }
    }

    pub fn irq(&self) -> Irq {
        self.irq
    }

    pub fn queue_limit(&self) -> usize {
        self.limit
    }

    /// Frames transmitted but not yet drained by the interrupt handler.
    pub fn queue_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LoopbackQueueEntry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NetDeviceDriver for Loopback {
    fn transmit(
        &self,
        dev: &NetDevice,
        ty: u16,
        data: &[u8],
        _dst: Option<&[u8]>,
    ) -> Result<(), NetError> {
        let num = {
            let mut queue = self.lock();
            if queue.len() >= self.limit {
                log::error!("queue is full, dev={}", dev.name());
                return Err(NetError::QueueFull { name: dev.name().to_string(), limit: self.limit });
            }
            queue.push_back(LoopbackQueueEntry { ty, data: copy_frame(data)? });
            queue.len()
        };
        log::debug!(
            "queue pushed (num:{}), dev={}, type=0x{:04x}, len={}",
            num,
            dev.name(),
            ty,
            data.len()
        );
        trace_dump("loopback", data);

        // The frame stays queued if the raise fails and goes out with the next one.
        if let Err(err) = self.raiser.raise(self.irq) {
            log::warn!("raise failed, dev={}: {}", dev.name(), err);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct LoopbackIsr {
    input: NetInput,
}

impl IrqHandler for LoopbackIsr {
    fn handle(&self, _irq: Irq, dev: &Arc<NetDevice>) -> Result<(), NetError> {
        let lo = dev
            .driver::<Loopback>()
            .ok_or_else(|| NetError::driver(dev.name(), "not a loopback device"))?;
        loop {
            // Only the pop holds the lock; delivery runs unlocked.
            let (entry, num) = {
                let mut queue = lo.lock();
                let entry = queue.pop_front();
                (entry, queue.len())
            };
            let Some(entry) = entry else {
                break;
            };
            log::debug!(
                "queue popped (num:{}), dev={}, type=0x{:04x}, len={}",
                num,
                dev.name(),
                entry.ty,
                entry.data.len()
            );
            trace_dump("loopback", &entry.data);
            if let Err(err) = self.input.input(entry.ty, &entry.data, dev) {
                log::warn!("input failed, dev={}, type=0x{:04x}: {}", dev.name(), entry.ty, err);
            }
        }
        Ok(())
    }
}

pub fn init(stack: &mut NetStack) -> Result<Arc<NetDevice>, NetError> {
    let limit = stack.config().loopback.queue_limit;
    let driver = Loopback::new(LOOPBACK_IRQ, limit, stack.irq_raiser());
    let dev = NetDevice::alloc(NetDeviceType::Loopback, driver)
        .with_mtu(LOOPBACK_MTU)
        .with_header_len(0)
        .with_addr_len(0)
        .with_flags(NetDeviceFlags::LOOPBACK);
    let isr = LoopbackIsr { input: stack.input() };
    let dev = stack.register_device_with_irq(dev, LOOPBACK_IRQ, isr, IrqFlags::SHARED)?;
    log::debug!("initialized, dev={}", dev.name());
    Ok(dev)
}
