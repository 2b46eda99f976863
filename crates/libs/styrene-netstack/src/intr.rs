//! Software interrupt lines.
//!
//! Handlers are bound to numbered lines before the stack starts. `Intr::run`
//! moves the bindings onto a single dispatch thread which blocks until a line
//! is raised and then invokes every handler bound to it. All handler
//! invocations for all lines are serialized through that thread.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Weak};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use tokio::sync::mpsc;

use crate::config::DEFAULT_INTR_THREAD_NAME;
use crate::device::NetDevice;
use crate::error::NetError;

pub type Irq = u32;

/// First line number available to drivers.
pub const INTR_IRQ_BASE: Irq = 35;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IrqFlags: u8 {
        /// The line may be bound by other handlers that are also shared.
        const SHARED = 0x0001;
    }
}

/// Interrupt service routine bound to a line.
///
/// Runs on the dispatch thread. An `Err` is logged and never reaches the
/// code that raised the line.
pub trait IrqHandler: Send + Sync {
    fn handle(&self, irq: Irq, dev: &Arc<NetDevice>) -> Result<(), NetError>;
}

impl<F> IrqHandler for F
where
    F: Fn(Irq, &Arc<NetDevice>) -> Result<(), NetError> + Send + Sync,
{
    fn handle(&self, irq: Irq, dev: &Arc<NetDevice>) -> Result<(), NetError> {
        self(irq, dev)
    }
}

struct IrqEntry {
    irq: Irq,
    handler: Box<dyn IrqHandler>,
    flags: IrqFlags,
    name: String,
    dev: Weak<NetDevice>,
}

impl IrqEntry {
    fn is_shared(&self) -> bool {
        self.flags.contains(IrqFlags::SHARED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntrMessage {
    Raise(Irq),
    Terminate,
}

/// Cloneable handle used by drivers to raise lines from any thread.
#[derive(Clone)]
pub struct IrqRaiser {
    tx: mpsc::UnboundedSender<IntrMessage>,
    running: Arc<AtomicBool>,
}

impl IrqRaiser {
    /// Signals the dispatch thread that `irq` fired. Never blocks.
    pub fn raise(&self, irq: Irq) -> Result<(), NetError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(NetError::IntrNotRunning { irq });
        }
        self.tx.send(IntrMessage::Raise(irq)).map_err(|_| NetError::IntrNotRunning { irq })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub struct Intr {
    thread_name: String,
    entries: Vec<IrqEntry>,
    watched: BTreeSet<Irq>,
    tx: mpsc::UnboundedSender<IntrMessage>,
    rx: Option<mpsc::UnboundedReceiver<IntrMessage>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Intr {
    pub fn new(thread_name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            thread_name: thread_name.into(),
            entries: Vec::new(),
            watched: BTreeSet::new(),
            tx,
            rx: Some(rx),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Binds `handler` to `irq`.
    ///
    /// Fails without touching any state if the line is already bound and
    /// either binding is not shared, or if the dispatch thread was started.
    pub fn request_irq<H>(
        &mut self,
        irq: Irq,
        handler: H,
        flags: IrqFlags,
        name: &str,
        dev: &Arc<NetDevice>,
    ) -> Result<(), NetError>
    where
        H: IrqHandler + 'static,
    {
        log::debug!("irq={}, flags={:?}, name={}", irq, flags, name);
        self.check_irq(irq, flags)?;
        self.entries.push(IrqEntry {
            irq,
            handler: Box::new(handler),
            flags,
            name: name.to_string(),
            dev: Arc::downgrade(dev),
        });
        self.watched.insert(irq);
        log::debug!("registered: irq={}, name={}", irq, name);
        Ok(())
    }

    /// Reports whether `request_irq(irq, _, flags, ..)` would be accepted,
    /// without binding anything.
    pub fn check_irq(&self, irq: Irq, flags: IrqFlags) -> Result<(), NetError> {
        if self.rx.is_none() {
            log::error!("bindings are frozen once the interrupt thread has started, irq={}", irq);
            return Err(NetError::IntrAlreadyRunning);
        }
        let shared = flags.contains(IrqFlags::SHARED);
        if self.entries.iter().any(|entry| entry.irq == irq && (!entry.is_shared() || !shared)) {
            log::error!("conflicts with already registered IRQs, irq={}", irq);
            return Err(NetError::IrqConflict { irq });
        }
        Ok(())
    }

    pub fn raiser(&self) -> IrqRaiser {
        IrqRaiser { tx: self.tx.clone(), running: self.running.clone() }
    }

    pub fn raise(&self, irq: Irq) -> Result<(), NetError> {
        self.raiser().raise(irq)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts the dispatch thread and waits until it is receiving.
    pub fn run(&mut self) -> Result<(), NetError> {
        let rx = self.rx.take().ok_or(NetError::IntrAlreadyRunning)?;
        let entries = std::mem::take(&mut self.entries);
        let watched = std::mem::take(&mut self.watched);
        let barrier = Arc::new(Barrier::new(2));

        let thread_barrier = barrier.clone();
        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || intr_thread(rx, entries, watched, thread_barrier))
            .map_err(|err| {
                log::error!("failed to spawn interrupt thread: {}", err);
                NetError::IntrSpawn(err)
            })?;

        barrier.wait();
        self.running.store(true, Ordering::Release);
        self.thread = Some(thread);
        Ok(())
    }

    /// Stops the dispatch thread and joins it. No-op if it was never started
    /// or has already been stopped.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        if self.tx.send(IntrMessage::Terminate).is_err() {
            log::warn!("interrupt thread already gone");
        }
        if thread.join().is_err() {
            log::error!("interrupt thread panicked");
        }
    }
}

impl Default for Intr {
    fn default() -> Self {
        Self::new(DEFAULT_INTR_THREAD_NAME)
    }
}

impl Drop for Intr {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn intr_thread(
    mut rx: mpsc::UnboundedReceiver<IntrMessage>,
    entries: Vec<IrqEntry>,
    watched: BTreeSet<Irq>,
    barrier: Arc<Barrier>,
) {
    log::debug!("start...");
    barrier.wait();
    loop {
        match rx.blocking_recv() {
            Some(IntrMessage::Raise(irq)) => dispatch(&entries, &watched, irq),
            Some(IntrMessage::Terminate) => break,
            None => {
                log::error!("interrupt channel closed");
                break;
            }
        }
    }
    log::debug!("terminated");
}

fn dispatch(entries: &[IrqEntry], watched: &BTreeSet<Irq>, irq: Irq) {
    if !watched.contains(&irq) {
        log::warn!("no handler bound, irq={}", irq);
        return;
    }
    // Most recently bound handler runs first.
    for entry in entries.iter().rev().filter(|entry| entry.irq == irq) {
        let Some(dev) = entry.dev.upgrade() else {
            log::debug!("device gone, irq={}, name={}", entry.irq, entry.name);
            continue;
        };
        log::debug!("irq={}, name={}", entry.irq, entry.name);
        match catch_unwind(AssertUnwindSafe(|| entry.handler.handle(irq, &dev))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!("handler failure, irq={}, name={}: {}", entry.irq, entry.name, err)
            }
            Err(_) => log::error!("handler panicked, irq={}, name={}", entry.irq, entry.name),
        }
    }
}
