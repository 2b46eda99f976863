//! Protocol registry keyed by 16-bit type tags.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::device::NetDevice;
use crate::error::NetError;
use crate::util::copy_frame;

pub const NET_PROTOCOL_TYPE_IP: u16 = 0x0800;
pub const NET_PROTOCOL_TYPE_ARP: u16 = 0x0806;
pub const NET_PROTOCOL_TYPE_IPV6: u16 = 0x86dd;

/// Consumer-side handler stored with a registration.
///
/// The stack never calls it; a consumer runs it over its own queue with
/// [`NetProtocol::drain_with_handler`].
pub trait ProtocolHandler: Send + Sync {
    fn handle(&self, data: &[u8], dev: &Arc<NetDevice>);
}

impl<F> ProtocolHandler for F
where
    F: Fn(&[u8], &Arc<NetDevice>) + Send + Sync,
{
    fn handle(&self, data: &[u8], dev: &Arc<NetDevice>) {
        self(data, dev)
    }
}

/// A received frame waiting in a protocol's inbound queue.
#[derive(Debug)]
pub struct NetProtocolQueueEntry {
    dev: Arc<NetDevice>,
    data: Vec<u8>,
}

impl NetProtocolQueueEntry {
    pub fn dev(&self) -> &Arc<NetDevice> {
        &self.dev
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

pub struct NetProtocol {
    ty: u16,
    limit: usize,
    queue: Mutex<VecDeque<NetProtocolQueueEntry>>,
    handler: Box<dyn ProtocolHandler>,
}

impl std::fmt::Debug for NetProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetProtocol")
            .field("ty", &self.ty)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl NetProtocol {
    pub fn ty(&self) -> u16 {
        self.ty
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pop(&self) -> Option<NetProtocolQueueEntry> {
        self.lock().pop_front()
    }

    /// Pops every pending entry on the calling thread and feeds it to the
    /// registered handler. Returns the number of entries handled.
    pub fn drain_with_handler(&self) -> usize {
        let mut handled = 0;
        while let Some(entry) = self.pop() {
            log::debug!(
                "queue popped, type=0x{:04x}, dev={}, len={}",
                self.ty,
                entry.dev.name(),
                entry.len()
            );
            self.handler.handle(&entry.data, &entry.dev);
            handled += 1;
        }
        handled
    }

    fn push(&self, entry: NetProtocolQueueEntry) -> Result<usize, NetError> {
        let mut queue = self.lock();
        if queue.len() >= self.limit {
            return Err(NetError::QueueFull {
                name: format!("protocol 0x{:04x}", self.ty),
                limit: self.limit,
            });
        }
        queue.push_back(entry);
        Ok(queue.len())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NetProtocolQueueEntry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ProtocolTable {
    protocols: RwLock<Vec<Arc<NetProtocol>>>,
    queue_limit: usize,
}

impl ProtocolTable {
    pub fn new(queue_limit: usize) -> Self {
        Self { protocols: RwLock::new(Vec::new()), queue_limit }
    }

    pub fn register<H>(&self, ty: u16, handler: H) -> Result<Arc<NetProtocol>, NetError>
    where
        H: ProtocolHandler + 'static,
    {
        let mut protocols = self.protocols.write().unwrap_or_else(PoisonError::into_inner);
        if protocols.iter().any(|proto| proto.ty == ty) {
            log::error!("already registered, type=0x{:04x}", ty);
            return Err(NetError::DuplicateProtocol { ty });
        }
        let proto = Arc::new(NetProtocol {
            ty,
            limit: self.queue_limit,
            queue: Mutex::new(VecDeque::new()),
            handler: Box::new(handler),
        });
        protocols.push(proto.clone());
        log::info!("registered, type=0x{:04x}", ty);
        Ok(proto)
    }

    pub fn get(&self, ty: u16) -> Option<Arc<NetProtocol>> {
        let protocols = self.protocols.read().unwrap_or_else(PoisonError::into_inner);
        protocols.iter().rev().find(|proto| proto.ty == ty).cloned()
    }

    pub fn types(&self) -> Vec<u16> {
        let protocols = self.protocols.read().unwrap_or_else(PoisonError::into_inner);
        protocols.iter().rev().map(|proto| proto.ty).collect()
    }

    /// Queues a copy of `data` on the protocol registered for `ty`.
    ///
    /// Frames for unregistered types are dropped and reported as success.
    pub fn dispatch(&self, ty: u16, data: &[u8], dev: &Arc<NetDevice>) -> Result<(), NetError> {
        let Some(proto) = self.get(ty) else {
            log::debug!("unsupported protocol, dropped, type=0x{:04x}, dev={}", ty, dev.name());
            return Ok(());
        };
        let entry = NetProtocolQueueEntry { dev: dev.clone(), data: copy_frame(data)? };
        match proto.push(entry) {
            Ok(num) => {
                log::debug!(
                    "queue pushed (num:{}), dev={}, type=0x{:04x}, len={}",
                    num,
                    dev.name(),
                    ty,
                    data.len()
                );
                Ok(())
            }
            Err(err) => {
                log::error!("dropped, dev={}, type=0x{:04x}: {}", dev.name(), ty, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{NetDeviceDriver, NetDeviceType};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullDriver;

    impl NetDeviceDriver for NullDriver {
        fn transmit(
            &self,
            _dev: &NetDevice,
            _ty: u16,
            _data: &[u8],
            _dst: Option<&[u8]>,
        ) -> Result<(), NetError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn device() -> Arc<NetDevice> {
        Arc::new(NetDevice::alloc(NetDeviceType::Dummy, NullDriver))
    }

    fn ignore(_data: &[u8], _dev: &Arc<NetDevice>) {}

    #[test]
    fn duplicate_type_is_rejected() {
        let table = ProtocolTable::new(8);
        table.register(NET_PROTOCOL_TYPE_IP, ignore).expect("first registration");
        let err = table.register(NET_PROTOCOL_TYPE_IP, ignore).expect_err("duplicate");
        assert!(matches!(err, NetError::DuplicateProtocol { ty: NET_PROTOCOL_TYPE_IP }));
        assert_eq!(table.types(), [NET_PROTOCOL_TYPE_IP]);
    }

    #[test]
    fn unregistered_type_is_a_silent_drop() {
        let table = ProtocolTable::new(8);
        let ip = table.register(NET_PROTOCOL_TYPE_IP, ignore).expect("ip");
        let arp = table.register(NET_PROTOCOL_TYPE_ARP, ignore).expect("arp");

        table.dispatch(NET_PROTOCOL_TYPE_IPV6, b"frame", &device()).expect("drop is not an error");
        assert!(ip.is_empty());
        assert!(arp.is_empty());
    }

    #[test]
    fn dispatch_copies_frame_with_device() {
        let table = ProtocolTable::new(8);
        let ip = table.register(NET_PROTOCOL_TYPE_IP, ignore).expect("ip");
        let arp = table.register(NET_PROTOCOL_TYPE_ARP, ignore).expect("arp");
        let dev = device();

        table.dispatch(NET_PROTOCOL_TYPE_IP, b"first", &dev).expect("dispatch");
        table.dispatch(NET_PROTOCOL_TYPE_IP, b"second", &dev).expect("dispatch");
        assert_eq!(ip.len(), 2);
        assert!(arp.is_empty());

        let entry = ip.pop().expect("entry");
        assert_eq!(entry.data(), b"first");
        assert_eq!(entry.len(), 5);
        assert!(Arc::ptr_eq(entry.dev(), &dev));
        assert_eq!(ip.pop().expect("entry").into_data(), b"second".to_vec());
        assert!(ip.pop().is_none());
    }

    #[test]
    fn full_queue_drops_frame() {
        let table = ProtocolTable::new(2);
        let ip = table.register(NET_PROTOCOL_TYPE_IP, ignore).expect("ip");
        let dev = device();
        table.dispatch(NET_PROTOCOL_TYPE_IP, b"a", &dev).expect("dispatch");
        table.dispatch(NET_PROTOCOL_TYPE_IP, b"b", &dev).expect("dispatch");
        let err = table.dispatch(NET_PROTOCOL_TYPE_IP, b"c", &dev).expect_err("queue full");
        assert!(err.is_retryable());
        assert_eq!(ip.len(), 2);
        assert_eq!(ip.limit(), 2);
    }

    #[test]
    fn drain_with_handler_runs_on_caller() {
        let table = ProtocolTable::new(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let ip = table
            .register(NET_PROTOCOL_TYPE_IP, move |data: &[u8], _dev: &Arc<NetDevice>| {
                counter.fetch_add(data.len(), Ordering::Relaxed);
            })
            .expect("ip");
        let dev = device();
        table.dispatch(NET_PROTOCOL_TYPE_IP, b"abc", &dev).expect("dispatch");
        table.dispatch(NET_PROTOCOL_TYPE_IP, b"de", &dev).expect("dispatch");

        assert_eq!(seen.load(Ordering::Relaxed), 0);
        assert_eq!(ip.drain_with_handler(), 2);
        assert_eq!(seen.load(Ordering::Relaxed), 5);
        assert!(ip.is_empty());
    }
}
