//! Network devices and the device registry.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::NetError;
use crate::protocol::ProtocolTable;
use crate::util::trace_dump;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NetDeviceFlags: u16 {
        const UP = 0x0001;
        const LOOPBACK = 0x0010;
        const BROADCAST = 0x0020;
        const P2P = 0x0040;
        const NEED_ARP = 0x0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NetDeviceType {
    Dummy,
    Loopback,
    Ethernet,
}

impl NetDeviceType {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Dummy => 0x0000,
            Self::Loopback => 0x0001,
            Self::Ethernet => 0x0002,
        }
    }
}

/// Operations a driver provides for its devices.
///
/// `open` and `close` default to no-ops. The driver value itself is the
/// device's private state; handlers reach it through [`NetDevice::driver`].
pub trait NetDeviceDriver: Any + Send + Sync {
    fn open(&self, _dev: &NetDevice) -> Result<(), NetError> {
        Ok(())
    }

    fn close(&self, _dev: &NetDevice) -> Result<(), NetError> {
        Ok(())
    }

    fn transmit(
        &self,
        dev: &NetDevice,
        ty: u16,
        data: &[u8],
        dst: Option<&[u8]>,
    ) -> Result<(), NetError>;

    fn as_any(&self) -> &dyn Any;
}

pub struct NetDevice {
    index: usize,
    name: String,
    kind: NetDeviceType,
    mtu: usize,
    hlen: u16,
    alen: u16,
    flags: AtomicU16,
    driver: Box<dyn NetDeviceDriver>,
}

impl NetDevice {
    /// Allocates an unregistered, zero-configured device owned by `driver`.
    pub fn alloc<D: NetDeviceDriver>(kind: NetDeviceType, driver: D) -> Self {
        Self {
            index: 0,
            name: String::new(),
            kind,
            mtu: 0,
            hlen: 0,
            alen: 0,
            flags: AtomicU16::new(0),
            driver: Box::new(driver),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_header_len(mut self, hlen: u16) -> Self {
        self.hlen = hlen;
        self
    }

    pub fn with_addr_len(mut self, alen: u16) -> Self {
        self.alen = alen;
        self
    }

    /// Sets static capability flags. `UP` is managed by the registry and ignored here.
    pub fn with_flags(mut self, flags: NetDeviceFlags) -> Self {
        self.flags = AtomicU16::new((flags - NetDeviceFlags::UP).bits());
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NetDeviceType {
        self.kind
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn header_len(&self) -> u16 {
        self.hlen
    }

    pub fn addr_len(&self) -> u16 {
        self.alen
    }

    pub fn flags(&self) -> NetDeviceFlags {
        NetDeviceFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.flags().contains(NetDeviceFlags::UP)
    }

    pub fn state(&self) -> &'static str {
        if self.is_up() {
            "up"
        } else {
            "down"
        }
    }

    /// Returns the driver state if this device is driven by `T`.
    pub fn driver<T: NetDeviceDriver>(&self) -> Option<&T> {
        self.driver.as_any().downcast_ref::<T>()
    }

    pub(crate) fn open(&self) -> Result<(), NetError> {
        if self.is_up() {
            log::error!("already opened, dev={}", self.name);
            return Err(NetError::AlreadyOpened { dev: self.name.clone() });
        }
        if let Err(err) = self.driver.open(self) {
            log::error!("failure, dev={}: {}", self.name, err);
            return Err(err);
        }
        self.flags.fetch_or(NetDeviceFlags::UP.bits(), Ordering::AcqRel);
        log::info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    pub(crate) fn close(&self) -> Result<(), NetError> {
        if !self.is_up() {
            log::error!("not opened, dev={}", self.name);
            return Err(NetError::NotOpened { dev: self.name.clone() });
        }
        if let Err(err) = self.driver.close(self) {
            log::error!("failure, dev={}: {}", self.name, err);
            return Err(err);
        }
        self.flags.fetch_and(!NetDeviceFlags::UP.bits(), Ordering::AcqRel);
        log::info!("dev={}, state={}", self.name, self.state());
        Ok(())
    }

    /// Hands a frame to the driver for transmission.
    ///
    /// The device must be up and `data` must fit in the MTU. Driver failures
    /// are returned as-is; nothing is retried here.
    pub fn output(&self, ty: u16, data: &[u8], dst: Option<&[u8]>) -> Result<(), NetError> {
        if !self.is_up() {
            log::error!("not opened, dev={}", self.name);
            return Err(NetError::DeviceDown { dev: self.name.clone() });
        }
        if data.len() > self.mtu {
            log::error!("too long, dev={}, mtu={}, len={}", self.name, self.mtu, data.len());
            let len = data.len();
            return Err(NetError::TooLong { dev: self.name.clone(), mtu: self.mtu, len });
        }
        log::debug!("dev={}, type=0x{:04x}, len={}", self.name, ty, data.len());
        trace_dump("output", data);
        self.driver.transmit(self, ty, data, dst).map_err(|err| {
            log::error!("device transmit failure, dev={}, len={}: {}", self.name, data.len(), err);
            err
        })
    }
}

impl fmt::Debug for NetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetDevice")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mtu", &self.mtu)
            .field("hlen", &self.hlen)
            .field("alen", &self.alen)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Ingress entry point handed to drivers.
///
/// Drivers call [`NetInput::input`] from their interrupt handler for every
/// frame they receive; the frame is routed to the protocol registered for
/// its type.
#[derive(Clone)]
pub struct NetInput {
    protocols: Arc<ProtocolTable>,
}

impl NetInput {
    pub(crate) fn new(protocols: Arc<ProtocolTable>) -> Self {
        Self { protocols }
    }

    pub fn input(&self, ty: u16, data: &[u8], dev: &Arc<NetDevice>) -> Result<(), NetError> {
        log::debug!("dev={}, type=0x{:04x}, len={}", dev.name(), ty, data.len());
        trace_dump("input", data);
        self.protocols.dispatch(ty, data, dev)
    }
}

pub struct DeviceRegistry {
    devices: Vec<Arc<NetDevice>>,
    next_index: usize,
    input: NetInput,
}

impl DeviceRegistry {
    pub fn new(input: NetInput) -> Self {
        Self { devices: Vec::new(), next_index: 0, input }
    }

    /// Assigns the next index and its `net<index>` name, then takes ownership.
    pub fn register(&mut self, mut dev: NetDevice) -> Arc<NetDevice> {
        dev.index = self.next_index;
        dev.name = format!("net{}", dev.index);
        self.next_index += 1;
        log::info!("registered, dev={}, type=0x{:04x}", dev.name, dev.kind.as_u16());
        let dev = Arc::new(dev);
        self.devices.push(dev.clone());
        dev
    }

    /// Withdraws `dev` if it is the most recent registration and releases its
    /// index. Returns whether anything was removed.
    pub fn unregister_last(&mut self, dev: &Arc<NetDevice>) -> bool {
        if !self.devices.last().is_some_and(|last| Arc::ptr_eq(last, dev)) {
            return false;
        }
        self.devices.pop();
        self.next_index -= 1;
        log::info!("unregistered, dev={}", dev.name());
        true
    }

    /// Devices, most recently registered first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<NetDevice>> {
        self.devices.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<NetDevice>> {
        self.iter().find(|dev| dev.name() == name).cloned()
    }

    /// Opens every device. A failing device does not stop the others; the
    /// failures are returned.
    pub fn open_all(&self) -> Vec<NetError> {
        self.iter().filter_map(|dev| dev.open().err()).collect()
    }

    pub fn close_all(&self) -> Vec<NetError> {
        self.iter().filter_map(|dev| dev.close().err()).collect()
    }

    pub fn output(
        &self,
        dev: &NetDevice,
        ty: u16,
        data: &[u8],
        dst: Option<&[u8]>,
    ) -> Result<(), NetError> {
        dev.output(ty, data, dst)
    }

    pub fn input_handle(&self) -> NetInput {
        self.input.clone()
    }
}
