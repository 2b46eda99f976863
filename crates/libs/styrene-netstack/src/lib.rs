//! Device, interrupt and protocol dispatch core of the Styrene user-space
//! network stack.
//!
//! Drivers register devices and bind interrupt lines on a [`NetStack`];
//! upper layers register protocol types. Once running, frames written with
//! [`NetDevice::output`] go to the driver, and drivers hand received frames to
//! [`NetInput::input`] from the interrupt thread, which queues them on the
//! protocol registered for their type.

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod intr;
pub mod protocol;
pub mod stack;
pub mod util;

pub use config::StackConfig;
pub use device::{
    DeviceRegistry, NetDevice, NetDeviceDriver, NetDeviceFlags, NetDeviceType, NetInput,
};
pub use error::NetError;
pub use intr::{Intr, Irq, IrqFlags, IrqHandler, IrqRaiser, INTR_IRQ_BASE};
pub use protocol::{
    NetProtocol, NetProtocolQueueEntry, ProtocolHandler, ProtocolTable, NET_PROTOCOL_TYPE_ARP,
    NET_PROTOCOL_TYPE_IP, NET_PROTOCOL_TYPE_IPV6,
};
pub use stack::{NetStack, RunningStack};
