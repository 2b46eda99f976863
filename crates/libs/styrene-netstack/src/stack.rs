//! Stack lifecycle.
//!
//! [`NetStack`] is the configuring stack: devices, interrupt bindings and
//! protocols are registered through it. [`NetStack::run`] consumes it and
//! returns a [`RunningStack`], which has no registration methods.

use std::sync::Arc;

use crate::config::StackConfig;
use crate::device::{DeviceRegistry, NetDevice, NetInput};
use crate::error::NetError;
use crate::intr::{Intr, Irq, IrqFlags, IrqHandler, IrqRaiser};
use crate::protocol::{NetProtocol, ProtocolHandler, ProtocolTable};

pub struct NetStack {
    config: StackConfig,
    intr: Intr,
    devices: DeviceRegistry,
    protocols: Arc<ProtocolTable>,
}

impl NetStack {
    pub fn new(config: StackConfig) -> Result<Self, NetError> {
        config.validate()?;
        let intr = Intr::new(config.intr.thread_name.clone());
        let protocols = Arc::new(ProtocolTable::new(config.protocol.queue_limit));
        let devices = DeviceRegistry::new(NetInput::new(protocols.clone()));
        log::info!("initialized");
        Ok(Self { config, intr, devices, protocols })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn register_device(&mut self, dev: NetDevice) -> Arc<NetDevice> {
        self.devices.register(dev)
    }

    /// Registers `dev` and binds `handler` to `irq` under the device's name.
    ///
    /// Either both happen or neither: a conflicting line leaves the device
    /// registry untouched.
    pub fn register_device_with_irq<H>(
        &mut self,
        dev: NetDevice,
        irq: Irq,
        handler: H,
        flags: IrqFlags,
    ) -> Result<Arc<NetDevice>, NetError>
    where
        H: IrqHandler + 'static,
    {
        self.intr.check_irq(irq, flags)?;
        let dev = self.devices.register(dev);
        if let Err(err) = self.intr.request_irq(irq, handler, flags, dev.name(), &dev) {
            self.devices.unregister_last(&dev);
            return Err(err);
        }
        Ok(dev)
    }

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
        self.intr.request_irq(irq, handler, flags, name, dev)
    }

    pub fn register_protocol<H>(
        &mut self,
        ty: u16,
        handler: H,
    ) -> Result<Arc<NetProtocol>, NetError>
    where
        H: ProtocolHandler + 'static,
    {
        self.protocols.register(ty, handler)
    }

    pub fn protocol(&self, ty: u16) -> Option<Arc<NetProtocol>> {
        self.protocols.get(ty)
    }

    pub fn device(&self, name: &str) -> Option<Arc<NetDevice>> {
        self.devices.get(name)
    }

    /// Handle for raising interrupt lines. Raises fail until the stack runs.
    pub fn irq_raiser(&self) -> IrqRaiser {
        self.intr.raiser()
    }

    /// Ingress entry point for drivers.
    pub fn input(&self) -> NetInput {
        self.devices.input_handle()
    }

    /// Starts the interrupt thread, then opens every registered device.
    ///
    /// A device that fails to open is logged and left down; the stack still
    /// runs.
    pub fn run(mut self) -> Result<RunningStack, NetError> {
        if let Err(err) = self.intr.run() {
            log::error!("intr_run() failure: {}", err);
            return Err(err);
        }
        log::debug!("open all devices...");
        let failures = self.devices.open_all();
        if !failures.is_empty() {
            log::warn!("{} device(s) failed to open", failures.len());
        }
        log::debug!("running...");

        let NetStack { config, intr, devices, protocols } = self;
        Ok(RunningStack { config, intr, devices, protocols, stopped: false })
    }
}

pub struct RunningStack {
    config: StackConfig,
    intr: Intr,
    devices: DeviceRegistry,
    protocols: Arc<ProtocolTable>,
    stopped: bool,
}

impl RunningStack {
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn output(
        &self,
        dev: &NetDevice,
        ty: u16,
        data: &[u8],
        dst: Option<&[u8]>,
    ) -> Result<(), NetError> {
        self.devices.output(dev, ty, data, dst)
    }

    pub fn device(&self, name: &str) -> Option<Arc<NetDevice>> {
        self.devices.get(name)
    }

    /// Registered devices, most recently registered first.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<NetDevice>> {
        self.devices.iter()
    }

    pub fn protocol(&self, ty: u16) -> Option<Arc<NetProtocol>> {
        self.protocols.get(ty)
    }

    pub fn irq_raiser(&self) -> IrqRaiser {
        self.intr.raiser()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Stops the interrupt thread, then closes every device. Calling it again
    /// does nothing.
    ///
    /// Frames still queued in drivers or protocol queues are left in place.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.intr.shutdown();
        log::debug!("close all devices...");
        let failures = self.devices.close_all();
        if !failures.is_empty() {
            log::warn!("{} device(s) failed to close", failures.len());
        }
        self.stopped = true;
        log::debug!("shutting down");
    }
}

impl Drop for RunningStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}
