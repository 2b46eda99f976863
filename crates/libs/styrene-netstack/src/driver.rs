//! Reference device drivers.

pub mod dummy;
pub mod loopback;
