//! The capability shared by the serial and network transports.

use crate::error::Result;
use crate::frame::Registers;

/// Drives the RS485 transceiver direction. Called with `true` right before a
/// request is transmitted and with `false` once it has fully drained.
pub type DirectionControl = Box<dyn FnMut(bool) + Send>;

/// A link to the inverter able to read holding registers and write single registers.
///
/// Implementations are not required to be usable from more than one thread at
/// once; the driver serializes every call.
pub trait Transport: Send {
    /// Bring the link up. Calling it while already connected is a no-op.
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Read `count` consecutive 16 bit registers starting at `address`.
    fn read_holding_registers(&mut self, unit_id: u8, address: u16, count: u8)
    -> Result<Registers>;

    fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16) -> Result<()>;
}

