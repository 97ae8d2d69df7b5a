//! Modbus RTU over a half-duplex RS485 multidrop line.
//!
//! The line may only be driven by one party at a time, so the transmit
//! direction is requested immediately before the request goes out and
//! released as soon as it has drained, before the inverter can answer.

use std::time::{Duration, Instant};

use embedded_io::{Error as _, ErrorKind, Read, ReadReady, Write};
use fugit::MillisDurationU32;
use log::{debug, warn};

use crate::error::{ModbusError, Result};
use crate::frame::{self, Frame, Registers};
use crate::transport::{DirectionControl, Transport};

/// How long to wait for a complete response.
pub const RESPONSE_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(1000);

/// Settle time after switching the transceiver to transmit.
const TURNAROUND: Duration = Duration::from_micros(100);

/// Poll interval while waiting for the next response byte.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Serial transport over any byte stream implementing [embedded_io::Read],
/// [embedded_io::Write] & [embedded_io::ReadReady].
pub struct RtuTransport<S: Read + Write + ReadReady> {
    interface: S,
    direction: Option<DirectionControl>,
    response_timeout: MillisDurationU32,
    connected: bool,
}

impl<S: Read + Write + ReadReady> RtuTransport<S> {
    pub fn new(interface: S, direction: Option<DirectionControl>) -> Self {
        Self {
            interface,
            direction,
            response_timeout: RESPONSE_TIMEOUT,
            connected: false,
        }
    }

    pub fn with_response_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn interface(&self) -> &S {
        &self.interface
    }

    fn set_direction(&mut self, transmit: bool) {
        if let Some(direction) = self.direction.as_mut() {
            direction(transmit);
            if transmit {
                std::thread::sleep(TURNAROUND);
            }
        }
    }

    /// Throw away anything left on the line from an earlier exchange.
    fn discard_pending(&mut self) {
        let mut scratch = [0u8; 16];
        while let Ok(true) = self.interface.read_ready() {
            match self.interface.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!("Discarded {n} stale bytes"),
            }
        }
    }

    fn transmit(&mut self, request: &[u8]) -> Result<()> {
        self.discard_pending();

        self.set_direction(true);
        let sent = self
            .interface
            .write_all(request)
            .and_then(|_| self.interface.flush());
        // Always hand the line back, even if the write failed.
        self.set_direction(false);

        sent.map_err(|e| {
            warn!("Serial write failed: {:?}", e.kind());
            ModbusError::NotConnected
        })
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.interface.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) => match e.kind() {
                ErrorKind::TimedOut | ErrorKind::Interrupted => Ok(None),
                kind => {
                    warn!("Serial read failed: {kind:?}");
                    Err(ModbusError::NotConnected)
                }
            },
        }
    }

    /// Collect a response byte by byte until it is complete or the deadline passes.
    ///
    /// The expected length is `success_len`, unless the function code turns
    /// out to carry the exception flag.
    fn receive(&mut self, success_len: usize) -> Result<Frame> {
        let deadline = Instant::now() + Duration::from_millis(self.response_timeout.to_millis() as u64);
        let mut response = Frame::new();
        let mut expected = success_len;

        while response.len() < expected {
            if Instant::now() >= deadline {
                return Err(if response.is_empty() {
                    ModbusError::Timeout
                } else {
                    ModbusError::IncompleteFrame
                });
            }
            match self.read_byte()? {
                Some(byte) => {
                    response
                        .push(byte)
                        .map_err(|_| ModbusError::IncompleteFrame)?;
                    if response.len() == 2 {
                        expected = frame::rtu_response_len(byte, success_len);
                    }
                }
                None => std::thread::sleep(IDLE_WAIT),
            }
        }
        Ok(response)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ModbusError::NotConnected)
        }
    }
}

impl<S: Read + Write + ReadReady + Send> Transport for RtuTransport<S> {
    fn connect(&mut self) -> Result<()> {
        // The UART is configured when the port is opened, so there is no link to establish.
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u8,
    ) -> Result<Registers> {
        self.ensure_connected()?;
        let request = frame::rtu_read_request(unit_id, address, count)?;
        self.transmit(&request)?;
        let response = self.receive(frame::rtu_read_response_len(count))?;
        frame::parse_rtu_read_response(unit_id, count, &response)
    }

    fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16) -> Result<()> {
        self.ensure_connected()?;
        let request = frame::rtu_write_request(unit_id, address, value)?;
        self.transmit(&request)?;
        let response = self.receive(frame::RTU_WRITE_LEN)?;
        frame::parse_rtu_write_response(&request, &response)
    }
}
