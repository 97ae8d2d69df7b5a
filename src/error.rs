//! Our error types for inverter communications.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, ModbusError>;

/// Outcome of a single request/response exchange with the inverter.
///
/// These are always returned, never escalated: the driver counts them and
/// moves on to the next register.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    #[error("No response within the deadline")]
    Timeout,
    #[error("Checksum mismatch")]
    ChecksumFailure,
    #[error("Exception response, code {0:#04x}")]
    ExceptionResponse(u8),
    #[error("Transport not connected")]
    NotConnected,
    #[error("Response does not match the request")]
    UnexpectedResponse,
    #[error("Incomplete frame")]
    IncompleteFrame,
}

impl From<rmodbus::ErrorKind> for ModbusError {
    /// rmodbus only fails while assembling a request if the frame would not fit.
    fn from(_err: rmodbus::ErrorKind) -> Self {
        ModbusError::IncompleteFrame
    }
}

/// Reasons the acquisition driver could not be brought up.
///
/// Startup failure is fatal for the acquisition task. Whoever constructed the
/// driver decides whether to try again.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("No inverter profile at index {0}")]
    UnknownProfile(usize),
    #[error("Failed to open serial port {port}: {source}")]
    SerialPort {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Failed to resolve inverter address {0}")]
    Address(String),
    #[error("Transport failed to connect: {0}")]
    Connect(#[from] ModbusError),
    #[error("Failed to spawn the poll thread: {0}")]
    Spawn(#[source] std::io::Error),
}
