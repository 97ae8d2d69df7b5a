//! Adapter exposing a host serial port as an [embedded_io] byte stream, so the
//! RTU transport can drive a USB/RS485 dongle the same way it drives a UART.

use std::time::Duration;

use serialport::SerialPort;

/// Short blocking read timeout. The RTU transport keeps its own overall deadline.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SerialPortIo(Box<dyn SerialPort>);

impl SerialPortIo {
    /// Open `path` at `baud_rate`, 8N1.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self(port))
    }
}

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind as Kind;
        match self.0.kind() {
            std::io::ErrorKind::NotFound => Kind::NotFound,
            std::io::ErrorKind::PermissionDenied => Kind::PermissionDenied,
            std::io::ErrorKind::NotConnected => Kind::NotConnected,
            std::io::ErrorKind::BrokenPipe => Kind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => Kind::InvalidInput,
            std::io::ErrorKind::InvalidData => Kind::InvalidData,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Kind::TimedOut,
            std::io::ErrorKind::Interrupted => Kind::Interrupted,
            std::io::ErrorKind::Unsupported => Kind::Unsupported,
            std::io::ErrorKind::OutOfMemory => Kind::OutOfMemory,
            _ => Kind::Other,
        }
    }
}

impl From<serialport::Error> for IoError {
    fn from(err: serialport::Error) -> Self {
        IoError(err.into())
    }
}

impl embedded_io::ErrorType for SerialPortIo {
    type Error = IoError;
}

impl embedded_io::Read for SerialPortIo {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::ReadReady for SerialPortIo {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.bytes_to_read()? > 0)
    }
}

impl embedded_io::Write for SerialPortIo {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    /// Blocks until the OS has handed every byte to the UART.
    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}
