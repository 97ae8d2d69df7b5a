//! We use this mocking module in unit tests to emulate an RS485 serial port.
//!
//! Scripted responses are queued up front and only become readable once the
//! transport has written and flushed its request, like a device on the bus.

use std::collections::VecDeque;

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 256>,
    /// Responses handed out one per flushed request
    responses: VecDeque<Vec<u8>>,
    /// Bytes currently waiting to be read
    rx: VecDeque<u8>,
    /// Number of completed (flushed) requests
    requests: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
    /// Would block - no data available
    WouldBlock,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::TimedOut,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.requests += 1;
        if let Some(response) = self.responses.pop_front() {
            self.rx.extend(response);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        if self.rx.is_empty() {
            return Err(MockSerialError::WouldBlock);
        }
        let mut count = 0;
        while count < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            responses: VecDeque::new(),
            rx: VecDeque::new(),
            requests: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Queue the bytes the device answers the next request with.
    pub fn queue_response(&mut self, data: &[u8]) {
        self.responses.push_back(data.to_vec());
    }

    /// Put bytes on the line that are already waiting before any request.
    pub fn set_pending_rx(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    pub fn request_count(&self) -> usize {
        self.requests
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error as _, ErrorKind, Read, ReadReady, Write};

    #[test]
    fn test_response_released_on_flush() {
        let mut mock = MockSerial::new();
        mock.queue_response(b"pong");
        assert!(!mock.read_ready().unwrap());

        mock.write_all(b"ping").unwrap();
        assert!(!mock.read_ready().unwrap());
        mock.flush().unwrap();
        assert!(mock.read_ready().unwrap());

        let mut buffer = [0u8; 8];
        assert_eq!(mock.read(&mut buffer).unwrap(), 4);
        assert_eq!(&buffer[..4], b"pong");
        assert_eq!(mock.written_data(), b"ping");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_read_would_block_when_empty() {
        let mut mock = MockSerial::new();
        let mut buffer = [0u8; 4];
        let err = mock.read(&mut buffer).unwrap_err();
        assert!(matches!(err, MockSerialError::WouldBlock));
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_pending_rx_is_readable_immediately() {
        let mut mock = MockSerial::new();
        mock.set_pending_rx(&[0xAA, 0xBB]);
        let mut buffer = [0u8; 1];
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], 0xAA);
        assert!(mock.read_ready().unwrap());
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 300];
        assert!(matches!(
            mock.write(&large_data),
            Err(MockSerialError::BufferOverflow)
        ));
    }

    #[test]
    fn test_error_flags_toggle() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        mock.set_write_error(false);
        assert!(mock.write(b"test").is_ok());

        mock.set_pending_rx(b"data");
        mock.set_read_error(true);
        let mut buffer = [0u8; 4];
        assert_eq!(mock.read(&mut buffer).unwrap_err().kind(), ErrorKind::Other);
        mock.set_read_error(false);
        assert!(mock.read(&mut buffer).is_ok());

        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }
}
