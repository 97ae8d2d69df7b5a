//! Modbus TCP over a network stream.
//!
//! There is no checksum here: integrity relies on the stream itself plus the
//! echoed transaction id. The connection is opened lazily and, when it is
//! found closed in the middle of an exchange, reopened once before the call
//! gives up with [`ModbusError::NotConnected`]. Any other failed exchange,
//! except an exception response, closes the connection so that a late reply
//! can never be mistaken for the answer to a later request.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use fugit::MillisDurationU32;
use log::{debug, info, warn};

use crate::error::{ModbusError, Result};
use crate::frame::{self, Frame, Registers};
use crate::transport::Transport;

pub const DEFAULT_PORT: u16 = 502;
/// Unit id most inverters answer to behind a TCP endpoint.
pub const DEFAULT_UNIT_ID: u8 = 255;

pub const CONNECT_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(3000);
pub const RESPONSE_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(1000);

/// Why a single request/response exchange did not produce a frame.
enum Failure {
    /// The peer closed the connection or the socket broke.
    Closed,
    Modbus(ModbusError),
}

impl From<ModbusError> for Failure {
    fn from(err: ModbusError) -> Self {
        Failure::Modbus(err)
    }
}

fn to_duration(timeout: MillisDurationU32) -> Duration {
    Duration::from_millis(timeout.to_millis() as u64)
}

pub struct TcpTransport {
    address: SocketAddr,
    stream: Option<TcpStream>,
    transaction_id: u16,
    connect_timeout: MillisDurationU32,
    response_timeout: MillisDurationU32,
}

impl TcpTransport {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            stream: None,
            transaction_id: 0,
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.response_timeout = timeout;
        self
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn open(&mut self) -> Result<()> {
        let stream = TcpStream::connect_timeout(&self.address, to_duration(self.connect_timeout))
            .map_err(|e| {
                warn!("Connecting to {} failed: {e}", self.address);
                ModbusError::NotConnected
            })?;
        // Modbus requests are tiny, Nagle would hold each one back.
        stream.set_nodelay(true).map_err(|_| ModbusError::NotConnected)?;
        info!("Connected to {}", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    /// Send `request` and return the complete response frame, reconnecting once
    /// if the connection turns out to be closed.
    fn exchange(&mut self, request: &[u8]) -> Result<Frame> {
        if self.stream.is_none() {
            self.open()?;
        }
        match self.try_exchange(request) {
            Ok(response) => Ok(response),
            Err(Failure::Modbus(err)) => Err(err),
            Err(Failure::Closed) => {
                debug!("Connection to {} closed, reconnecting", self.address);
                self.stream = None;
                self.open()?;
                match self.try_exchange(request) {
                    Ok(response) => Ok(response),
                    Err(Failure::Modbus(err)) => Err(err),
                    Err(Failure::Closed) => {
                        self.stream = None;
                        Err(ModbusError::NotConnected)
                    }
                }
            }
        }
    }

    fn try_exchange(&mut self, request: &[u8]) -> core::result::Result<Frame, Failure> {
        let deadline = Instant::now() + to_duration(self.response_timeout);
        let stream = self.stream.as_mut().ok_or(Failure::Closed)?;

        stream.write_all(request).map_err(|_| Failure::Closed)?;

        let mut response = Frame::new();
        read_until(stream, &mut response, frame::MBAP_HEADER_LEN, deadline)?;
        let remaining = frame::tcp_remaining_len(&response)?;
        read_until(stream, &mut response, frame::MBAP_HEADER_LEN + remaining, deadline)?;
        Ok(response)
    }
}

impl TcpTransport {
    /// Drop the connection after any failure that can leave a reply, or part
    /// of one, unread in the stream. The next call starts on a fresh
    /// connection instead of reading a stale answer.
    ///
    /// An exception response is a complete frame and keeps the stream.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !matches!(err, ModbusError::ExceptionResponse(_)) && self.stream.is_some() {
                debug!("Dropping connection to {} after: {err}", self.address);
                self.disconnect();
            }
        }
        result
    }
}

/// Read from `stream` until `response` holds `len` bytes or `deadline` passes.
fn read_until(
    stream: &mut TcpStream,
    response: &mut Frame,
    len: usize,
    deadline: Instant,
) -> core::result::Result<(), Failure> {
    let mut buf = [0u8; 64];
    while response.len() < len {
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(response));
        }
        stream
            .set_read_timeout(Some(deadline - now))
            .map_err(|_| Failure::Closed)?;
        let wanted = (len - response.len()).min(buf.len());
        match stream.read(&mut buf[..wanted]) {
            Ok(0) => return Err(Failure::Closed),
            Ok(n) => response
                .extend_from_slice(&buf[..n])
                .map_err(|_| Failure::Modbus(ModbusError::IncompleteFrame))?,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(timed_out(response));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return Err(Failure::Closed),
        }
    }
    Ok(())
}

fn timed_out(response: &Frame) -> Failure {
    if response.is_empty() {
        Failure::Modbus(ModbusError::Timeout)
    } else {
        Failure::Modbus(ModbusError::IncompleteFrame)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.open()
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u8,
    ) -> Result<Registers> {
        let transaction_id = self.next_transaction_id();
        let request = frame::tcp_read_request(transaction_id, unit_id, address, count)?;
        let result = self.exchange(&request).and_then(|response| {
            frame::parse_tcp_read_response(transaction_id, unit_id, count, &response)
        });
        self.settle(result)
    }

    fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16) -> Result<()> {
        let transaction_id = self.next_transaction_id();
        let request = frame::tcp_write_request(transaction_id, unit_id, address, value)?;
        let result = self
            .exchange(&request)
            .and_then(|response| frame::parse_tcp_write_response(&request, &response));
        self.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// A fake inverter: runs `script` against each accepted connection in turn.
    fn fake_inverter<F>(connections: usize, script: F) -> (SocketAddr, JoinHandle<()>)
    where
        F: Fn(usize, TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            for index in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                script(index, stream);
            }
        });
        (address, handle)
    }

    fn read_request(stream: &mut TcpStream) -> [u8; 12] {
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).unwrap();
        request
    }

    fn transport(address: SocketAddr) -> TcpTransport {
        TcpTransport::new(address).with_response_timeout(MillisDurationU32::millis(200))
    }

    #[test]
    fn test_read_holding_registers() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            let request = read_request(&mut stream);
            assert_eq!(
                request,
                [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x2A, 0xF8, 0x00, 0x02]
            );
            stream
                .write_all(&[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0xFF, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02,
                ])
                .unwrap();
        });

        let mut tcp = transport(address);
        tcp.connect().unwrap();
        assert!(tcp.stream.as_ref().unwrap().nodelay().unwrap());
        let registers = tcp.read_holding_registers(255, 11000, 2).unwrap();
        assert_eq!(registers.as_slice(), &[0x0001, 0x0002]);
        server.join().unwrap();
    }

    #[test]
    fn test_transaction_id_increments() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            for expected in 1u8..=3 {
                let request = read_request(&mut stream);
                assert_eq!(request[1], expected);
                let mut response = [0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, 0x2A];
                response[..2].copy_from_slice(&request[..2]);
                stream.write_all(&response).unwrap();
            }
        });

        let mut tcp = transport(address);
        for _ in 0..3 {
            assert_eq!(tcp.read_holding_registers(255, 33000, 1).unwrap().as_slice(), &[42]);
        }
        server.join().unwrap();
    }

    #[test]
    fn test_transaction_id_mismatch() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            read_request(&mut stream);
            stream
                .write_all(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, 0x2A])
                .unwrap();
        });

        let mut tcp = transport(address);
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::UnexpectedResponse)
        );
        assert!(!tcp.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_exception_response() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            let request = read_request(&mut stream);
            let mut response = [0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x83, 0x02];
            response[..2].copy_from_slice(&request[..2]);
            stream.write_all(&response).unwrap();
        });

        let mut tcp = transport(address);
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::ExceptionResponse(0x02))
        );
        assert!(tcp.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_write_single_register() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            let request = read_request(&mut stream);
            assert_eq!(&request[6..], &[0xFF, 0x06, 0xC3, 0x50, 0x03, 0x03]);
            stream.write_all(&request).unwrap();
        });

        let mut tcp = transport(address);
        assert_eq!(tcp.write_single_register(255, 50000, 0x0303), Ok(()));
        server.join().unwrap();
    }

    #[test]
    fn test_timeout_without_response() {
        let (address, server) = fake_inverter(1, |_, mut stream| {
            read_request(&mut stream);
            thread::sleep(Duration::from_millis(300));
        });

        let mut tcp = TcpTransport::new(address).with_response_timeout(MillisDurationU32::millis(50));
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::Timeout)
        );
        assert!(!tcp.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_late_reply_does_not_shift_later_answers() {
        let (address, server) = fake_inverter(2, |index, mut stream| {
            if index == 0 {
                // Answer the first request long after the client gave up.
                thread::spawn(move || {
                    let request = read_request(&mut stream);
                    thread::sleep(Duration::from_millis(120));
                    let mut response =
                        [0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, 0x01];
                    response[..2].copy_from_slice(&request[..2]);
                    let _ = stream.write_all(&response);
                });
                return;
            }
            for value in 2u8..=4 {
                let request = read_request(&mut stream);
                let mut response =
                    [0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, value];
                response[..2].copy_from_slice(&request[..2]);
                stream.write_all(&response).unwrap();
            }
        });

        let mut tcp = TcpTransport::new(address).with_response_timeout(MillisDurationU32::millis(50));
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::Timeout)
        );
        for value in 2u16..=4 {
            assert_eq!(
                tcp.read_holding_registers(255, 33000, 1).unwrap().as_slice(),
                &[value]
            );
        }
        server.join().unwrap();
    }

    #[test]
    fn test_partial_frame_drops_connection() {
        fn respond(stream: &mut TcpStream) -> [u8; 11] {
            let request = read_request(stream);
            let mut response = [0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x00, 0x07];
            response[..2].copy_from_slice(&request[..2]);
            response
        }

        let (address, server) = fake_inverter(2, |index, mut stream| {
            if index == 0 {
                // Stall in the middle of the frame.
                thread::spawn(move || {
                    let response = respond(&mut stream);
                    stream.write_all(&response[..8]).unwrap();
                    thread::sleep(Duration::from_millis(150));
                    let _ = stream.write_all(&response[8..]);
                });
                return;
            }
            let response = respond(&mut stream);
            stream.write_all(&response).unwrap();
        });

        let mut tcp = TcpTransport::new(address).with_response_timeout(MillisDurationU32::millis(50));
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::IncompleteFrame)
        );
        assert!(!tcp.is_connected());
        assert_eq!(tcp.read_holding_registers(255, 33000, 1).unwrap().as_slice(), &[7]);
        server.join().unwrap();
    }

    #[test]
    fn test_reconnects_once_after_close() {
        let (address, server) = fake_inverter(2, |index, mut stream| {
            let request = read_request(&mut stream);
            if index == 0 {
                // Drop the connection without answering.
                return;
            }
            let mut response = [0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x01, 0x2C];
            response[..2].copy_from_slice(&request[..2]);
            stream.write_all(&response).unwrap();
        });

        let mut tcp = transport(address);
        assert_eq!(tcp.read_holding_registers(255, 33000, 1).unwrap().as_slice(), &[300]);
        assert!(tcp.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_not_connected_when_nobody_listens() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let mut tcp = transport(address);
        assert_eq!(tcp.connect(), Err(ModbusError::NotConnected));
        assert!(!tcp.is_connected());
        assert_eq!(
            tcp.read_holding_registers(255, 33000, 1),
            Err(ModbusError::NotConnected)
        );
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (address, server) = fake_inverter(1, |_, _stream| {});
        let mut tcp = transport(address);
        tcp.connect().unwrap();
        tcp.connect().unwrap();
        assert!(tcp.is_connected());
        tcp.disconnect();
        assert!(!tcp.is_connected());
        server.join().unwrap();
    }
}
