//! Byte-level Modbus framing for the serial (RTU) and network (TCP) transports.
//!
//! Requests are assembled with rmodbus. Responses are validated here so that
//! each failure maps onto exactly one [`ModbusError`], checked in a fixed
//! order: responder identity, function code, exception flag, then integrity
//! (CRC for serial, transaction id for network).

use rmodbus::{ModbusProto, client::ModbusRequest};

use crate::error::{ModbusError, Result};

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Set on the echoed function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Protocol limit for a single read holding registers request.
pub const MAX_READ_REGISTERS: usize = 125;

/// `[unitId][function][exceptionCode][crcLo][crcHi]`
pub const RTU_EXCEPTION_LEN: usize = 5;
/// Write single register requests and their echoes.
pub const RTU_WRITE_LEN: usize = 8;

/// `[tidHi][tidLo][0x00][0x00][lenHi][lenLo]`
pub const MBAP_HEADER_LEN: usize = 6;
/// Header plus unit id, function code and four bytes of payload.
pub const TCP_WRITE_LEN: usize = 12;

pub type Frame = heapless::Vec<u8, 260>;
pub type Registers = heapless::Vec<u16, MAX_READ_REGISTERS>;

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Expected length of a successful RTU read response.
pub const fn rtu_read_response_len(count: u8) -> usize {
    5 + 2 * count as usize
}

/// Expected length of a successful TCP read response.
pub const fn tcp_read_response_len(count: u8) -> usize {
    MBAP_HEADER_LEN + 3 + 2 * count as usize
}

fn check_count(count: u8) -> Result<()> {
    if count == 0 || count as usize > MAX_READ_REGISTERS {
        return Err(ModbusError::IncompleteFrame);
    }
    Ok(())
}

/// `[unitId][0x03][addrHi][addrLo][0x00][count][crcLo][crcHi]`
pub fn rtu_read_request(unit_id: u8, address: u16, count: u8) -> Result<Frame> {
    check_count(count)?;
    let mut frame = Frame::new();
    let mut req = ModbusRequest::new(unit_id, ModbusProto::Rtu);
    req.generate_get_holdings(address, count as u16, &mut frame)?;
    Ok(frame)
}

/// `[unitId][0x06][addrHi][addrLo][valHi][valLo][crcLo][crcHi]`
pub fn rtu_write_request(unit_id: u8, address: u16, value: u16) -> Result<Frame> {
    let mut frame = Frame::new();
    let mut req = ModbusRequest::new(unit_id, ModbusProto::Rtu);
    req.generate_set_holding(address, value, &mut frame)?;
    Ok(frame)
}

/// Total RTU response length, known once the first two bytes have arrived.
pub fn rtu_response_len(function: u8, success_len: usize) -> usize {
    if function & EXCEPTION_FLAG != 0 {
        RTU_EXCEPTION_LEN
    } else {
        success_len
    }
}

/// Checks shared by every RTU response: unit id, function code, exception flag, CRC.
fn validate_rtu(unit_id: u8, function: u8, frame: &[u8]) -> Result<()> {
    if frame.len() < RTU_EXCEPTION_LEN {
        return Err(ModbusError::IncompleteFrame);
    }
    if frame[0] != unit_id {
        return Err(ModbusError::UnexpectedResponse);
    }
    if frame[1] & !EXCEPTION_FLAG != function {
        return Err(ModbusError::UnexpectedResponse);
    }
    if frame[1] & EXCEPTION_FLAG != 0 {
        return Err(ModbusError::ExceptionResponse(frame[2]));
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc[0], crc[1]]);
    if received != crc16(body) {
        return Err(ModbusError::ChecksumFailure);
    }
    Ok(())
}

/// Validate an RTU read response and unpack its register values.
pub fn parse_rtu_read_response(unit_id: u8, count: u8, frame: &[u8]) -> Result<Registers> {
    validate_rtu(unit_id, READ_HOLDING_REGISTERS, frame)?;
    if frame.len() != rtu_read_response_len(count) {
        return Err(ModbusError::IncompleteFrame);
    }
    unpack_registers(count, &frame[2..frame.len() - 2])
}

/// Validate the echo of a write single register request.
pub fn parse_rtu_write_response(request: &[u8], frame: &[u8]) -> Result<()> {
    validate_rtu(request[0], WRITE_SINGLE_REGISTER, frame)?;
    if frame != request {
        return Err(ModbusError::UnexpectedResponse);
    }
    Ok(())
}

/// `[tidHi][tidLo][0x00][0x00][0x00][0x06][unitId][0x03][addrHi][addrLo][0x00][count]`
pub fn tcp_read_request(transaction_id: u16, unit_id: u8, address: u16, count: u8) -> Result<Frame> {
    check_count(count)?;
    let mut frame = Frame::new();
    let mut req = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    req.generate_get_holdings(address, count as u16, &mut frame)?;
    set_transaction_id(&mut frame, transaction_id)?;
    Ok(frame)
}

/// `[tidHi][tidLo][0x00][0x00][0x00][0x06][unitId][0x06][addrHi][addrLo][valHi][valLo]`
pub fn tcp_write_request(transaction_id: u16, unit_id: u8, address: u16, value: u16) -> Result<Frame> {
    let mut frame = Frame::new();
    let mut req = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    req.generate_set_holding(address, value, &mut frame)?;
    set_transaction_id(&mut frame, transaction_id)?;
    Ok(frame)
}

fn set_transaction_id(frame: &mut Frame, transaction_id: u16) -> Result<()> {
    if frame.len() < MBAP_HEADER_LEN {
        return Err(ModbusError::IncompleteFrame);
    }
    frame[..2].copy_from_slice(&transaction_id.to_be_bytes());
    Ok(())
}

/// Number of bytes following the MBAP header, as announced by the header itself.
pub fn tcp_remaining_len(header: &[u8]) -> Result<usize> {
    if header.len() < MBAP_HEADER_LEN {
        return Err(ModbusError::IncompleteFrame);
    }
    if header[2] != 0 || header[3] != 0 {
        return Err(ModbusError::UnexpectedResponse);
    }
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    // Unit id and function code at least, and nothing a Modbus PDU could not hold.
    if !(2..=254).contains(&length) {
        return Err(ModbusError::UnexpectedResponse);
    }
    Ok(length)
}

/// Checks shared by every TCP response: unit id, function code, exception flag, transaction id.
fn validate_tcp(transaction_id: u16, unit_id: u8, function: u8, frame: &[u8]) -> Result<()> {
    let remaining = tcp_remaining_len(frame)?;
    if frame.len() != MBAP_HEADER_LEN + remaining {
        return Err(ModbusError::IncompleteFrame);
    }
    if frame[6] != unit_id {
        return Err(ModbusError::UnexpectedResponse);
    }
    if frame[7] & !EXCEPTION_FLAG != function {
        return Err(ModbusError::UnexpectedResponse);
    }
    if frame[7] & EXCEPTION_FLAG != 0 {
        let code = frame.get(8).copied().unwrap_or_default();
        return Err(ModbusError::ExceptionResponse(code));
    }
    if u16::from_be_bytes([frame[0], frame[1]]) != transaction_id {
        return Err(ModbusError::UnexpectedResponse);
    }
    Ok(())
}

/// Validate a TCP read response and unpack its register values.
pub fn parse_tcp_read_response(
    transaction_id: u16,
    unit_id: u8,
    count: u8,
    frame: &[u8],
) -> Result<Registers> {
    validate_tcp(transaction_id, unit_id, READ_HOLDING_REGISTERS, frame)?;
    if frame.len() != tcp_read_response_len(count) {
        return Err(ModbusError::UnexpectedResponse);
    }
    unpack_registers(count, &frame[MBAP_HEADER_LEN + 2..])
}

/// Validate the acknowledgement of a TCP write single register request.
pub fn parse_tcp_write_response(request: &[u8], frame: &[u8]) -> Result<()> {
    if request.len() != TCP_WRITE_LEN {
        return Err(ModbusError::IncompleteFrame);
    }
    let transaction_id = u16::from_be_bytes([request[0], request[1]]);
    validate_tcp(transaction_id, request[6], WRITE_SINGLE_REGISTER, frame)?;
    if frame != request {
        return Err(ModbusError::UnexpectedResponse);
    }
    Ok(())
}

/// `payload` starts at the byte count field.
fn unpack_registers(count: u8, payload: &[u8]) -> Result<Registers> {
    let (&byte_count, data) = payload
        .split_first()
        .ok_or(ModbusError::IncompleteFrame)?;
    if byte_count as usize != 2 * count as usize || data.len() != byte_count as usize {
        return Err(ModbusError::UnexpectedResponse);
    }
    let mut registers = Registers::new();
    for pair in data.chunks_exact(2) {
        registers
            .push(u16::from_be_bytes([pair[0], pair[1]]))
            .map_err(|_| ModbusError::IncompleteFrame)?;
    }
    Ok(registers)
}
