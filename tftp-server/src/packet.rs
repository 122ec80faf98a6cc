//! Wire-format definitions for TFTP packets.
//!
//! Every datagram exchanged with a client is one of four packet kinds.  This
//! module is responsible for:
//! - Defining the on-wire binary layout of each kind.
//! - Serialising a packet into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a packet, returning errors for
//!   malformed, truncated, or oversized input.
//!
//! No I/O happens here apart from pulling block payloads out of a
//! [`std::io::Read`] source in [`encode_data_block`].
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  RRQ    | 01 | filename | 0 | mode    | 0 |
//!  DATA   | 03 | block    | payload (0..=512 bytes)
//!  ACK    | 04 | block    |
//!  ERROR  | 05 | code     | message | 0 |
//! ```
//!
//! Opcode 2 (write request) is reserved and rejected.  A datagram never
//! exceeds [`DATAGRAM_SIZE`] bytes.

use std::io::{self, Read};

use thiserror::Error;

/// Largest datagram either side may send: header + one full block.
pub const DATAGRAM_SIZE: usize = 516;

/// Opcode + block number (or opcode + error code).
pub const HEADER_LEN: usize = 4;

/// Maximum payload carried by one DATA packet.
pub const BLOCK_SIZE: usize = DATAGRAM_SIZE - HEADER_LEN;

/// The only transfer mode this server speaks.
pub const OCTET_MODE: &str = "octet";

const OFF_OPCODE: usize = 0;
const OFF_BLOCK: usize = 2;
const OFF_CODE: usize = 2;

// ---------------------------------------------------------------------------
// Opcodes and error codes
// ---------------------------------------------------------------------------

/// Packet kind tag, the first 16-bit field of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    ReadRequest = 1,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl OpCode {
    /// Map a wire value to a supported opcode.  Write requests (2) and
    /// anything unassigned yield `None`.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes carried by ERROR packets (RFC 1350 appendix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    NotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Unassigned wire values collapse to [`ErrorCode::Unknown`].
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::NotFound,
            2 => Self::AccessViolation,
            3 => Self::DiskFull,
            4 => Self::IllegalOperation,
            5 => Self::UnknownTransferId,
            6 => Self::FileExists,
            7 => Self::NoSuchUser,
            _ => Self::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the smallest legal packet of the expected kind.
    #[error("datagram of {len} bytes is shorter than the {min}-byte minimum")]
    BufferTooShort { len: usize, min: usize },
    /// Buffer longer than the largest legal packet of the expected kind.
    #[error("datagram of {len} bytes exceeds the {max}-byte maximum")]
    BufferTooLong { len: usize, max: usize },
    /// Leading tag is not the expected (or any supported) opcode.
    #[error("invalid opcode {0}")]
    InvalidOpcode(u16),
    /// A text field is unterminated, empty, not UTF-8, or carries an
    /// unsupported value.
    #[error("malformed {field}: {reason}")]
    MalformedField {
        field: &'static str,
        reason: &'static str,
    },
}

fn malformed(field: &'static str, reason: &'static str) -> PacketError {
    PacketError::MalformedField { field, reason }
}

// ---------------------------------------------------------------------------
// Read request
// ---------------------------------------------------------------------------

/// A read request (RRQ).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub filename: String,
    /// Transfer mode as sent on the wire.  Empty means [`OCTET_MODE`] when
    /// encoding.
    pub mode: String,
}

impl ReadRequest {
    /// An octet-mode request for `filename`.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mode: OCTET_MODE.to_string(),
        }
    }

    /// Serialise this request.
    ///
    /// Fails if either field is empty or contains a NUL byte, or if the
    /// encoded request would not fit in one datagram.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mode = if self.mode.is_empty() {
            OCTET_MODE
        } else {
            self.mode.as_str()
        };
        check_text("filename", &self.filename)?;
        if self.filename.is_empty() {
            return Err(malformed("filename", "empty"));
        }
        check_text("mode", mode)?;

        let len = 2 + self.filename.len() + 1 + mode.len() + 1;
        if len > DATAGRAM_SIZE {
            return Err(PacketError::BufferTooLong {
                len,
                max: DATAGRAM_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(OpCode::ReadRequest as u16).to_be_bytes());
        buf.extend_from_slice(self.filename.as_bytes());
        buf.push(0);
        buf.extend_from_slice(mode.as_bytes());
        buf.push(0);
        Ok(buf)
    }

    /// Parse a read request.
    ///
    /// The mode is matched case-insensitively against [`OCTET_MODE`]; any
    /// other mode is rejected.  Bytes after the mode terminator (option
    /// extensions) are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        check_bounds(buf, 2, DATAGRAM_SIZE)?;
        expect_opcode(buf, OpCode::ReadRequest)?;

        let (filename, rest) = split_text("filename", &buf[2..])?;
        let (mode, _options) = split_text("mode", rest)?;
        if !mode.eq_ignore_ascii_case(OCTET_MODE) {
            return Err(malformed("mode", "only octet transfers are supported"));
        }

        Ok(Self {
            filename: filename.to_string(),
            mode: mode.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// A DATA packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub block: u16,
    pub payload: Vec<u8>,
}

impl Data {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > BLOCK_SIZE {
            return Err(PacketError::BufferTooLong {
                len: HEADER_LEN + self.payload.len(),
                max: DATAGRAM_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&(OpCode::Data as u16).to_be_bytes());
        buf.extend_from_slice(&self.block.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        check_bounds(buf, HEADER_LEN, DATAGRAM_SIZE)?;
        expect_opcode(buf, OpCode::Data)?;
        Ok(Self {
            block: read_u16(buf, OFF_BLOCK),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// `true` when this packet ends the transfer.
    pub fn is_final(&self) -> bool {
        self.payload.len() < BLOCK_SIZE
    }
}

/// Encode the next DATA packet of a transfer.
///
/// Increments `block` (wrapping at 65536) *before* writing it, so the first
/// call of a transfer yields block 1.  Copies up to [`BLOCK_SIZE`] bytes from
/// `source` and returns the datagram together with the number of payload
/// bytes copied; a count below [`BLOCK_SIZE`] marks the final block.
pub fn encode_data_block<R: Read>(block: &mut u16, source: &mut R) -> io::Result<(Vec<u8>, usize)> {
    *block = block.wrapping_add(1);

    let mut buf = Vec::with_capacity(DATAGRAM_SIZE);
    buf.extend_from_slice(&(OpCode::Data as u16).to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    let copied = source.by_ref().take(BLOCK_SIZE as u64).read_to_end(&mut buf)?;
    Ok((buf, copied))
}

// ---------------------------------------------------------------------------
// Ack
// ---------------------------------------------------------------------------

/// An ACK packet acknowledging exactly one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub block: u16,
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&(OpCode::Ack as u16).to_be_bytes());
        buf.extend_from_slice(&self.block.to_be_bytes());
        buf
    }

    /// Parse an ACK.  The layout is fixed, so anything but 4 bytes fails.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        check_bounds(buf, HEADER_LEN, HEADER_LEN)?;
        expect_opcode(buf, OpCode::Ack)?;
        Ok(Self {
            block: read_u16(buf, OFF_BLOCK),
        })
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An ERROR packet.  Terminates the transfer on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPacket {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        check_text("message", &self.message)?;
        let len = HEADER_LEN + self.message.len() + 1;
        if len > DATAGRAM_SIZE {
            return Err(PacketError::BufferTooLong {
                len,
                max: DATAGRAM_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(OpCode::Error as u16).to_be_bytes());
        buf.extend_from_slice(&(self.code as u16).to_be_bytes());
        buf.extend_from_slice(self.message.as_bytes());
        buf.push(0);
        Ok(buf)
    }

    /// Parse an ERROR packet.  The message may be empty but must be
    /// NUL-terminated; invalid UTF-8 is replaced rather than rejected so the
    /// remote text can always be logged.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        check_bounds(buf, HEADER_LEN, DATAGRAM_SIZE)?;
        expect_opcode(buf, OpCode::Error)?;
        let rest = &buf[HEADER_LEN..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("message", "missing terminator"))?;
        Ok(Self {
            code: ErrorCode::from_u16(read_u16(buf, OFF_CODE)),
            message: String::from_utf8_lossy(&rest[..end]).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Any packet
// ---------------------------------------------------------------------------

/// Any packet this codec understands, dispatched on the leading opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest(ReadRequest),
    Data(Data),
    Ack(Ack),
    Error(ErrorPacket),
}

impl Packet {
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        check_bounds(buf, 2, DATAGRAM_SIZE)?;
        let raw = read_u16(buf, OFF_OPCODE);
        match OpCode::from_u16(raw) {
            Some(OpCode::ReadRequest) => ReadRequest::decode(buf).map(Self::ReadRequest),
            Some(OpCode::Data) => Data::decode(buf).map(Self::Data),
            Some(OpCode::Ack) => Ack::decode(buf).map(Self::Ack),
            Some(OpCode::Error) => ErrorPacket::decode(buf).map(Self::Error),
            None => Err(PacketError::InvalidOpcode(raw)),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            Self::ReadRequest(rrq) => rrq.encode(),
            Self::Data(data) => data.encode(),
            Self::Ack(ack) => Ok(ack.encode()),
            Self::Error(err) => err.encode(),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Self::ReadRequest(_) => OpCode::ReadRequest,
            Self::Data(_) => OpCode::Data,
            Self::Ack(_) => OpCode::Ack,
            Self::Error(_) => OpCode::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn check_bounds(buf: &[u8], min: usize, max: usize) -> Result<(), PacketError> {
    let len = buf.len();
    if len < min {
        return Err(PacketError::BufferTooShort { len, min });
    }
    if len > max {
        return Err(PacketError::BufferTooLong { len, max });
    }
    Ok(())
}

/// Caller must have checked that `buf` holds at least two bytes.
fn expect_opcode(buf: &[u8], expected: OpCode) -> Result<(), PacketError> {
    let raw = read_u16(buf, OFF_OPCODE);
    if raw != expected as u16 {
        return Err(PacketError::InvalidOpcode(raw));
    }
    Ok(())
}

/// Split a NUL-terminated, non-empty UTF-8 field off the front of `buf`.
fn split_text<'a>(field: &'static str, buf: &'a [u8]) -> Result<(&'a str, &'a [u8]), PacketError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed(field, "missing terminator"))?;
    if end == 0 {
        return Err(malformed(field, "empty"));
    }
    let text = std::str::from_utf8(&buf[..end]).map_err(|_| malformed(field, "not valid UTF-8"))?;
    Ok((text, &buf[end + 1..]))
}

fn check_text(field: &'static str, text: &str) -> Result<(), PacketError> {
    if text.as_bytes().contains(&0) {
        return Err(malformed(field, "contains a NUL byte"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rrq_bytes(filename: &str, mode: &str) -> Vec<u8> {
        let mut buf = vec![0, 1];
        buf.extend_from_slice(filename.as_bytes());
        buf.push(0);
        buf.extend_from_slice(mode.as_bytes());
        buf.push(0);
        buf
    }

    #[test]
    fn read_request_roundtrip() {
        let rrq = ReadRequest::new("boot.img");
        assert_eq!(ReadRequest::decode(&rrq.encode().unwrap()).unwrap(), rrq);
    }

    #[test]
    fn read_request_roundtrip_max_filename() {
        // 2 + 507 + 1 + "octet" + 1 = 516
        let rrq = ReadRequest::new("f".repeat(507));
        let bytes = rrq.encode().unwrap();
        assert_eq!(bytes.len(), DATAGRAM_SIZE);
        assert_eq!(ReadRequest::decode(&bytes).unwrap(), rrq);
    }

    #[test]
    fn read_request_too_long_to_encode() {
        let rrq = ReadRequest::new("f".repeat(508));
        assert_eq!(
            rrq.encode(),
            Err(PacketError::BufferTooLong {
                len: DATAGRAM_SIZE + 1,
                max: DATAGRAM_SIZE
            })
        );
    }

    #[test]
    fn read_request_empty_mode_defaults_to_octet() {
        let rrq = ReadRequest {
            filename: "a".into(),
            mode: String::new(),
        };
        assert_eq!(rrq.encode().unwrap(), rrq_bytes("a", "octet"));
    }

    #[test]
    fn read_request_layout() {
        let bytes = ReadRequest::new("ab").encode().unwrap();
        assert_eq!(bytes, b"\x00\x01ab\x00octet\x00");
    }

    #[test]
    fn read_request_mixed_case_mode_accepted() {
        let rrq = ReadRequest::decode(&rrq_bytes("x", "OCTET")).unwrap();
        assert_eq!(rrq.filename, "x");
        assert_eq!(rrq.mode, "OCTET");
    }

    #[test]
    fn read_request_netascii_rejected() {
        assert!(matches!(
            ReadRequest::decode(&rrq_bytes("x", "netascii")),
            Err(PacketError::MalformedField { field: "mode", .. })
        ));
    }

    #[test]
    fn read_request_write_opcode_rejected() {
        let mut bytes = rrq_bytes("x", "octet");
        bytes[1] = 2;
        assert_eq!(ReadRequest::decode(&bytes), Err(PacketError::InvalidOpcode(2)));
        assert_eq!(Packet::decode(&bytes), Err(PacketError::InvalidOpcode(2)));
    }

    #[test]
    fn read_request_missing_terminators_rejected() {
        assert!(matches!(
            ReadRequest::decode(b"\x00\x01file"),
            Err(PacketError::MalformedField { field: "filename", .. })
        ));
        assert!(matches!(
            ReadRequest::decode(b"\x00\x01file\x00octet"),
            Err(PacketError::MalformedField { field: "mode", .. })
        ));
    }

    #[test]
    fn read_request_empty_fields_rejected() {
        assert!(matches!(
            ReadRequest::decode(&rrq_bytes("", "octet")),
            Err(PacketError::MalformedField { field: "filename", .. })
        ));
        assert!(matches!(
            ReadRequest::decode(&rrq_bytes("x", "")),
            Err(PacketError::MalformedField { field: "mode", .. })
        ));
    }

    #[test]
    fn read_request_trailing_options_ignored() {
        let mut bytes = rrq_bytes("x", "octet");
        bytes.extend_from_slice(b"blksize\x001024\x00");
        assert_eq!(ReadRequest::decode(&bytes).unwrap().filename, "x");
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(
            Packet::decode(&[]),
            Err(PacketError::BufferTooShort { len: 0, min: 2 })
        );
    }

    #[test]
    fn data_roundtrip_full_and_empty() {
        for payload in [vec![0xab; BLOCK_SIZE], Vec::new()] {
            let data = Data { block: 7, payload };
            assert_eq!(Data::decode(&data.encode().unwrap()).unwrap(), data);
        }
    }

    #[test]
    fn data_decode_bounds() {
        assert_eq!(
            Data::decode(&[0, 3, 0]),
            Err(PacketError::BufferTooShort { len: 3, min: 4 })
        );
        let mut oversized = vec![0, 3, 0, 1];
        oversized.extend_from_slice(&[0; BLOCK_SIZE + 1]);
        assert_eq!(
            Data::decode(&oversized),
            Err(PacketError::BufferTooLong {
                len: DATAGRAM_SIZE + 1,
                max: DATAGRAM_SIZE
            })
        );
        assert_eq!(Data::decode(&[0, 4, 0, 1]), Err(PacketError::InvalidOpcode(4)));
    }

    #[test]
    fn encode_data_block_numbers_from_one() {
        let mut source = Cursor::new(vec![1u8; 1000]);
        let mut block = 0;

        let (first, n1) = encode_data_block(&mut block, &mut source).unwrap();
        let (second, n2) = encode_data_block(&mut block, &mut source).unwrap();

        assert_eq!((n1, n2), (BLOCK_SIZE, 488));
        let first = Data::decode(&first).unwrap();
        let second = Data::decode(&second).unwrap();
        assert_eq!((first.block, second.block), (1, 2));
        assert!(!first.is_final());
        assert!(second.is_final());
    }

    #[test]
    fn encode_data_block_exhausted_source_yields_empty_block() {
        let mut source = Cursor::new(vec![9u8; BLOCK_SIZE]);
        let mut block = 0;
        encode_data_block(&mut block, &mut source).unwrap();
        let (bytes, n) = encode_data_block(&mut block, &mut source).unwrap();
        assert_eq!(n, 0);
        assert_eq!(bytes, vec![0, 3, 0, 2]);
    }

    #[test]
    fn encode_data_block_wraps_to_zero() {
        let mut source = Cursor::new(vec![0u8; 10]);
        let mut block = u16::MAX;
        let (bytes, _) = encode_data_block(&mut block, &mut source).unwrap();
        assert_eq!(block, 0);
        assert_eq!(&bytes[..HEADER_LEN], &[0, 3, 0, 0]);
    }

    #[test]
    fn ack_roundtrip_and_layout() {
        let ack = Ack { block: 0x0102 };
        let bytes = ack.encode();
        assert_eq!(bytes, vec![0, 4, 1, 2]);
        assert_eq!(Ack::decode(&bytes).unwrap(), ack);
    }

    #[test]
    fn ack_decode_rejects_wrong_opcode_and_length() {
        assert_eq!(Ack::decode(&[0, 3, 0, 1]), Err(PacketError::InvalidOpcode(3)));
        assert_eq!(
            Ack::decode(&[0, 4, 0, 1, 0]),
            Err(PacketError::BufferTooLong { len: 5, max: 4 })
        );
        assert_eq!(
            Ack::decode(&[0, 4, 0]),
            Err(PacketError::BufferTooShort { len: 3, min: 4 })
        );
    }

    #[test]
    fn error_roundtrip_max_message() {
        // 4 + 511 + 1 = 516
        let err = ErrorPacket::new(ErrorCode::DiskFull, "m".repeat(511));
        let bytes = err.encode().unwrap();
        assert_eq!(bytes.len(), DATAGRAM_SIZE);
        assert_eq!(ErrorPacket::decode(&bytes).unwrap(), err);
    }

    #[test]
    fn error_roundtrip_every_code() {
        for raw in 0..=7u16 {
            let err = ErrorPacket::new(ErrorCode::from_u16(raw), "");
            let decoded = ErrorPacket::decode(&err.encode().unwrap()).unwrap();
            assert_eq!(decoded.code as u16, raw);
            assert_eq!(decoded, err);
        }
    }

    #[test]
    fn error_decode_rejects_wrong_opcode_and_missing_terminator() {
        assert_eq!(
            ErrorPacket::decode(b"\x00\x04\x00\x01"),
            Err(PacketError::InvalidOpcode(4))
        );
        assert!(matches!(
            ErrorPacket::decode(b"\x00\x05\x00\x01oops"),
            Err(PacketError::MalformedField { field: "message", .. })
        ));
    }

    #[test]
    fn unassigned_error_code_maps_to_unknown() {
        let err = ErrorPacket::decode(b"\x00\x05\x00\x63hi\x00").unwrap();
        assert_eq!(err.code, ErrorCode::Unknown);
        assert_eq!(err.message, "hi");
    }

    #[test]
    fn packet_dispatches_on_opcode() {
        let ack = Packet::decode(&[0, 4, 0, 9]).unwrap();
        assert_eq!(ack, Packet::Ack(Ack { block: 9 }));
        assert_eq!(ack.opcode(), OpCode::Ack);

        let err = Packet::Error(ErrorPacket::new(ErrorCode::NotFound, "nope"));
        assert_eq!(Packet::decode(&err.encode().unwrap()).unwrap(), err);

        assert_eq!(Packet::decode(&[0, 9, 0, 0]), Err(PacketError::InvalidOpcode(9)));
    }
}
