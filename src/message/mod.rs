//! Wire framing for BFCP messages.
//!
//! Full BFCP primitive parsing/serialization is out of scope for this
//! crate (see `SPEC_FULL.md` §1); this module provides only what the
//! connection engine needs to frame, route, and account for messages:
//! a fixed 12-byte common header and a thin "opaque bytes + accessors"
//! wrapper around a complete message buffer.

use crate::error::{Error, ErrorKind, Result};

/// Size, in bytes, of the BFCP common header.
pub const HEADER_LENGTH: usize = 12;

/// Hard cap on a framed BFCP message, header included.
///
/// Preserved from the original implementation's fixed buffer constant
/// (see `SPEC_FULL.md` §6).
pub const BFCP_MAX_ALLOWED_SIZE: usize = 65536;

/// A BFCP primitive kind, classified into the request-starting and
/// answer-bearing sets used to drive transaction bookkeeping.
///
/// See the Glossary in `SPEC_FULL.md` for the authoritative membership
/// of each set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Primitive {
    FloorRequest = 1,
    FloorRelease = 2,
    FloorRequestQuery = 3,
    FloorRequestStatus = 4,
    UserQuery = 5,
    UserStatus = 6,
    FloorQuery = 7,
    FloorStatus = 8,
    ChairAction = 9,
    ChairActionAck = 10,
    Hello = 11,
    HelloAck = 12,
    Goodbye = 13,
    GoodbyeAck = 14,
    FloorRequestStatusAck = 15,
    FloorStatusAck = 16,
}

impl Primitive {
    fn from_u8(v: u8) -> Option<Self> {
        use Primitive::*;
        Some(match v {
            1 => FloorRequest,
            2 => FloorRelease,
            3 => FloorRequestQuery,
            4 => FloorRequestStatus,
            5 => UserQuery,
            6 => UserStatus,
            7 => FloorQuery,
            8 => FloorStatus,
            9 => ChairAction,
            10 => ChairActionAck,
            11 => Hello,
            12 => HelloAck,
            13 => Goodbye,
            14 => GoodbyeAck,
            15 => FloorRequestStatusAck,
            16 => FloorStatusAck,
            _ => return None,
        })
    }

    /// Whether this primitive starts a transaction (a *request*, in the
    /// RFC sense used by `SPEC_FULL.md`'s Glossary).
    ///
    /// `FloorRequestStatus` can itself start a transaction (a server
    /// pushing an unsolicited status update), so it appears in both sets.
    pub fn starts_transaction(self) -> bool {
        use Primitive::*;
        matches!(
            self,
            FloorRequest
                | FloorRelease
                | FloorRequestStatus
                | FloorRequestQuery
                | UserQuery
                | FloorQuery
                | ChairAction
                | Hello
                | Goodbye
        )
    }

    /// Whether this primitive answers a transaction.
    pub fn is_answer(self) -> bool {
        use Primitive::*;
        matches!(
            self,
            FloorRequestStatus
                | UserStatus
                | FloorStatus
                | ChairActionAck
                | HelloAck
                | FloorRequestStatusAck
                | FloorStatusAck
                | GoodbyeAck
        )
    }
}

/// The 12-byte common header prefixing every BFCP message on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub primitive: u8,
    /// Length of the payload, in 4-byte units, excluding the header.
    pub length_units: u16,
    pub transaction_id: u16,
    pub conference_id: u32,
    pub user_id: u16,
    _reserved: u16,
}

impl Header {
    pub fn new(primitive: Primitive, transaction_id: u16) -> Self {
        Header {
            version: 1,
            primitive: primitive as u8,
            length_units: 0,
            transaction_id,
            conference_id: 0,
            user_id: 0,
            _reserved: 0,
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        Primitive::from_u8(self.primitive)
    }

    /// Total framed message size, header included, per `SPEC_FULL.md` §6.
    pub fn total_size(&self) -> usize {
        self.length_units as usize * 4 + HEADER_LENGTH
    }

    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::simple(ErrorKind::ParseError));
        }
        buf[0] = self.version;
        buf[1] = self.primitive;
        buf[2..4].copy_from_slice(&self.length_units.to_be_bytes());
        buf[4..6].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.conference_id.to_be_bytes());
        buf[10..12].copy_from_slice(&self.user_id.to_be_bytes());
        Ok(())
    }

    pub fn deserialize_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::simple(ErrorKind::ParseError));
        }
        Ok(Header {
            version: buf[0],
            primitive: buf[1],
            length_units: u16::from_be_bytes([buf[2], buf[3]]),
            transaction_id: u16::from_be_bytes([buf[4], buf[5]]),
            conference_id: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            user_id: u16::from_be_bytes([buf[10], buf[11]]),
            _reserved: 0,
        })
    }
}

/// A complete, framed BFCP message: an opaque byte buffer plus the
/// accessor functions the connection engine needs (transaction ID,
/// primitive kind, total length).
#[derive(Debug, Clone)]
pub struct BfcpMessage {
    header: Header,
    bytes: Vec<u8>,
}

impl BfcpMessage {
    /// Builds a message from a header and a payload (the payload must
    /// already be padded to a multiple of 4 bytes by the caller; this
    /// crate does not know the primitive grammar well enough to pad it).
    pub fn new(mut header: Header, payload: &[u8]) -> Self {
        debug_assert_eq!(payload.len() % 4, 0, "BFCP payloads are padded to 4-byte units");
        header.length_units = (payload.len() / 4) as u16;
        let mut bytes = vec![0u8; HEADER_LENGTH + payload.len()];
        header.serialize_into(&mut bytes).expect("buffer sized for header");
        bytes[HEADER_LENGTH..].copy_from_slice(payload);
        BfcpMessage { header, bytes }
    }

    /// Parses a complete, already-framed buffer (header + full payload).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = Header::deserialize_from(&bytes)?;
        if bytes.len() < header.total_size() {
            return Err(Error::simple(ErrorKind::ParseError));
        }
        if header.primitive().is_none() {
            return Err(Error::simple(ErrorKind::ParseError));
        }
        Ok(BfcpMessage { header, bytes })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    pub fn primitive(&self) -> Option<Primitive> {
        self.header.primitive()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header::new(Primitive::FloorRequest, 42);
        let mut buf = [0u8; HEADER_LENGTH];
        header.serialize_into(&mut buf).unwrap();
        let decoded = Header::deserialize_from(&buf).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.transaction_id, 42);
        assert_eq!(decoded.primitive(), Some(Primitive::FloorRequest));
    }

    #[test]
    fn total_size_matches_length_units_formula() {
        let payload = [0u8; 8];
        let msg = BfcpMessage::new(Header::new(Primitive::Hello, 1), &payload);
        assert_eq!(msg.header().total_size(), HEADER_LENGTH + 8);
        assert_eq!(msg.len(), HEADER_LENGTH + 8);
    }

    #[test]
    fn from_bytes_rejects_short_buffers() {
        let err = BfcpMessage::from_bytes(vec![0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn from_bytes_rejects_unknown_primitive() {
        let mut header = Header::new(Primitive::Hello, 1);
        header.primitive = 255;
        let mut buf = vec![0u8; HEADER_LENGTH];
        header.serialize_into(&mut buf).unwrap();
        let err = BfcpMessage::from_bytes(buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn primitive_classification_matches_glossary_sets() {
        assert!(Primitive::FloorRequest.starts_transaction());
        assert!(!Primitive::FloorRequest.is_answer());
        assert!(Primitive::HelloAck.is_answer());
        assert!(!Primitive::HelloAck.starts_transaction());
        // FloorRequestStatus is dual-mode: server-initiated push, or an answer.
        assert!(Primitive::FloorRequestStatus.starts_transaction());
        assert!(Primitive::FloorRequestStatus.is_answer());
    }
}
