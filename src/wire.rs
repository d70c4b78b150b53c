//! Wire format for the backbone registration exchange.
//!
//! Cursor-based encoding over fixed-size fields. Only the fields this core
//! reads or writes are modeled; transport framing and retransmission belong
//! to the transport collaborator.
//!
//! ```text
//! Request:  type (1) || op (1) || target (16) || ml_iid (8) || last_transaction (4, BE secs)
//! Response: type (1) || status (1) || target (16)
//! Notice:   type (1) || status (1) || target (16)
//! ```
//!
//! Unknown message types, unknown status codes, and short buffers fail to
//! decode; callers drop such messages silently.

use alloc::vec::Vec;

use crate::types::{
    Ip6Address, InterfaceIdentifier, RegistrationOp, RegistrationStatus, MSG_REGISTRATION_NOTICE,
    MSG_REGISTRATION_REQUEST, MSG_REGISTRATION_RESPONSE,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Unknown message type byte.
    InvalidMessageType,
    /// Unknown status or operation code.
    InvalidValue,
    /// Bytes left over after the message.
    TrailingBytes,
}

/// Reader over a received byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + len > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a u32 in big-endian format.
    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 16-byte IPv6 address.
    pub fn read_address(&mut self) -> Result<Ip6Address, DecodeError> {
        let b = self.read_bytes(16)?;
        let mut addr = [0u8; 16];
        addr.copy_from_slice(b);
        Ok(addr)
    }

    /// Read an 8-byte interface identifier.
    pub fn read_iid(&mut self) -> Result<InterfaceIdentifier, DecodeError> {
        let b = self.read_bytes(8)?;
        let mut iid = [0u8; 8];
        iid.copy_from_slice(b);
        Ok(iid)
    }
}

/// Writer for encoding messages.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a u32 in big-endian format.
    pub fn write_u32_be(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a 16-byte IPv6 address.
    pub fn write_address(&mut self, addr: &Ip6Address) {
        self.buf.extend_from_slice(addr);
    }

    /// Append an 8-byte interface identifier.
    pub fn write_iid(&mut self, iid: &InterfaceIdentifier) {
        self.buf.extend_from_slice(iid);
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Registration request sent to the primary Backbone Router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Register or release the target.
    pub op: RegistrationOp,
    /// Address being (de-)registered.
    pub target: Ip6Address,
    /// Mesh-local identifier of the registrant (the child's, for proxy).
    pub ml_iid: InterfaceIdentifier,
    /// Seconds since the registrant last communicated (0 = fresh).
    pub last_transaction_secs: u32,
}

/// Response to a registration request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistrationResponse {
    /// Outcome reported by the Backbone Router.
    pub status: RegistrationStatus,
    /// Echo of the request's target address.
    pub target: Ip6Address,
}

/// Unsolicited notification from the backbone side.
///
/// A Backbone Router sends this to revoke or re-validate a registration it
/// previously accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistrationNotice {
    /// Why the registration must be redone.
    pub status: RegistrationStatus,
    /// Address whose registration is affected.
    pub target: Ip6Address,
}

/// Any message of the registration exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Request(RegistrationRequest),
    Response(RegistrationResponse),
    Notice(RegistrationNotice),
}

impl RegistrationRequest {
    /// Encode to bytes.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(MSG_REGISTRATION_REQUEST);
        w.write_u8(match self.op {
            RegistrationOp::Register => 0,
            RegistrationOp::Release => 1,
        });
        w.write_address(&self.target);
        w.write_iid(&self.ml_iid);
        w.write_u32_be(self.last_transaction_secs);
        w.finish()
    }
}

impl RegistrationResponse {
    /// Encode to bytes.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(MSG_REGISTRATION_RESPONSE);
        w.write_u8(self.status.to_u8());
        w.write_address(&self.target);
        w.finish()
    }
}

impl RegistrationNotice {
    /// Encode to bytes.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(MSG_REGISTRATION_NOTICE);
        w.write_u8(self.status.to_u8());
        w.write_address(&self.target);
        w.finish()
    }
}

impl Message {
    /// Decode a message from a byte slice.
    ///
    /// Rejects trailing bytes so a truncated-then-padded buffer cannot pass.
    pub fn decode_from_slice(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let msg = match r.read_u8()? {
            MSG_REGISTRATION_REQUEST => {
                let op = match r.read_u8()? {
                    0 => RegistrationOp::Register,
                    1 => RegistrationOp::Release,
                    _ => return Err(DecodeError::InvalidValue),
                };
                Message::Request(RegistrationRequest {
                    op,
                    target: r.read_address()?,
                    ml_iid: r.read_iid()?,
                    last_transaction_secs: r.read_u32_be()?,
                })
            }
            MSG_REGISTRATION_RESPONSE => {
                let status = RegistrationStatus::from_u8(r.read_u8()?)
                    .ok_or(DecodeError::InvalidValue)?;
                Message::Response(RegistrationResponse {
                    status,
                    target: r.read_address()?,
                })
            }
            MSG_REGISTRATION_NOTICE => {
                let status = RegistrationStatus::from_u8(r.read_u8()?)
                    .ok_or(DecodeError::InvalidValue)?;
                Message::Notice(RegistrationNotice {
                    status,
                    target: r.read_address()?,
                })
            }
            _ => return Err(DecodeError::InvalidMessageType),
        };
        if r.remaining() != 0 {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Ip6Address {
        let mut a = [0u8; 16];
        a[0] = 0xfd;
        a[15] = n;
        a
    }

    #[test]
    fn test_request_roundtrip() {
        let req = RegistrationRequest {
            op: RegistrationOp::Register,
            target: addr(7),
            ml_iid: [1, 2, 3, 4, 5, 6, 7, 8],
            last_transaction_secs: 120,
        };
        let decoded = Message::decode_from_slice(&req.encode_to_vec()).unwrap();
        assert_eq!(decoded, Message::Request(req));
    }

    #[test]
    fn test_response_roundtrip() {
        let rsp = RegistrationResponse {
            status: RegistrationStatus::Duplicate,
            target: addr(9),
        };
        let decoded = Message::decode_from_slice(&rsp.encode_to_vec()).unwrap();
        assert_eq!(decoded, Message::Response(rsp));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            Message::decode_from_slice(&[0x37, 0, 0]),
            Err(DecodeError::InvalidMessageType)
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let rsp = RegistrationResponse {
            status: RegistrationStatus::Success,
            target: addr(1),
        };
        let mut bytes = rsp.encode_to_vec();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(
            Message::decode_from_slice(&bytes),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let notice = RegistrationNotice {
            status: RegistrationStatus::ReRegister,
            target: addr(2),
        };
        let mut bytes = notice.encode_to_vec();
        bytes.push(0);
        assert_eq!(
            Message::decode_from_slice(&bytes),
            Err(DecodeError::TrailingBytes)
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut bytes = RegistrationResponse {
            status: RegistrationStatus::Success,
            target: addr(3),
        }
        .encode_to_vec();
        bytes[1] = 200;
        assert_eq!(
            Message::decode_from_slice(&bytes),
            Err(DecodeError::InvalidValue)
        );
    }
}
