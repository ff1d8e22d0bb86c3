//! Command and response framing for the simulated card
//!
//! Commands use the short ISO 7816-4 layout: `CLA INS P1 P2 [Lc data]`.
//! Responses are the response data followed by a two-byte status word.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Class byte of every command in the dialect
pub const CLA: u8 = 0x80;

/// Instruction codes
pub mod ins {
    /// Read the card public key and lifecycle state
    pub const STATUS: u8 = 0xCA;
    /// Install a chain code and create the master key
    pub const INIT: u8 = 0xFE;
    /// Export the encrypted backup
    pub const BACKUP: u8 = 0xBA;
    /// Read the master extended public key
    pub const DERIVE: u8 = 0xD1;
    /// Sign a PSBT
    pub const SIGN: u8 = 0x51;
    /// Replace the PIN
    pub const CHANGE_PIN: u8 = 0x21;
}

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than a header or status word
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    /// Lc disagrees with the remaining bytes
    #[error("Lc {lc} does not match {actual} data bytes")]
    LengthMismatch {
        /// Declared length
        lc: usize,
        /// Bytes actually present
        actual: usize,
    },
    /// A field inside the data could not be read
    #[error("malformed field: {0}")]
    Field(&'static str),
    /// Data does not fit a one-byte length
    #[error("{0} bytes do not fit a one-byte length")]
    TooLong(usize),
}

fn short_length(len: usize) -> Result<u8, FrameError> {
    u8::try_from(len).map_err(|_| FrameError::TooLong(len))
}

/// Status word (SW1-SW2) of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// Success
    pub const OK: Self = Self(0x9000);
    /// Wrong PIN; the low nibble counts remaining attempts
    pub const BAD_AUTH: Self = Self(0x63C0);
    /// Security status not satisfied
    pub const SECURITY_NOT_SATISFIED: Self = Self(0x6982);
    /// Conditions of use not satisfied
    pub const CONDITIONS_NOT_SATISFIED: Self = Self(0x6985);
    /// Incorrect parameters in the data field
    pub const WRONG_DATA: Self = Self(0x6A80);
    /// Instruction not supported
    pub const INS_NOT_SUPPORTED: Self = Self(0x6D00);

    /// Check for success
    pub const fn is_success(self) -> bool {
        self.0 == Self::OK.0
    }

    /// Check for a rejected PIN
    pub const fn is_auth_failure(self) -> bool {
        (self.0 & 0xFFF0) == Self::BAD_AUTH.0 || self.0 == Self::SECURITY_NOT_SATISFIED.0
    }

    /// Human-readable description
    pub const fn description(self) -> &'static str {
        match self.0 {
            0x9000 => "Success",
            0x63C0..=0x63CF => "Wrong PIN",
            0x6982 => "Security status not satisfied",
            0x6985 => "Conditions of use not satisfied",
            0x6A80 => "Incorrect parameters in the data field",
            0x6D00 => "Instruction not supported",
            _ => "Unknown status",
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X} ({})", self.0, self.description())
    }
}

/// A command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Instruction
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data
    pub data: Bytes,
}

impl Apdu {
    /// Create a command with no parameters
    pub fn new(ins: u8, data: impl Into<Bytes>) -> Self {
        Self {
            ins,
            p1: 0,
            p2: 0,
            data: data.into(),
        }
    }

    /// Serialize to raw bytes
    ///
    /// Fails if the data does not fit a short frame.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buffer = BytesMut::with_capacity(5 + self.data.len());
        buffer.put_u8(CLA);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);
        if !self.data.is_empty() {
            buffer.put_u8(short_length(self.data.len())?);
            buffer.put_slice(&self.data);
        }
        Ok(buffer.freeze())
    }

    /// Parse raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let [_cla, ins, p1, p2, rest @ ..] = bytes else {
            return Err(FrameError::TooShort(bytes.len()));
        };

        let data = match rest {
            [] => Bytes::new(),
            [lc, data @ ..] if usize::from(*lc) == data.len() => Bytes::copy_from_slice(data),
            [lc, data @ ..] => {
                return Err(FrameError::LengthMismatch {
                    lc: usize::from(*lc),
                    actual: data.len(),
                });
            }
        };

        Ok(Self {
            ins: *ins,
            p1: *p1,
            p2: *p2,
            data,
        })
    }
}

/// A response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response data
    pub data: Bytes,
    /// Status word
    pub status: StatusWord,
}

impl Reply {
    /// Successful reply with data
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            status: StatusWord::OK,
        }
    }

    /// Error reply with no data
    pub const fn status(status: StatusWord) -> Self {
        Self {
            data: Bytes::new(),
            status,
        }
    }

    /// Serialize to raw bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.data.len() + 2);
        buffer.put_slice(&self.data);
        buffer.put_u16(self.status.0);
        buffer.freeze()
    }

    /// Parse raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let [data @ .., sw1, sw2] = bytes else {
            return Err(FrameError::TooShort(bytes.len()));
        };
        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status: StatusWord(u16::from_be_bytes([*sw1, *sw2])),
        })
    }
}

/// Reads length-prefixed fields out of command data
#[derive(Debug)]
pub struct FieldReader<'a> {
    remaining: &'a [u8],
}

impl<'a> FieldReader<'a> {
    /// Start reading `data`
    pub const fn new(data: &'a [u8]) -> Self {
        Self { remaining: data }
    }

    /// Read a one-byte length followed by that many bytes
    pub fn prefixed(&mut self, name: &'static str) -> Result<&'a [u8], FrameError> {
        let (len, rest) = self.remaining.split_first().ok_or(FrameError::Field(name))?;
        let len = usize::from(*len);
        if rest.len() < len {
            return Err(FrameError::Field(name));
        }
        let (field, rest) = rest.split_at(len);
        self.remaining = rest;
        Ok(field)
    }

    /// Read exactly `len` bytes
    pub fn fixed(&mut self, len: usize, name: &'static str) -> Result<&'a [u8], FrameError> {
        if self.remaining.len() < len {
            return Err(FrameError::Field(name));
        }
        let (field, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Ok(field)
    }

    /// Take everything that is left
    pub const fn rest(self) -> &'a [u8] {
        self.remaining
    }
}

/// Append a one-byte length followed by `field`
pub fn put_prefixed(buffer: &mut BytesMut, field: &[u8]) -> Result<(), FrameError> {
    buffer.put_u8(short_length(field.len())?);
    buffer.put_slice(field);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_framing() {
        let apdu = Apdu::new(ins::BACKUP, vec![0x06, b'1', b'2']);
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[0x80, 0xBA, 0x00, 0x00, 0x03, 0x06, b'1', b'2']);
        assert_eq!(Apdu::parse(&bytes).unwrap(), apdu);

        let bare = Apdu::new(ins::STATUS, Bytes::new());
        assert_eq!(bare.to_bytes().unwrap().len(), 4);
        assert_eq!(Apdu::parse(&bare.to_bytes().unwrap()).unwrap(), bare);
    }

    #[test]
    fn oversized_data_is_rejected() {
        let full = Apdu::new(ins::SIGN, vec![0x00; 255]);
        assert_eq!(full.to_bytes().unwrap()[4], 0xFF);

        let oversized = Apdu::new(ins::SIGN, vec![0x00; 256]);
        assert_eq!(oversized.to_bytes(), Err(FrameError::TooLong(256)));

        let mut buffer = BytesMut::new();
        assert_eq!(put_prefixed(&mut buffer, &[0x01; 300]), Err(FrameError::TooLong(300)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn bad_command_frames() {
        assert_eq!(Apdu::parse(&[0x80, 0xCA]), Err(FrameError::TooShort(2)));
        assert_eq!(
            Apdu::parse(&[0x80, 0xCA, 0, 0, 0x05, 0x01]),
            Err(FrameError::LengthMismatch { lc: 5, actual: 1 })
        );
    }

    #[test]
    fn reply_framing() {
        let reply = Reply::parse(&[0x01, 0x02, 0x63, 0xC2]).unwrap();
        assert_eq!(reply.data.as_ref(), &[0x01, 0x02]);
        assert!(reply.status.is_auth_failure());
        assert_eq!(reply.status.to_string(), "63C2 (Wrong PIN)");

        assert_eq!(Reply::parse(&[0x90]), Err(FrameError::TooShort(1)));
        assert!(Reply::parse(&[0x90, 0x00]).unwrap().status.is_success());
    }

    #[test]
    fn field_reader() {
        let mut buffer = BytesMut::new();
        put_prefixed(&mut buffer, b"123456").unwrap();
        buffer.put_slice(&[0xAA; 4]);

        let mut reader = FieldReader::new(&buffer);
        assert_eq!(reader.prefixed("pin").unwrap(), b"123456");
        assert_eq!(reader.fixed(2, "head").unwrap(), &[0xAA, 0xAA]);
        assert_eq!(reader.rest(), &[0xAA, 0xAA]);

        let mut short = FieldReader::new(&[0x05, 0x01]);
        assert_eq!(short.prefixed("pin"), Err(FrameError::Field("pin")));
    }
}
