//! Big-endian field primitives for the wire protocol
//!
//! Integers and floats use the fixed-width big-endian layout that `bytes::BufMut`
//! and `tokio::io::AsyncReadExt` already speak. Strings are UCS-2: an `int16`
//! count of UTF-16 code units followed by the units themselves.

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the number of UTF-16 units accepted in any string field.
///
/// Larger than every protocol limit so that policy checks (username length,
/// chat length) see the full value and can reject it with their own reason.
pub const MAX_STRING_UNITS: usize = 1024;

/// Upper bound on a length-prefixed byte payload (compressed chunk data).
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

/// Errors raised while decoding packets from a stream
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The leading tag byte does not name a packet valid in this direction.
    #[error("unsupported packet id 0x{0:02X}")]
    UnknownPacket(u8),

    /// A length prefix was negative.
    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    /// A string length prefix exceeded [`MAX_STRING_UNITS`].
    #[error("string of {len} units exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    /// A byte payload length prefix exceeded [`MAX_PAYLOAD_BYTES`].
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The string units were not valid UTF-16.
    #[error("malformed UCS-2 string")]
    InvalidString,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the peer hung up (cleanly or mid-packet) rather than sending garbage.
    pub fn is_eof(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Protocol-specific write helpers on top of [`BufMut`].
pub trait WireWrite: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(if value { 0x01 } else { 0x00 });
    }

    /// Writes a UCS-2 string: unit count as `int16`, then each unit big-endian.
    fn put_string16(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.put_i16(units.len() as i16);
        for unit in units {
            self.put_u16(unit);
        }
    }
}

impl<B: BufMut> WireWrite for B {}

pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, ProtocolError> {
    Ok(reader.read_u8().await? == 0x01)
}

/// Reads a UCS-2 string, rejecting prefixes beyond [`MAX_STRING_UNITS`].
pub async fn read_string16<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ProtocolError> {
    let len = reader.read_i16().await?;
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len as i32));
    }
    let len = len as usize;
    if len > MAX_STRING_UNITS {
        return Err(ProtocolError::StringTooLong {
            len,
            max: MAX_STRING_UNITS,
        });
    }

    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        units.push(reader.read_u16().await?);
    }
    String::from_utf16(&units).map_err(|_| ProtocolError::InvalidString)
}

/// Reads an `int32`-prefixed byte payload.
pub async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = reader.read_i32().await?;
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }
    let len = len as usize;
    if len > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_BYTES,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
