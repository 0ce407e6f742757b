//! Framing of payloads handed to the transport.
//!
//! Every frame starts with one kind byte:
//!
//! | Kind | Layout after the kind byte |
//! |------|----------------------------|
//! | `0` value | codec bytes |
//! | `1` typed | dtype tag (`u8`), element count (`u64` LE), raw LE elements |
//! | `2` token | nothing |
//!
//! The typed header carries the count only so the receiver can compare it
//! against its own declaration; shapes are never transmitted.

use crate::codec;
use crate::datatype::{self, Datatype, DatatypeTag};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

const KIND_VALUE: u8 = 0;
const KIND_TYPED: u8 = 1;
const KIND_TOKEN: u8 = 2;
const TYPED_HEADER: usize = 1 + 1 + 8;

/// Frame a generic value.
pub(crate) fn value_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut frame = vec![KIND_VALUE];
    codec::encode_into(&mut frame, value)?;
    Ok(frame)
}

/// Frame a typed buffer.
pub(crate) fn typed_frame<T: Datatype>(data: &[T]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(TYPED_HEADER + data.len() * T::TAG.size_bytes());
    frame.push(KIND_TYPED);
    frame.push(T::TAG as u8);
    frame.extend_from_slice(&(data.len() as u64).to_le_bytes());
    datatype::write_elements(data, &mut frame);
    frame
}

/// Frame carrying no data, used for synchronization.
pub(crate) fn token_frame() -> Vec<u8> {
    vec![KIND_TOKEN]
}

/// A parsed frame borrowing from the received bytes.
#[derive(Debug)]
pub(crate) enum Frame<'a> {
    Value(&'a [u8]),
    Typed {
        dtype: DatatypeTag,
        count: usize,
        elements: &'a [u8],
    },
    Token,
}

impl<'a> Frame<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::MalformedPayload("empty frame".into()))?;
        match kind {
            KIND_VALUE => Ok(Frame::Value(rest)),
            KIND_TOKEN if rest.is_empty() => Ok(Frame::Token),
            KIND_TYPED => {
                if rest.len() < TYPED_HEADER - 1 {
                    return Err(Error::MalformedPayload("truncated typed header".into()));
                }
                let dtype = DatatypeTag::from_u8(rest[0]).ok_or_else(|| {
                    Error::MalformedPayload(format!("unknown datatype tag {}", rest[0]))
                })?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&rest[1..9]);
                let count = usize::try_from(u64::from_le_bytes(raw))
                    .map_err(|_| Error::MalformedPayload("element count overflows".into()))?;
                let elements = &rest[9..];
                if count.checked_mul(dtype.size_bytes()) != Some(elements.len()) {
                    return Err(Error::MalformedPayload(format!(
                        "{count} {dtype:?} elements declared but {} bytes present",
                        elements.len()
                    )));
                }
                Ok(Frame::Typed {
                    dtype,
                    count,
                    elements,
                })
            }
            other => Err(Error::MalformedPayload(format!("unknown frame kind {other}"))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Frame::Value(_) => "value",
            Frame::Typed { .. } => "typed buffer",
            Frame::Token => "token",
        }
    }

    /// Decode a generic value.
    pub(crate) fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Frame::Value(bytes) => codec::decode(bytes),
            other => Err(Error::MalformedPayload(format!(
                "expected a value frame, got a {}",
                other.kind()
            ))),
        }
    }

    /// Element count of a typed frame, after checking its element type.
    pub(crate) fn typed_count<T: Datatype>(&self, op: &'static str) -> Result<usize> {
        match *self {
            Frame::Typed { dtype, count, .. } => {
                if dtype != T::TAG {
                    return Err(Error::DatatypeMismatch {
                        op,
                        expected: T::TAG,
                        actual: dtype,
                    });
                }
                Ok(count)
            }
            ref other => Err(Error::MalformedPayload(format!(
                "{op}: expected a typed frame, got a {}",
                other.kind()
            ))),
        }
    }

    /// Copy typed elements into `out`, whose length is the declared count.
    pub(crate) fn read_into<T: Datatype>(self, op: &'static str, out: &mut [T]) -> Result<()> {
        let count = self.typed_count::<T>(op)?;
        if count != out.len() {
            return Err(Error::BufferSizeMismatch {
                op,
                expected: out.len(),
                actual: count,
            });
        }
        if let Frame::Typed { elements, .. } = self {
            datatype::read_elements(elements, out);
        }
        Ok(())
    }

    pub(crate) fn expect_token(self, op: &'static str) -> Result<()> {
        match self {
            Frame::Token => Ok(()),
            other => Err(Error::MalformedPayload(format!(
                "{op}: expected a token frame, got a {}",
                other.kind()
            ))),
        }
    }
}
