//! Payload codec.
//!
//! Two paths carry application data:
//!
//! * **Generic values** go through [`encode`]/[`decode`], which accept any
//!   `serde` type built from scalars, sequences and mappings. [`Value`] is the
//!   closed, dynamically typed form of that set for heterogeneous payloads
//!   such as `{"a": 7, "b": 3.14}`.
//! * **Typed buffers** are described by a [`TypedBufferDescriptor`] (element
//!   type, shape, strides) obtained from [`describe`], and re-attached to
//!   memory with [`bind`]. Their elements are never routed through the
//!   generic encoder.

use crate::array::{ArrayView, NdArray};
use crate::datatype::{Datatype, DatatypeTag};
use crate::error::{Error, Result};
use bincode::Options;
use ndarray::{Dimension, ErrorKind, IxDyn, ShapeBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamically typed payload drawn from the supported value kinds.
///
/// Mapping keys are strings and unique by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value
    Unit,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Floating-point scalar
    Float(f64),
    /// Complex scalar
    Complex {
        /// Real part
        re: f64,
        /// Imaginary part
        im: f64,
    },
    /// Text scalar
    Str(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
    /// Ordered sequence
    Seq(Vec<Value>),
    /// Mapping with unique keys
    Map(BTreeMap<String, Value>),
    /// Numeric array nested inside a structured value
    Array(NdArray<f64>),
}

impl Value {
    /// Build a mapping, rejecting duplicate keys.
    pub fn map<K, I>(entries: I) -> Result<Value>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if map.contains_key(&key) {
                return Err(Error::UnsupportedValueKind(format!(
                    "mapping key {key:?} appears more than once"
                )));
            }
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    /// Look up `key` if this is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Name of the kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Complex { .. } => "complex",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl From<NdArray<f64>> for Value {
    fn from(v: NdArray<f64>) -> Self {
        Value::Array(v)
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().reject_trailing_bytes()
}

fn unsupported(err: bincode::Error) -> Error {
    match *err {
        bincode::ErrorKind::Custom(msg) => Error::UnsupportedValueKind(msg),
        bincode::ErrorKind::SequenceMustHaveLength => {
            Error::UnsupportedValueKind("sequence of unknown length".into())
        }
        other => Error::UnsupportedValueKind(other.to_string()),
    }
}

/// Encode `value` into bytes.
///
/// Fails with [`Error::UnsupportedValueKind`] when the value's `Serialize`
/// implementation refuses (for example a wrapper around a live OS handle) or
/// produces a shape the codec cannot represent.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    options().serialize(value).map_err(unsupported)
}

/// Encode `value`, appending to `out`.
pub(crate) fn encode_into<T: Serialize + ?Sized>(out: &mut Vec<u8>, value: &T) -> Result<()> {
    options().serialize_into(out, value).map_err(unsupported)
}

/// Decode bytes produced by [`encode`].
///
/// Fails with [`Error::MalformedPayload`] if the bytes do not describe a `T`,
/// including when bytes are left over.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    options()
        .deserialize(bytes)
        .map_err(|e| Error::MalformedPayload(e.to_string()))
}

/// Element type, shape and strides of a typed buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedBufferDescriptor {
    /// Element type
    pub dtype: DatatypeTag,
    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,
    /// Distance between consecutive indices of each dimension, in elements
    pub strides: Vec<usize>,
}

impl TypedBufferDescriptor {
    /// Contiguous row-major descriptor for `shape`.
    pub fn contiguous(dtype: DatatypeTag, shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let strides = IxDyn(&shape).default_strides().slice().to_vec();
        TypedBufferDescriptor {
            dtype,
            shape,
            strides,
        }
    }

    /// Total number of elements.
    pub fn element_count(&self) -> usize {
        IxDyn(&self.shape).size()
    }

    /// Total payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_bytes()
    }

    /// True for row-major contiguous layout.
    pub fn is_contiguous(&self) -> bool {
        IxDyn(&self.shape).default_strides().slice() == self.strides.as_slice()
    }

    /// Number of elements of backing memory the strides reach, first to last.
    pub fn span(&self) -> usize {
        if self.shape.iter().any(|&d| d == 0) {
            return 0;
        }
        1 + self
            .shape
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum::<usize>()
    }
}

/// Describe an array without touching its elements.
pub fn describe<T: Datatype>(array: &NdArray<T>) -> TypedBufferDescriptor {
    TypedBufferDescriptor {
        dtype: T::TAG,
        shape: array.shape().to_vec(),
        strides: array.strides(),
    }
}

/// Attach `descriptor` to `memory`, yielding a view with the described shape
/// and strides.
///
/// The element type must match and `memory` must be exactly as long as the
/// strides reach ([`TypedBufferDescriptor::span`]); neither is coerced.
/// Strides that make two indices share an element are malformed.
pub fn bind<'a, T: Datatype>(
    descriptor: &TypedBufferDescriptor,
    memory: &'a [T],
) -> Result<ArrayView<'a, T>> {
    if descriptor.dtype != T::TAG {
        return Err(Error::DatatypeMismatch {
            op: "bind",
            expected: descriptor.dtype,
            actual: T::TAG,
        });
    }
    if descriptor.shape.len() != descriptor.strides.len() {
        return Err(Error::MalformedPayload(format!(
            "{} strides for a {}-dimensional shape",
            descriptor.strides.len(),
            descriptor.shape.len()
        )));
    }
    let expected = descriptor.span();
    if memory.len() != expected {
        return Err(Error::BufferSizeMismatch {
            op: "bind",
            expected,
            actual: memory.len(),
        });
    }
    let layout = IxDyn(&descriptor.shape).strides(IxDyn(&descriptor.strides));
    ArrayView::from_shape(layout, memory).map_err(|e| match e.kind() {
        ErrorKind::OutOfBounds => Error::BufferSizeMismatch {
            op: "bind",
            expected,
            actual: memory.len(),
        },
        _ => Error::MalformedPayload(format!(
            "strides {:?} for shape {:?}: {e}",
            descriptor.strides, descriptor.shape
        )),
    })
}
