//! Wire codec
//!
//! Packs typed field lists into Control Unit frames and unpacks reply
//! frames back into values.
//!
//! The CU speaks a printable alphabet: a 4-bit value `v` travels as the
//! byte `0x30 | v` (`'0'..='?'`). Wider values are split into nibbles:
//!
//! | Field              | Wire bytes | Encoding                                  |
//! |--------------------|-----------:|-------------------------------------------|
//! | [`Field::Char`]    | 1          | copied verbatim (command tag)             |
//! | [`Field::Nibble`]  | 1          | `0x30 | v`, v in 0..=15                   |
//! | [`Field::Byte`]    | 2          | low nibble, then high nibble              |
//! | [`Field::Int`]     | 8          | big-endian bytes, each as a `Byte`        |
//! | [`Field::Str`]     | n          | copied verbatim                           |
//! | [`Field::Skip`]    | 1          | `'0'` on pack, ignored on unpack          |
//! | [`Field::Checksum`]| 1          | `0x30 | (sum of bytes after the first & 0xf)` |
//!
//! On the serial line every command is wrapped as `"` + command + `$` and
//! every reply is terminated by `$`; see [`frame`].

use byteorder::{BigEndian, ByteOrder};

use super::{ProtocolError, Result};

/// Byte that opens a command on the serial line
pub const FRAME_START: u8 = b'"';

/// Byte that terminates commands and replies on the serial line
pub const FRAME_END: u8 = b'$';

/// Filler emitted for [`Field::Skip`]
pub const SKIP_BYTE: u8 = b'0';

const NIBBLE_BASE: u8 = 0x30;

/// One field of a wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Single byte copied verbatim
    Char,
    /// 8-bit value, two wire bytes
    Byte,
    /// 4-bit value, one wire byte
    Nibble,
    /// 32-bit value, eight wire bytes
    Int,
    /// Fixed-length byte string
    Str(usize),
    /// Filler; consumes no value
    Skip,
    /// Trailing checksum; consumes no value
    Checksum,
}

impl Field {
    /// Number of wire bytes this field occupies
    pub const fn wire_len(self) -> usize {
        match self {
            Field::Char | Field::Nibble | Field::Skip | Field::Checksum => 1,
            Field::Byte => 2,
            Field::Int => 8,
            Field::Str(n) => n,
        }
    }

    /// Whether the field corresponds to a caller-visible value
    pub const fn takes_value(self) -> bool {
        !matches!(self, Field::Skip | Field::Checksum)
    }
}

/// A statically checked field list.
///
/// `Format::new` is a `const fn` that rejects malformed layouts (a checksum
/// anywhere but last, an empty string field), so declaring formats as
/// `const` items turns a bad layout into a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    fields: &'static [Field],
    wire_len: usize,
    value_count: usize,
}

impl Format {
    /// Build a format, panicking (at compile time in `const` context) on a
    /// malformed field list
    pub const fn new(fields: &'static [Field]) -> Self {
        let mut wire_len = 0;
        let mut value_count = 0;
        let mut i = 0;
        while i < fields.len() {
            match fields[i] {
                Field::Str(0) => panic!("string field must have a non-zero length"),
                Field::Checksum if i + 1 != fields.len() => {
                    panic!("checksum must be the last field")
                }
                _ => {}
            }
            wire_len += fields[i].wire_len();
            if fields[i].takes_value() {
                value_count += 1;
            }
            i += 1;
        }
        Self {
            fields,
            wire_len,
            value_count,
        }
    }

    /// The field list
    pub fn fields(&self) -> &'static [Field] {
        self.fields
    }

    /// Minimum buffer length accepted by [`unpack`]
    pub const fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Number of values [`pack`] consumes and [`unpack`] produces
    pub const fn value_count(&self) -> usize {
        self.value_count
    }
}

/// A decoded (or to-be-encoded) field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Value of a [`Field::Char`]
    Char(u8),
    /// Value of a [`Field::Nibble`], [`Field::Byte`] or [`Field::Int`]
    Int(u32),
    /// Value of a [`Field::Str`]
    Str(Vec<u8>),
}

impl Value {
    /// Numeric payload, if this is an integer value
    pub fn as_int(&self) -> Option<u32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte payload, if this is a string value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v)
    }
}

impl From<&[u8]> for Value {
    fn from(s: &[u8]) -> Self {
        Value::Str(s.to_vec())
    }
}

/// Checksum nibble over `bytes`, excluding the leading tag byte
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .skip(1)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        & 0x0f
}

fn nibble(v: u8) -> u8 {
    NIBBLE_BASE | (v & 0x0f)
}

fn push_byte(out: &mut Vec<u8>, v: u8) {
    out.push(nibble(v));
    out.push(nibble(v >> 4));
}

fn read_byte(buf: &[u8]) -> u8 {
    (buf[0] & 0x0f) | (buf[1] & 0x0f) << 4
}

fn int_value(field: Field, value: &Value, max: u32) -> Result<u32> {
    match value {
        Value::Int(v) if *v <= max => Ok(*v),
        Value::Int(v) => Err(ProtocolError::Format(format!(
            "{:?} value {} exceeds {}",
            field, v, max
        ))),
        other => Err(ProtocolError::Format(format!(
            "{:?} field cannot encode {:?}",
            field, other
        ))),
    }
}

/// Encode `values` according to `format`.
///
/// Fails with [`ProtocolError::Format`] if the value count does not match
/// the format or a value does not fit its field.
pub fn pack(format: &Format, values: &[Value]) -> Result<Vec<u8>> {
    if values.len() != format.value_count() {
        return Err(ProtocolError::Format(format!(
            "format takes {} values, got {}",
            format.value_count(),
            values.len()
        )));
    }

    let mut out = Vec::with_capacity(format.wire_len());
    let mut values = values.iter();

    for &field in format.fields() {
        match field {
            Field::Skip => out.push(SKIP_BYTE),
            Field::Checksum => out.push(nibble(checksum(&out))),
            _ => {
                // value_count was checked above
                let Some(value) = values.next() else {
                    return Err(ProtocolError::Format("ran out of values".into()));
                };
                match field {
                    Field::Char => match value {
                        Value::Char(b) => out.push(*b),
                        other => {
                            return Err(ProtocolError::Format(format!(
                                "Char field cannot encode {:?}",
                                other
                            )))
                        }
                    },
                    Field::Nibble => out.push(nibble(int_value(field, value, 0x0f)? as u8)),
                    Field::Byte => push_byte(&mut out, int_value(field, value, 0xff)? as u8),
                    Field::Int => {
                        let mut be = [0u8; 4];
                        BigEndian::write_u32(&mut be, int_value(field, value, u32::MAX)?);
                        for b in be {
                            push_byte(&mut out, b);
                        }
                    }
                    Field::Str(n) => match value {
                        Value::Str(s) if s.len() == n => out.extend_from_slice(s),
                        other => {
                            return Err(ProtocolError::Format(format!(
                                "Str({}) field cannot encode {:?}",
                                n, other
                            )))
                        }
                    },
                    Field::Skip | Field::Checksum => unreachable!(),
                }
            }
        }
    }

    Ok(out)
}

/// Decode `buf` according to `format`.
///
/// Bytes beyond the format's length are ignored. Fails with
/// [`ProtocolError::Format`] if `buf` is too short and with
/// [`ProtocolError::Checksum`] if the checksum byte does not match.
pub fn unpack(format: &Format, buf: &[u8]) -> Result<Vec<Value>> {
    if buf.len() < format.wire_len() {
        return Err(ProtocolError::Format(format!(
            "buffer too short: {} bytes, format needs {}",
            buf.len(),
            format.wire_len()
        )));
    }

    let mut values = Vec::with_capacity(format.value_count());
    let mut offset = 0;

    for &field in format.fields() {
        let bytes = &buf[offset..offset + field.wire_len()];
        match field {
            Field::Char => values.push(Value::Char(bytes[0])),
            Field::Nibble => values.push(Value::Int(u32::from(bytes[0] & 0x0f))),
            Field::Byte => values.push(Value::Int(u32::from(read_byte(bytes)))),
            Field::Int => {
                let mut be = [0u8; 4];
                for (i, pair) in bytes.chunks_exact(2).enumerate() {
                    be[i] = read_byte(pair);
                }
                values.push(Value::Int(BigEndian::read_u32(&be)));
            }
            Field::Str(_) => values.push(Value::Str(bytes.to_vec())),
            Field::Skip => {}
            Field::Checksum => {
                let expected = checksum(&buf[..offset]);
                if bytes[0] & 0x0f != expected {
                    return Err(ProtocolError::Checksum {
                        expected: nibble(expected),
                        actual: bytes[0],
                    });
                }
            }
        }
        offset += field.wire_len();
    }

    Ok(values)
}

/// Wrap a packed command for transmission
pub fn frame(command: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 2);
    out.push(FRAME_START);
    out.extend_from_slice(command);
    out.push(FRAME_END);
    out
}
