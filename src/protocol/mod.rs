//! Wire protocols.
//!
//! [`Protocol`] is the read/write contract every encoding implements; codecs
//! drive it field by field. Three encodings are provided:
//!
//! * [`BinaryProtocol`]: fixed-width big-endian integers, length-prefixed strings.
//! * [`CompactProtocol`]: zigzag varints and delta-encoded field headers.
//! * [`SimpleJsonProtocol`]: write-only, human-readable JSON.

mod binary;
mod compact;
mod json;

pub use binary::{BinaryProtocol, BinaryProtocolBuilder};
pub use compact::CompactProtocol;
pub use json::{BinaryOutputMode, SimpleJsonProtocol};

use crate::types::{BuiltinType, ThriftType};
use std::fmt;
use std::io::{Read, Write};

/// Anything a protocol can read from and write to.
pub trait Transport: Read + Write {}

impl<T: Read + Write> Transport for T {}

/// Wire type tag, shared by every protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TType(pub u8);

impl TType {
    pub const STOP: TType = TType(0);
    pub const VOID: TType = TType(1);
    pub const BOOL: TType = TType(2);
    pub const BYTE: TType = TType(3);
    pub const DOUBLE: TType = TType(4);
    pub const I16: TType = TType(6);
    pub const I32: TType = TType(8);
    pub const I64: TType = TType(10);
    pub const STRING: TType = TType(11);
    pub const STRUCT: TType = TType(12);
    pub const MAP: TType = TType(13);
    pub const SET: TType = TType(14);
    pub const LIST: TType = TType(15);

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            TType::STOP => "STOP",
            TType::VOID => "VOID",
            TType::BOOL => "BOOL",
            TType::BYTE => "BYTE",
            TType::DOUBLE => "DOUBLE",
            TType::I16 => "I16",
            TType::I32 => "I32",
            TType::I64 => "I64",
            TType::STRING => "STRING",
            TType::STRUCT => "STRUCT",
            TType::MAP => "MAP",
            TType::SET => "SET",
            TType::LIST => "LIST",
            _ => return None,
        })
    }
}

impl fmt::Debug for TType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "TType({})", self.0),
        }
    }
}

/// Message kinds carried in a message header.
pub mod message_type {
    pub const CALL: u8 = 1;
    pub const REPLY: u8 = 2;
    pub const EXCEPTION: u8 = 3;
    pub const ONEWAY: u8 = 4;
}

/// The wire tag for a resolved type. Typedefs must already be stripped;
/// annotations are ignored. Enums travel as `I32`, binary as `STRING`.
pub fn ttype_of(ty: &ThriftType) -> TType {
    match ty {
        ThriftType::Builtin(b) => match b {
            BuiltinType::Bool => TType::BOOL,
            BuiltinType::Byte | BuiltinType::I8 => TType::BYTE,
            BuiltinType::I16 => TType::I16,
            BuiltinType::I32 => TType::I32,
            BuiltinType::I64 => TType::I64,
            BuiltinType::Double => TType::DOUBLE,
            BuiltinType::String | BuiltinType::Binary => TType::STRING,
            BuiltinType::Void => TType::VOID,
        },
        ThriftType::Enum(_) => TType::I32,
        ThriftType::List(_) => TType::LIST,
        ThriftType::Set(_) => TType::SET,
        ThriftType::Map(_, _) => TType::MAP,
        ThriftType::Struct(_) => TType::STRUCT,
        ThriftType::Typedef(_) | ThriftType::Service(_) => TType::VOID,
        ThriftType::Annotated(inner, _) => ttype_of(inner),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub name: String,
    pub message_type: u8,
    pub seq_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMetadata {
    pub name: String,
    pub type_id: TType,
    pub field_id: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMetadata {
    pub element_type: TType,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMetadata {
    pub element_type: TType,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapMetadata {
    pub key_type: TType,
    pub value_type: TType,
    pub size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing version in readMessageBegin")]
    MissingVersion,
    #[error("Bad version in readMessageBegin")]
    BadVersion,
    #[error("String size limit exceeded")]
    StringSizeLimit,
    #[error("Binary size limit exceeded")]
    BinarySizeLimit,
    #[error("Container size limit exceeded: {0}")]
    ContainerLimit(usize),
    #[error("Negative size: {0}")]
    NegativeSize(i64),
    #[error("Unknown type tag: {0}")]
    UnknownType(u8),
    #[error("Maximum nesting depth exceeded while skipping")]
    DepthLimit,
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Nesting depth beyond which [`Protocol::skip`] gives up.
pub const MAX_SKIP_DEPTH: usize = 64;

/// Read/write contract shared by every wire encoding.
///
/// Callers bracket values exactly as the type tree nests: a struct is
/// `write_struct_begin`, one `write_field_begin`/value/`write_field_end` per
/// present field, `write_field_stop`, `write_struct_end`. Readers mirror it.
pub trait Protocol {
    fn write_message_begin(&mut self, name: &str, message_type: u8, seq_id: i32) -> Result<()>;
    fn write_message_end(&mut self) -> Result<()>;
    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    fn write_struct_end(&mut self) -> Result<()>;
    fn write_field_begin(&mut self, name: &str, type_id: TType, field_id: i16) -> Result<()>;
    fn write_field_end(&mut self) -> Result<()>;
    fn write_field_stop(&mut self) -> Result<()>;
    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()>;
    fn write_map_end(&mut self) -> Result<()>;
    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_list_end(&mut self) -> Result<()>;
    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()>;
    fn write_set_end(&mut self) -> Result<()>;
    fn write_bool(&mut self, value: bool) -> Result<()>;
    fn write_byte(&mut self, value: i8) -> Result<()>;
    fn write_i16(&mut self, value: i16) -> Result<()>;
    fn write_i32(&mut self, value: i32) -> Result<()>;
    fn write_i64(&mut self, value: i64) -> Result<()>;
    fn write_double(&mut self, value: f64) -> Result<()>;
    fn write_string(&mut self, value: &str) -> Result<()>;
    fn write_binary(&mut self, value: &[u8]) -> Result<()>;

    fn read_message_begin(&mut self) -> Result<MessageMetadata>;
    fn read_message_end(&mut self) -> Result<()>;
    fn read_struct_begin(&mut self) -> Result<StructMetadata>;
    fn read_struct_end(&mut self) -> Result<()>;
    fn read_field_begin(&mut self) -> Result<FieldMetadata>;
    fn read_field_end(&mut self) -> Result<()>;
    fn read_map_begin(&mut self) -> Result<MapMetadata>;
    fn read_map_end(&mut self) -> Result<()>;
    fn read_list_begin(&mut self) -> Result<ListMetadata>;
    fn read_list_end(&mut self) -> Result<()>;
    fn read_set_begin(&mut self) -> Result<SetMetadata>;
    fn read_set_end(&mut self) -> Result<()>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Vec<u8>>;

    fn flush(&mut self) -> Result<()>;

    /// Consume and discard one value of type `type_id`.
    fn skip(&mut self, type_id: TType) -> Result<()> {
        skip_value(self, type_id, MAX_SKIP_DEPTH)
    }
}

/// Skip one value using only the read primitives of `protocol`.
pub fn skip_value<P: Protocol + ?Sized>(
    protocol: &mut P,
    type_id: TType,
    depth: usize,
) -> Result<()> {
    if depth == 0 {
        return Err(ProtocolError::DepthLimit);
    }
    match type_id {
        TType::BOOL => {
            protocol.read_bool()?;
        }
        TType::BYTE => {
            protocol.read_byte()?;
        }
        TType::I16 => {
            protocol.read_i16()?;
        }
        TType::I32 => {
            protocol.read_i32()?;
        }
        TType::I64 => {
            protocol.read_i64()?;
        }
        TType::DOUBLE => {
            protocol.read_double()?;
        }
        TType::STRING => {
            protocol.read_binary()?;
        }
        TType::STRUCT => {
            protocol.read_struct_begin()?;
            loop {
                let field = protocol.read_field_begin()?;
                if field.type_id == TType::STOP {
                    break;
                }
                skip_value(protocol, field.type_id, depth - 1)?;
                protocol.read_field_end()?;
            }
            protocol.read_struct_end()?;
        }
        TType::LIST => {
            let list = protocol.read_list_begin()?;
            for _ in 0..list.size {
                skip_value(protocol, list.element_type, depth - 1)?;
            }
            protocol.read_list_end()?;
        }
        TType::SET => {
            let set = protocol.read_set_begin()?;
            for _ in 0..set.size {
                skip_value(protocol, set.element_type, depth - 1)?;
            }
            protocol.read_set_end()?;
        }
        TType::MAP => {
            let map = protocol.read_map_begin()?;
            for _ in 0..map.size {
                skip_value(protocol, map.key_type, depth - 1)?;
                skip_value(protocol, map.value_type, depth - 1)?;
            }
            protocol.read_map_end()?;
        }
        other => return Err(ProtocolError::UnknownType(other.0)),
    }
    Ok(())
}

/// Converts a wire size to `usize`, enforcing `limit`.
pub(crate) fn checked_size(size: i64, limit: Option<usize>) -> Result<usize> {
    if size < 0 {
        return Err(ProtocolError::NegativeSize(size));
    }
    let size = usize::try_from(size).map_err(|_| ProtocolError::ContainerLimit(usize::MAX))?;
    match limit {
        Some(limit) if size > limit => Err(ProtocolError::ContainerLimit(size)),
        _ => Ok(size),
    }
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
pub(crate) fn read_exact_vec<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    let read = reader.take(len as u64).read_to_end(&mut buf)?;
    if read < len {
        return Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", len, read),
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ttype_tags_are_stable() {
        assert_eq!(TType::STRING.0, 11);
        assert_eq!(TType::LIST.0, 15);
        assert_eq!(format!("{:?}", TType::MAP), "MAP");
        assert_eq!(format!("{:?}", TType(99)), "TType(99)");
        assert_eq!(
            ttype_of(&ThriftType::Builtin(BuiltinType::I8)),
            ttype_of(&ThriftType::Builtin(BuiltinType::Byte))
        );
        assert_eq!(ttype_of(&ThriftType::Builtin(BuiltinType::Binary)), TType::STRING);
    }

    #[test]
    fn skip_rejects_unknown_tags() {
        let mut protocol = BinaryProtocol::new(Cursor::new(vec![0u8; 8]));
        match protocol.skip(TType(42)) {
            Err(ProtocolError::UnknownType(42)) => {}
            other => panic!("expected unknown type, got {:?}", other),
        }
    }

    #[test]
    fn skip_is_depth_bounded() {
        // A list of lists of lists ... deeper than the limit.
        let mut bytes = Vec::new();
        for _ in 0..(MAX_SKIP_DEPTH + 1) {
            bytes.push(TType::LIST.0);
            bytes.extend_from_slice(&1i32.to_be_bytes());
        }
        let mut protocol = BinaryProtocol::new(Cursor::new(bytes));
        assert!(matches!(protocol.skip(TType::LIST), Err(ProtocolError::DepthLimit)));
    }

    #[test]
    fn read_exact_vec_fails_short() {
        let mut data: &[u8] = &[1, 2, 3];
        assert!(read_exact_vec(&mut data, 5).is_err());
        let mut data: &[u8] = &[1, 2, 3];
        assert_eq!(read_exact_vec(&mut data, 2).expect("read"), vec![1, 2]);
    }
}
