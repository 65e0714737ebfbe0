//! The compact protocol: zigzag varints, field headers that fold small id
//! deltas into the type nibble, and bools carried in the field header.

use super::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const TYPE_SHIFT: u8 = 5;
const TYPE_BITS: u8 = 0x07;

mod ctype {
    pub const STOP: u8 = 0;
    pub const BOOL_TRUE: u8 = 1;
    pub const BOOL_FALSE: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const I16: u8 = 4;
    pub const I32: u8 = 5;
    pub const I64: u8 = 6;
    pub const DOUBLE: u8 = 7;
    pub const BINARY: u8 = 8;
    pub const LIST: u8 = 9;
    pub const SET: u8 = 10;
    pub const MAP: u8 = 11;
    pub const STRUCT: u8 = 12;
}

fn to_compact(type_id: TType) -> Result<u8> {
    Ok(match type_id {
        TType::STOP => ctype::STOP,
        TType::BOOL => ctype::BOOL_TRUE,
        TType::BYTE => ctype::BYTE,
        TType::I16 => ctype::I16,
        TType::I32 => ctype::I32,
        TType::I64 => ctype::I64,
        TType::DOUBLE => ctype::DOUBLE,
        TType::STRING => ctype::BINARY,
        TType::LIST => ctype::LIST,
        TType::SET => ctype::SET,
        TType::MAP => ctype::MAP,
        TType::STRUCT => ctype::STRUCT,
        other => return Err(ProtocolError::UnknownType(other.0)),
    })
}

fn from_compact(compact: u8) -> Result<TType> {
    Ok(match compact {
        ctype::STOP => TType::STOP,
        ctype::BOOL_TRUE | ctype::BOOL_FALSE => TType::BOOL,
        ctype::BYTE => TType::BYTE,
        ctype::I16 => TType::I16,
        ctype::I32 => TType::I32,
        ctype::I64 => TType::I64,
        ctype::DOUBLE => TType::DOUBLE,
        ctype::BINARY => TType::STRING,
        ctype::LIST => TType::LIST,
        ctype::SET => TType::SET,
        ctype::MAP => TType::MAP,
        ctype::STRUCT => TType::STRUCT,
        other => return Err(ProtocolError::UnknownType(other)),
    })
}

fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub struct CompactProtocol<T> {
    transport: T,
    string_limit: Option<usize>,
    container_limit: Option<usize>,
    last_write_field_id: i16,
    write_field_stack: Vec<i16>,
    pending_bool_field: Option<i16>,
    last_read_field_id: i16,
    read_field_stack: Vec<i16>,
    pending_bool_value: Option<bool>,
}

impl<T: Transport> CompactProtocol<T> {
    pub fn new(transport: T) -> Self {
        CompactProtocol {
            transport,
            string_limit: None,
            container_limit: None,
            last_write_field_id: 0,
            write_field_stack: Vec::new(),
            pending_bool_field: None,
            last_read_field_id: 0,
            read_field_stack: Vec::new(),
            pending_bool_value: None,
        }
    }

    /// Largest string or binary accepted on read.
    pub fn with_string_limit(mut self, limit: usize) -> Self {
        self.string_limit = Some(limit);
        self
    }

    /// Largest list, set or map accepted on read.
    pub fn with_container_limit(mut self, limit: usize) -> Self {
        self.container_limit = Some(limit);
        self
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn write_varint32(&mut self, mut n: u32) -> Result<()> {
        let mut buf = [0u8; 5];
        let mut len = 0;
        loop {
            if n & !0x7f == 0 {
                buf[len] = n as u8;
                len += 1;
                break;
            }
            buf[len] = ((n & 0x7f) | 0x80) as u8;
            len += 1;
            n >>= 7;
        }
        self.transport.write_all(&buf[..len])?;
        Ok(())
    }

    fn write_varint64(&mut self, mut n: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let mut len = 0;
        loop {
            if n & !0x7f == 0 {
                buf[len] = n as u8;
                len += 1;
                break;
            }
            buf[len] = ((n & 0x7f) | 0x80) as u8;
            len += 1;
            n >>= 7;
        }
        self.transport.write_all(&buf[..len])?;
        Ok(())
    }

    fn read_varint32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.transport.read_u8()?;
            result |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ProtocolError::InvalidData(
            "Variable-length int over 5 bytes".to_string(),
        ))
    }

    fn read_varint64(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        for shift in (0..70).step_by(7) {
            let byte = self.transport.read_u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ProtocolError::InvalidData(
            "Variable-length int over 10 bytes".to_string(),
        ))
    }

    fn write_size(&mut self, size: usize) -> Result<()> {
        let size = u32::try_from(size)
            .ok()
            .filter(|s| *s <= i32::MAX as u32)
            .ok_or_else(|| ProtocolError::InvalidData(format!("size {} does not fit in i32", size)))?;
        self.write_varint32(size)
    }

    fn read_size(&mut self) -> Result<i64> {
        Ok(i64::from(self.read_varint32()? as i32))
    }

    fn write_field_header(&mut self, compact: u8, field_id: i16) -> Result<()> {
        let delta = i32::from(field_id) - i32::from(self.last_write_field_id);
        if field_id > self.last_write_field_id && delta <= 15 {
            self.transport.write_u8(((delta as u8) << 4) | compact)?;
        } else {
            self.transport.write_u8(compact)?;
            self.write_varint32(zigzag32(i32::from(field_id)))?;
        }
        self.last_write_field_id = field_id;
        Ok(())
    }

    fn write_collection_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        let compact = to_compact(element_type)?;
        if size <= 14 {
            self.transport.write_u8(((size as u8) << 4) | compact)?;
            Ok(())
        } else {
            self.transport.write_u8(0xf0 | compact)?;
            self.write_size(size)
        }
    }

    fn read_collection_begin(&mut self) -> Result<(TType, usize)> {
        let header = self.transport.read_u8()?;
        let short = (header >> 4) & 0x0f;
        let size = if short == 15 {
            self.read_size()?
        } else {
            i64::from(short)
        };
        let element_type = from_compact(header & 0x0f)?;
        Ok((element_type, checked_size(size, self.container_limit)?))
    }

    fn read_body(&mut self, limit_error: ProtocolError) -> Result<Vec<u8>> {
        let size = self.read_size()?;
        if size < 0 {
            return Err(ProtocolError::NegativeSize(size));
        }
        let size = size as usize;
        if let Some(limit) = self.string_limit {
            if size > limit {
                return Err(limit_error);
            }
        }
        read_exact_vec(&mut self.transport, size)
    }
}

impl<T: Transport> Protocol for CompactProtocol<T> {
    fn write_message_begin(&mut self, name: &str, message_type: u8, seq_id: i32) -> Result<()> {
        self.transport.write_u8(PROTOCOL_ID)?;
        self.transport
            .write_u8((VERSION & VERSION_MASK) | ((message_type & TYPE_BITS) << TYPE_SHIFT))?;
        self.write_varint32(seq_id as u32)?;
        self.write_string(name)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        self.write_field_stack.push(self.last_write_field_id);
        self.last_write_field_id = 0;
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.last_write_field_id = self.write_field_stack.pop().unwrap_or(0);
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, type_id: TType, field_id: i16) -> Result<()> {
        if type_id == TType::BOOL {
            self.pending_bool_field = Some(field_id);
            Ok(())
        } else {
            let compact = to_compact(type_id)?;
            self.write_field_header(compact, field_id)
        }
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.transport.write_u8(ctype::STOP)?;
        Ok(())
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        if size == 0 {
            self.transport.write_u8(0)?;
            return Ok(());
        }
        let kv = (to_compact(key_type)? << 4) | to_compact(value_type)?;
        self.write_size(size)?;
        self.transport.write_u8(kv)?;
        Ok(())
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_collection_begin(element_type, size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.write_collection_begin(element_type, size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        let compact = if value {
            ctype::BOOL_TRUE
        } else {
            ctype::BOOL_FALSE
        };
        match self.pending_bool_field.take() {
            Some(field_id) => self.write_field_header(compact, field_id),
            None => {
                self.transport.write_u8(compact)?;
                Ok(())
            }
        }
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.transport.write_i8(value)?;
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_varint32(zigzag32(i32::from(value)))
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_varint32(zigzag32(value))
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_varint64(zigzag64(value))
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.transport.write_f64::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_binary(value.as_bytes())
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        self.write_size(value.len())?;
        self.transport.write_all(value)?;
        Ok(())
    }

    fn read_message_begin(&mut self) -> Result<MessageMetadata> {
        let protocol_id = self.transport.read_u8()?;
        if protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::InvalidData(format!(
                "Expected protocol id {:#x} but got {:#x}",
                PROTOCOL_ID, protocol_id
            )));
        }
        let version_and_type = self.transport.read_u8()?;
        if version_and_type & VERSION_MASK != VERSION {
            return Err(ProtocolError::BadVersion);
        }
        let message_type = (version_and_type >> TYPE_SHIFT) & TYPE_BITS;
        let seq_id = self.read_varint32()? as i32;
        let name = self.read_string()?;
        Ok(MessageMetadata {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<StructMetadata> {
        self.read_field_stack.push(self.last_read_field_id);
        self.last_read_field_id = 0;
        Ok(StructMetadata {
            name: String::new(),
        })
    }

    fn read_struct_end(&mut self) -> Result<()> {
        self.last_read_field_id = self.read_field_stack.pop().unwrap_or(0);
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldMetadata> {
        let header = self.transport.read_u8()?;
        let compact = header & 0x0f;
        if compact == ctype::STOP {
            return Ok(FieldMetadata {
                name: String::new(),
                type_id: TType::STOP,
                field_id: 0,
            });
        }
        let delta = header >> 4;
        let field_id = if delta == 0 {
            self.read_i16()?
        } else {
            self.last_read_field_id.wrapping_add(i16::from(delta))
        };
        match compact {
            ctype::BOOL_TRUE => self.pending_bool_value = Some(true),
            ctype::BOOL_FALSE => self.pending_bool_value = Some(false),
            _ => {}
        }
        self.last_read_field_id = field_id;
        Ok(FieldMetadata {
            name: String::new(),
            type_id: from_compact(compact)?,
            field_id,
        })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapMetadata> {
        let size = checked_size(self.read_size()?, self.container_limit)?;
        if size == 0 {
            return Ok(MapMetadata {
                key_type: TType::STOP,
                value_type: TType::STOP,
                size,
            });
        }
        let kv = self.transport.read_u8()?;
        Ok(MapMetadata {
            key_type: from_compact(kv >> 4)?,
            value_type: from_compact(kv & 0x0f)?,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListMetadata> {
        let (element_type, size) = self.read_collection_begin()?;
        Ok(ListMetadata { element_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<SetMetadata> {
        let (element_type, size) = self.read_collection_begin()?;
        Ok(SetMetadata { element_type, size })
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.pending_bool_value.take() {
            Some(value) => Ok(value),
            None => Ok(self.transport.read_u8()? == ctype::BOOL_TRUE),
        }
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.transport.read_i8()?)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let value = unzigzag32(self.read_varint32()?);
        i16::try_from(value)
            .map_err(|_| ProtocolError::InvalidData(format!("{} is out of range for i16", value)))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(unzigzag32(self.read_varint32()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(unzigzag64(self.read_varint64()?))
    }

    fn read_double(&mut self) -> Result<f64> {
        Ok(self.transport.read_f64::<LittleEndian>()?)
    }

    fn read_string(&mut self) -> Result<String> {
        let body = self.read_body(ProtocolError::StringSizeLimit)?;
        String::from_utf8(body).map_err(|e| ProtocolError::InvalidData(e.to_string()))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        self.read_body(ProtocolError::BinarySizeLimit)
    }

    fn flush(&mut self) -> Result<()> {
        self.transport.flush()?;
        Ok(())
    }
}
