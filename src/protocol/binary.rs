//! The binary protocol: big-endian fixed-width integers, IEEE-754 doubles as
//! their big-endian bit pattern, and `i32` length prefixes for strings,
//! binary and containers.

use super::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

const VERSION_MASK: u32 = 0xffff_0000;
const VERSION_1: u32 = 0x8001_0000;

pub struct BinaryProtocol<T> {
    transport: T,
    string_limit: Option<usize>,
    container_limit: Option<usize>,
    strict_read: bool,
    strict_write: bool,
}

/// Options for a [`BinaryProtocol`].
pub struct BinaryProtocolBuilder<T> {
    transport: T,
    string_limit: Option<usize>,
    container_limit: Option<usize>,
    strict_read: bool,
    strict_write: bool,
}

impl<T> BinaryProtocolBuilder<T> {
    /// Largest string or binary accepted on read.
    pub fn string_limit(mut self, limit: usize) -> Self {
        self.string_limit = Some(limit);
        self
    }

    /// Largest list, set or map accepted on read.
    pub fn container_limit(mut self, limit: usize) -> Self {
        self.container_limit = Some(limit);
        self
    }

    /// Require the versioned message header when reading.
    pub fn strict_read(mut self, strict: bool) -> Self {
        self.strict_read = strict;
        self
    }

    /// Write the versioned message header.
    pub fn strict_write(mut self, strict: bool) -> Self {
        self.strict_write = strict;
        self
    }

    pub fn build(self) -> BinaryProtocol<T> {
        BinaryProtocol {
            transport: self.transport,
            string_limit: self.string_limit,
            container_limit: self.container_limit,
            strict_read: self.strict_read,
            strict_write: self.strict_write,
        }
    }
}

impl<T: Transport> BinaryProtocol<T> {
    /// Non-strict reads, strict writes, no size limits.
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: T) -> BinaryProtocolBuilder<T> {
        BinaryProtocolBuilder {
            transport,
            string_limit: None,
            container_limit: None,
            strict_read: false,
            strict_write: true,
        }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn write_size(&mut self, size: usize) -> Result<()> {
        let size = i32::try_from(size)
            .map_err(|_| ProtocolError::InvalidData(format!("size {} does not fit in i32", size)))?;
        self.write_i32(size)
    }

    fn read_container_size(&mut self) -> Result<usize> {
        let size = self.read_i32()?;
        checked_size(i64::from(size), self.container_limit)
    }

    fn read_body(&mut self, size: i32, limit_error: ProtocolError) -> Result<Vec<u8>> {
        if size < 0 {
            return Err(ProtocolError::NegativeSize(i64::from(size)));
        }
        let size = size as usize;
        if let Some(limit) = self.string_limit {
            if size > limit {
                return Err(limit_error);
            }
        }
        read_exact_vec(&mut self.transport, size)
    }

    fn read_type(&mut self) -> Result<TType> {
        Ok(TType(self.transport.read_u8()?))
    }
}

impl<T: Transport> Protocol for BinaryProtocol<T> {
    fn write_message_begin(&mut self, name: &str, message_type: u8, seq_id: i32) -> Result<()> {
        if self.strict_write {
            let version = (VERSION_1 | u32::from(message_type)) as i32;
            self.write_i32(version)?;
            self.write_string(name)?;
            self.write_i32(seq_id)
        } else {
            self.write_string(name)?;
            self.transport.write_u8(message_type)?;
            self.write_i32(seq_id)
        }
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, type_id: TType, field_id: i16) -> Result<()> {
        self.transport.write_u8(type_id.0)?;
        self.write_i16(field_id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.transport.write_u8(TType::STOP.0)?;
        Ok(())
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) -> Result<()> {
        self.transport.write_u8(key_type.0)?;
        self.transport.write_u8(value_type.0)?;
        self.write_size(size)
    }

    fn write_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.transport.write_u8(element_type.0)?;
        self.write_size(size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_set_begin(&mut self, element_type: TType, size: usize) -> Result<()> {
        self.transport.write_u8(element_type.0)?;
        self.write_size(size)
    }

    fn write_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.transport.write_u8(u8::from(value))?;
        Ok(())
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.transport.write_i8(value)?;
        Ok(())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.transport.write_i16::<BigEndian>(value)?;
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.transport.write_i32::<BigEndian>(value)?;
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.transport.write_i64::<BigEndian>(value)?;
        Ok(())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        self.transport.write_f64::<BigEndian>(value)?;
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
        let size = self.read_i32()?;
        if size < 0 {
            let version = size as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(ProtocolError::BadVersion);
            }
            let message_type = (size & 0xff) as u8;
            let name = self.read_string()?;
            let seq_id = self.read_i32()?;
            Ok(MessageMetadata {
                name,
                message_type,
                seq_id,
            })
        } else {
            if self.strict_read {
                return Err(ProtocolError::MissingVersion);
            }
            let body = self.read_body(size, ProtocolError::StringSizeLimit)?;
            let name = String::from_utf8(body)
                .map_err(|e| ProtocolError::InvalidData(e.to_string()))?;
            let message_type = self.transport.read_u8()?;
            let seq_id = self.read_i32()?;
            Ok(MessageMetadata {
                name,
                message_type,
                seq_id,
            })
        }
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<StructMetadata> {
        Ok(StructMetadata {
            name: String::new(),
        })
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldMetadata> {
        let type_id = self.read_type()?;
        let field_id = if type_id == TType::STOP {
            0
        } else {
            self.read_i16()?
        };
        Ok(FieldMetadata {
            name: String::new(),
            type_id,
            field_id,
        })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<MapMetadata> {
        let key_type = self.read_type()?;
        let value_type = self.read_type()?;
        let size = self.read_container_size()?;
        Ok(MapMetadata {
            key_type,
            value_type,
            size,
        })
    }

    fn read_map_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListMetadata> {
        let element_type = self.read_type()?;
        let size = self.read_container_size()?;
        Ok(ListMetadata { element_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<SetMetadata> {
        let element_type = self.read_type()?;
        let size = self.read_container_size()?;
        Ok(SetMetadata { element_type, size })
    }

    fn read_set_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.transport.read_u8()? == 1)
    }

    fn read_byte(&mut self) -> Result<i8> {
        Ok(self.transport.read_i8()?)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.transport.read_i16::<BigEndian>()?)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.transport.read_i32::<BigEndian>()?)
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.transport.read_i64::<BigEndian>()?)
    }

    fn read_double(&mut self) -> Result<f64> {
        Ok(self.transport.read_f64::<BigEndian>()?)
    }

    fn read_string(&mut self) -> Result<String> {
        let size = self.read_i32()?;
        let body = self.read_body(size, ProtocolError::StringSizeLimit)?;
        String::from_utf8(body).map_err(|e| ProtocolError::InvalidData(e.to_string()))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let size = self.read_i32()?;
        self.read_body(size, ProtocolError::BinarySizeLimit)
    }

    fn flush(&mut self) -> Result<()> {
        self.transport.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn writer() -> BinaryProtocol<Cursor<Vec<u8>>> {
        BinaryProtocol::new(Cursor::new(Vec::new()))
    }

    fn bytes(protocol: BinaryProtocol<Cursor<Vec<u8>>>) -> Vec<u8> {
        protocol.into_inner().into_inner()
    }

    fn reader(data: Vec<u8>) -> BinaryProtocol<Cursor<Vec<u8>>> {
        BinaryProtocol::new(Cursor::new(data))
    }

    #[test]
    fn string_is_length_prefixed() {
        let mut p = writer();
        p.write_string("ab").expect("write");
        let data = bytes(p);
        assert_eq!(data, vec![0x00, 0x00, 0x00, 0x02, 0x61, 0x62]);
        assert_eq!(reader(data).read_string().expect("read"), "ab");
    }

    #[test]
    fn integers_are_big_endian() {
        let mut p = writer();
        p.write_i16(0x0102).expect("i16");
        p.write_i32(-2).expect("i32");
        p.write_i64(0x0102030405060708).expect("i64");
        p.write_double(1.0).expect("double");
        assert_eq!(
            bytes(p),
            vec![
                0x01, 0x02, 0xff, 0xff, 0xff, 0xfe, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
                0x08, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0
            ]
        );
    }

    #[test]
    fn strict_message_header() {
        let mut p = writer();
        p.write_message_begin("foo", message_type::CALL, 42).expect("write");
        let data = bytes(p);
        assert_eq!(&data[..4], &[0x80, 0x01, 0x00, 0x01]);
        let meta = reader(data).read_message_begin().expect("read");
        assert_eq!(
            meta,
            MessageMetadata {
                name: "foo".into(),
                message_type: message_type::CALL,
                seq_id: 42
            }
        );
    }

    #[test]
    fn non_strict_header_rejected_by_strict_reader() {
        let mut p = BinaryProtocol::builder(Cursor::new(Vec::new()))
            .strict_write(false)
            .build();
        p.write_message_begin("foo", message_type::REPLY, 1).expect("write");
        let data = bytes(p);

        let meta = reader(data.clone()).read_message_begin().expect("lenient read");
        assert_eq!(meta.message_type, message_type::REPLY);

        let mut strict = BinaryProtocol::builder(Cursor::new(data))
            .strict_read(true)
            .build();
        let err = strict.read_message_begin().expect_err("missing version");
        assert_eq!(err.to_string(), "Missing version in readMessageBegin");
    }

    #[test]
    fn bad_version_rejected() {
        let data = 0x8002_0001u32.to_be_bytes().to_vec();
        let err = reader(data).read_message_begin().expect_err("bad version");
        assert_eq!(err.to_string(), "Bad version in readMessageBegin");
    }

    #[test]
    fn size_limits_enforced_before_allocation() {
        let data = vec![0x7f, 0xff, 0xff, 0xff];
        let mut p = BinaryProtocol::builder(Cursor::new(data.clone()))
            .string_limit(16)
            .build();
        assert_eq!(
            p.read_string().expect_err("limit").to_string(),
            "String size limit exceeded"
        );
        let mut p = BinaryProtocol::builder(Cursor::new(data))
            .string_limit(16)
            .build();
        assert_eq!(
            p.read_binary().expect_err("limit").to_string(),
            "Binary size limit exceeded"
        );

        let mut list = vec![TType::I32.0];
        list.extend_from_slice(&1000i32.to_be_bytes());
        let mut p = BinaryProtocol::builder(Cursor::new(list))
            .container_limit(10)
            .build();
        assert!(matches!(
            p.read_list_begin(),
            Err(ProtocolError::ContainerLimit(1000))
        ));
    }

    #[test]
    fn negative_sizes_rejected() {
        let data = (-1i32).to_be_bytes().to_vec();
        assert!(matches!(
            reader(data).read_binary(),
            Err(ProtocolError::NegativeSize(-1))
        ));
    }

    #[test]
    fn truncated_string_is_an_error() {
        let data = vec![0, 0, 0, 10, b'a'];
        assert!(matches!(reader(data).read_string(), Err(ProtocolError::Io(_))));
    }
}
