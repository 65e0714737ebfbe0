//! A write-only protocol that renders values as idiomatic JSON: structs and
//! maps become objects keyed by field name, lists and sets become arrays.
//! Field ids and precise types are dropped, so nothing can be read back.

use super::*;
use base64::Engine;

/// How `binary` values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryOutputMode {
    /// Lowercase hex digits.
    #[default]
    Hex,
    /// Standard padded base64.
    Base64,
    /// The bytes as UTF-8 text, invalid sequences replaced.
    Unicode,
}

#[derive(Debug)]
enum WriteContext {
    List { has_written: bool },
    Map { has_written: bool, expecting_value: bool },
}

impl WriteContext {
    fn list() -> Self {
        WriteContext::List { has_written: false }
    }

    fn map() -> Self {
        WriteContext::Map {
            has_written: false,
            expecting_value: false,
        }
    }

    fn separator(&mut self) -> Option<u8> {
        match self {
            WriteContext::List { has_written } => {
                let sep = has_written.then_some(b',');
                *has_written = true;
                sep
            }
            WriteContext::Map {
                has_written,
                expecting_value,
            } => {
                let sep = if !*has_written {
                    None
                } else if *expecting_value {
                    Some(b':')
                } else {
                    Some(b',')
                };
                *has_written = true;
                *expecting_value = !*expecting_value;
                sep
            }
        }
    }
}

fn escape(c: char) -> Option<&'static str> {
    const CONTROL: [&str; 32] = [
        "\\u0000", "\\u0001", "\\u0002", "\\u0003", "\\u0004", "\\u0005", "\\u0006", "\\u0007",
        "\\b", "\\t", "\\n", "\\u000b", "\\f", "\\r", "\\u000e", "\\u000f", "\\u0010",
        "\\u0011", "\\u0012", "\\u0013", "\\u0014", "\\u0015", "\\u0016", "\\u0017", "\\u0018",
        "\\u0019", "\\u001a", "\\u001b", "\\u001c", "\\u001d", "\\u001e", "\\u001f",
    ];
    match c {
        '"' => Some("\\\""),
        '\\' => Some("\\\\"),
        c if (c as u32) < 32 => Some(CONTROL[c as usize]),
        _ => None,
    }
}

fn hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

pub struct SimpleJsonProtocol<T> {
    transport: T,
    stack: Vec<WriteContext>,
    binary_output_mode: BinaryOutputMode,
}

impl<T: Transport> SimpleJsonProtocol<T> {
    pub fn new(transport: T) -> Self {
        SimpleJsonProtocol {
            transport,
            stack: Vec::new(),
            binary_output_mode: BinaryOutputMode::default(),
        }
    }

    pub fn with_binary_output_mode(mut self, mode: BinaryOutputMode) -> Self {
        self.binary_output_mode = mode;
        self
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn before_write(&mut self) -> Result<()> {
        if let Some(sep) = self.stack.last_mut().and_then(WriteContext::separator) {
            self.transport.write_all(&[sep])?;
        }
        Ok(())
    }

    fn raw(&mut self, text: &str) -> Result<()> {
        self.transport.write_all(text.as_bytes())?;
        Ok(())
    }

    fn open(&mut self, context: WriteContext, bracket: &str) -> Result<()> {
        self.before_write()?;
        self.stack.push(context);
        self.raw(bracket)
    }

    fn close(&mut self, bracket: &str) -> Result<()> {
        self.raw(bracket)?;
        match self.stack.pop() {
            Some(WriteContext::Map {
                expecting_value: true,
                ..
            }) => Err(ProtocolError::InvalidData(
                "Incomplete JSON map, expected a value".to_string(),
            )),
            Some(_) => Ok(()),
            None => Err(ProtocolError::InvalidData("stack underflow".to_string())),
        }
    }

    fn scalar(&mut self, text: &str) -> Result<()> {
        self.before_write()?;
        self.raw(text)
    }
}

impl<T: Transport> Protocol for SimpleJsonProtocol<T> {
    fn write_message_begin(&mut self, name: &str, message_type: u8, _seq_id: i32) -> Result<()> {
        let tag = TType(message_type);
        self.write_map_begin(tag, tag, 0)?;
        self.write_string("name")?;
        self.write_string(name)?;
        self.write_string("value")
    }

    fn write_message_end(&mut self) -> Result<()> {
        self.write_map_end()
    }

    fn write_struct_begin(&mut self, name: &str) -> Result<()> {
        self.open(WriteContext::map(), "{")?;
        self.write_string("__thriftStruct")?;
        self.write_string(name)
    }

    fn write_struct_end(&mut self) -> Result<()> {
        self.close("}")
    }

    fn write_field_begin(&mut self, name: &str, _type_id: TType, _field_id: i16) -> Result<()> {
        self.write_string(name)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_map_begin(&mut self, _key_type: TType, _value_type: TType, _size: usize) -> Result<()> {
        self.open(WriteContext::map(), "{")
    }

    fn write_map_end(&mut self) -> Result<()> {
        self.close("}")
    }

    fn write_list_begin(&mut self, _element_type: TType, _size: usize) -> Result<()> {
        self.open(WriteContext::list(), "[")
    }

    fn write_list_end(&mut self) -> Result<()> {
        self.close("]")
    }

    fn write_set_begin(&mut self, _element_type: TType, _size: usize) -> Result<()> {
        self.open(WriteContext::list(), "[")
    }

    fn write_set_end(&mut self) -> Result<()> {
        self.close("]")
    }

    fn write_bool(&mut self, value: bool) -> Result<()> {
        self.scalar(if value { "true" } else { "false" })
    }

    fn write_byte(&mut self, value: i8) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.scalar(&value.to_string())
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(ProtocolError::InvalidData(format!(
                "{} cannot be written as a JSON number",
                value
            )));
        }
        self.scalar(&format!("{:?}", value))
    }

    fn write_string(&mut self, value: &str) -> Result<()> {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('"');
        for c in value.chars() {
            match escape(c) {
                Some(escaped) => out.push_str(escaped),
                None => out.push(c),
            }
        }
        out.push('"');
        self.scalar(&out)
    }

    fn write_binary(&mut self, value: &[u8]) -> Result<()> {
        let text = match self.binary_output_mode {
            BinaryOutputMode::Hex => hex(value),
            BinaryOutputMode::Base64 => base64::engine::general_purpose::STANDARD.encode(value),
            BinaryOutputMode::Unicode => String::from_utf8_lossy(value).into_owned(),
        };
        self.write_string(&text)
    }

    fn read_message_begin(&mut self) -> Result<MessageMetadata> {
        Err(ProtocolError::Unsupported("read_message_begin"))
    }

    fn read_message_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_message_end"))
    }

    fn read_struct_begin(&mut self) -> Result<StructMetadata> {
        Err(ProtocolError::Unsupported("read_struct_begin"))
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_struct_end"))
    }

    fn read_field_begin(&mut self) -> Result<FieldMetadata> {
        Err(ProtocolError::Unsupported("read_field_begin"))
    }

    fn read_field_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_field_end"))
    }

    fn read_map_begin(&mut self) -> Result<MapMetadata> {
        Err(ProtocolError::Unsupported("read_map_begin"))
    }

    fn read_map_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_map_end"))
    }

    fn read_list_begin(&mut self) -> Result<ListMetadata> {
        Err(ProtocolError::Unsupported("read_list_begin"))
    }

    fn read_list_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_list_end"))
    }

    fn read_set_begin(&mut self) -> Result<SetMetadata> {
        Err(ProtocolError::Unsupported("read_set_begin"))
    }

    fn read_set_end(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported("read_set_end"))
    }

    fn read_bool(&mut self) -> Result<bool> {
        Err(ProtocolError::Unsupported("read_bool"))
    }

    fn read_byte(&mut self) -> Result<i8> {
        Err(ProtocolError::Unsupported("read_byte"))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Err(ProtocolError::Unsupported("read_i16"))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Err(ProtocolError::Unsupported("read_i32"))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Err(ProtocolError::Unsupported("read_i64"))
    }

    fn read_double(&mut self) -> Result<f64> {
        Err(ProtocolError::Unsupported("read_double"))
    }

    fn read_string(&mut self) -> Result<String> {
        Err(ProtocolError::Unsupported("read_string"))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        Err(ProtocolError::Unsupported("read_binary"))
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

    fn render(f: impl FnOnce(&mut SimpleJsonProtocol<Cursor<Vec<u8>>>) -> Result<()>) -> String {
        render_with(BinaryOutputMode::Hex, f)
    }

    fn render_with(
        mode: BinaryOutputMode,
        f: impl FnOnce(&mut SimpleJsonProtocol<Cursor<Vec<u8>>>) -> Result<()>,
    ) -> String {
        let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new())).with_binary_output_mode(mode);
        f(&mut p).expect("write");
        String::from_utf8(p.into_inner().into_inner()).expect("utf8")
    }

    #[test]
    fn struct_with_fields() {
        let json = render(|p| {
            p.write_struct_begin("Point")?;
            p.write_field_begin("x", TType::I32, 1)?;
            p.write_i32(3)?;
            p.write_field_end()?;
            p.write_field_begin("tags", TType::LIST, 2)?;
            p.write_list_begin(TType::STRING, 2)?;
            p.write_string("a")?;
            p.write_string("b")?;
            p.write_list_end()?;
            p.write_field_end()?;
            p.write_field_stop()?;
            p.write_struct_end()
        });
        assert_eq!(
            json,
            r#"{"__thriftStruct":"Point","x":3,"tags":["a","b"]}"#
        );
    }

    #[test]
    fn message_wrapper() {
        let json = render(|p| {
            p.write_message_begin("ping", message_type::CALL, 9)?;
            p.write_struct_begin("ping_args")?;
            p.write_field_stop()?;
            p.write_struct_end()?;
            p.write_message_end()
        });
        assert_eq!(
            json,
            r#"{"name":"ping","value":{"__thriftStruct":"ping_args"}}"#
        );
    }

    #[test]
    fn strings_are_escaped() {
        let json = render(|p| p.write_string("a\"b\\c\n\u{1}\u{8}é"));
        assert_eq!(json, "\"a\\\"b\\\\c\\n\\u0001\\bé\"");
    }

    #[test]
    fn binary_modes() {
        assert_eq!(render(|p| p.write_binary(&[0x01, 0xab])), "\"01ab\"");
        assert_eq!(
            render_with(BinaryOutputMode::Base64, |p| p.write_binary(b"hi")),
            "\"aGk=\""
        );
        assert_eq!(
            render_with(BinaryOutputMode::Unicode, |p| p.write_binary(b"hi")),
            "\"hi\""
        );
    }

    #[test]
    fn doubles_keep_a_fraction() {
        assert_eq!(render(|p| p.write_double(1.0)), "1.0");
    }

    #[test]
    fn non_finite_doubles_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new()));
            let err = p.write_double(value).expect_err("non-finite");
            assert!(matches!(err, ProtocolError::InvalidData(_)), "{}", err);
        }
        let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new()));
        let err = p.write_double(f64::NAN).expect_err("nan");
        assert_eq!(err.to_string(), "Invalid data: NaN cannot be written as a JSON number");
        assert!(p.into_inner().into_inner().is_empty());
    }

    #[test]
    fn incomplete_map_detected() {
        let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new()));
        p.write_map_begin(TType::STRING, TType::I32, 1).expect("begin");
        p.write_string("key").expect("key");
        let err = p.write_map_end().expect_err("incomplete");
        assert_eq!(err.to_string(), "Invalid data: Incomplete JSON map, expected a value");
    }

    #[test]
    fn reads_are_unsupported() {
        let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new()));
        assert!(matches!(p.read_i32(), Err(ProtocolError::Unsupported(_))));
        assert!(matches!(p.read_message_begin(), Err(ProtocolError::Unsupported(_))));
        assert!(matches!(p.skip(TType::I32), Err(ProtocolError::Unsupported(_))));
    }
}
