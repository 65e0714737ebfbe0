//! Schema-driven encoding and decoding of dynamic [`Value`]s over any
//! [`Protocol`].
//!
//! Decoding follows the usual forward-compatibility rules: unknown field ids
//! and fields whose wire type disagrees with the schema are skipped, and
//! required fields are checked once the struct is complete.

use crate::protocol::{
    message_type, ttype_of, Protocol, ProtocolError, TType, MAX_SKIP_DEPTH,
};
use crate::schema::Schema;
use crate::types::*;
use crate::value::{StructValue, Value};
use std::fmt;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default)]
pub struct CodecOptions {
    /// Reject enum values with no matching member, on both encode and decode.
    pub strict_enums: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Unknown struct: {0}")]
    UnknownStruct(String),
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Unknown field '{field}' for {struct_name}")]
    UnknownField { struct_name: String, field: String },
    #[error("Required field '{field}' is missing in {struct_name}")]
    MissingRequired { struct_name: String, field: String },
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("{value} is not a valid value for enum {enum_name}")]
    UnknownEnumValue { enum_name: String, value: i32 },
    #[error("union {0} must have exactly one field set")]
    UnionFieldCount(String),
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("{method} failed: unknown result")]
    MissingResult { method: String },
    #[error("{0}")]
    Application(ApplicationException),
    #[error("{method} threw {exception}")]
    Exception {
        method: String,
        /// Name of the result field that was set.
        field: String,
        exception: String,
        value: StructValue,
    },
}

/// Error raised by the server's message dispatch rather than the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    pub message: String,
    pub kind: i32,
}

impl ApplicationException {
    pub const UNKNOWN: i32 = 0;
    pub const UNKNOWN_METHOD: i32 = 1;
    pub const INVALID_MESSAGE_TYPE: i32 = 2;
    pub const WRONG_METHOD_NAME: i32 = 3;
    pub const BAD_SEQUENCE_ID: i32 = 4;
    pub const MISSING_RESULT: i32 = 5;
    pub const INTERNAL_ERROR: i32 = 6;
    pub const PROTOCOL_ERROR: i32 = 7;

    pub fn new(kind: i32, message: impl Into<String>) -> Self {
        ApplicationException {
            message: message.into(),
            kind,
        }
    }

    fn write<P: Protocol + ?Sized>(&self, protocol: &mut P) -> Result<(), ProtocolError> {
        protocol.write_struct_begin("TApplicationException")?;
        protocol.write_field_begin("message", TType::STRING, 1)?;
        protocol.write_string(&self.message)?;
        protocol.write_field_end()?;
        protocol.write_field_begin("type", TType::I32, 2)?;
        protocol.write_i32(self.kind)?;
        protocol.write_field_end()?;
        protocol.write_field_stop()?;
        protocol.write_struct_end()
    }

    fn read<P: Protocol + ?Sized>(protocol: &mut P) -> Result<Self, ProtocolError> {
        let mut exception = ApplicationException::new(Self::UNKNOWN, "");
        protocol.read_struct_begin()?;
        loop {
            let field = protocol.read_field_begin()?;
            match (field.field_id, field.type_id) {
                (_, TType::STOP) => break,
                (1, TType::STRING) => exception.message = protocol.read_string()?,
                (2, TType::I32) => exception.kind = protocol.read_i32()?,
                (_, other) => protocol.skip(other)?,
            }
            protocol.read_field_end()?;
        }
        protocol.read_struct_end()?;
        Ok(exception)
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application exception ({}): {}", self.kind, self.message)
    }
}

/// A decoded call: method name, sequence id and arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: String,
    pub seq_id: i32,
    pub one_way: bool,
    pub args: StructValue,
}

pub struct Codec<'a> {
    schema: &'a Schema,
    options: CodecOptions,
}

impl<'a> Codec<'a> {
    pub fn new(schema: &'a Schema, options: CodecOptions) -> Self {
        Codec { schema, options }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Encode the struct named `name` (bare or `program.Name`).
    pub fn encode_named<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        name: &str,
        values: &StructValue,
    ) -> Result<(), CodecError> {
        let id = self
            .schema
            .find_struct(name)
            .ok_or_else(|| CodecError::UnknownStruct(name.to_string()))?;
        self.encode_struct(protocol, id, values)
    }

    pub fn decode_named<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        name: &str,
    ) -> Result<StructValue, CodecError> {
        let id = self
            .schema
            .find_struct(name)
            .ok_or_else(|| CodecError::UnknownStruct(name.to_string()))?;
        self.decode_struct(protocol, id)
    }

    pub fn encode_struct<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        id: StructId,
        values: &StructValue,
    ) -> Result<(), CodecError> {
        self.write_struct(protocol, self.schema.struct_type(id), values, MAX_SKIP_DEPTH)
    }

    pub fn decode_struct<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        id: StructId,
    ) -> Result<StructValue, CodecError> {
        self.read_struct(protocol, self.schema.struct_type(id), MAX_SKIP_DEPTH)
    }

    /// Encode one value of type `ty`.
    pub fn encode_value<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        ty: &ThriftType,
        value: &Value,
    ) -> Result<(), CodecError> {
        self.write_value(protocol, ty, value, MAX_SKIP_DEPTH)
    }

    pub fn decode_value<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        ty: &ThriftType,
    ) -> Result<Value, CodecError> {
        self.read_value(protocol, ty, MAX_SKIP_DEPTH)
    }

    /// Write a call to `method` of `service`, including inherited methods.
    pub fn write_call<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        service: ServiceId,
        method: &str,
        seq_id: i32,
        args: &StructValue,
    ) -> Result<(), CodecError> {
        let (owner, m) = self.find_method(service, method)?;
        let kind = if m.one_way {
            message_type::ONEWAY
        } else {
            message_type::CALL
        };
        protocol.write_message_begin(&m.name, kind, seq_id)?;
        let args_struct = m.args_struct(&owner.meta);
        self.write_struct(protocol, &args_struct, args, MAX_SKIP_DEPTH)?;
        protocol.write_message_end()?;
        protocol.flush()?;
        debug!(method = %m.name, seq_id, "wrote call");
        Ok(())
    }

    /// Read a call addressed to `service`.
    pub fn read_call<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        service: ServiceId,
    ) -> Result<Call, CodecError> {
        let header = protocol.read_message_begin()?;
        let one_way = match header.message_type {
            message_type::CALL => false,
            message_type::ONEWAY => true,
            other => {
                return Err(CodecError::UnexpectedMessage(format!(
                    "message type {} is not a call",
                    other
                )))
            }
        };
        let (owner, m) = self.find_method(service, &header.name)?;
        let args_struct = m.args_struct(&owner.meta);
        let args = self.read_struct(protocol, &args_struct, MAX_SKIP_DEPTH)?;
        protocol.read_message_end()?;
        Ok(Call {
            method: header.name,
            seq_id: header.seq_id,
            one_way,
            args,
        })
    }

    /// Write the reply to a call. `result` holds either `success` or one
    /// declared exception field; it is empty for a void method.
    pub fn write_reply<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        service: ServiceId,
        method: &str,
        seq_id: i32,
        result: &StructValue,
    ) -> Result<(), CodecError> {
        let (owner, m) = self.find_method(service, method)?;
        let result_struct = m.result_struct(&owner.meta);
        if result.len() > 1 {
            return Err(CodecError::UnionFieldCount(result_struct.meta.name));
        }
        protocol.write_message_begin(&m.name, message_type::REPLY, seq_id)?;
        self.write_fields(protocol, &result_struct, result, MAX_SKIP_DEPTH)?;
        protocol.write_message_end()?;
        protocol.flush()?;
        Ok(())
    }

    pub fn write_application_exception<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        method: &str,
        seq_id: i32,
        exception: &ApplicationException,
    ) -> Result<(), CodecError> {
        protocol.write_message_begin(method, message_type::EXCEPTION, seq_id)?;
        exception.write(protocol)?;
        protocol.write_message_end()?;
        protocol.flush()?;
        Ok(())
    }

    /// Read the reply to a call of `method` with sequence id `seq_id`.
    ///
    /// Returns the `success` value, or `None` for a void method. A declared
    /// exception comes back as [`CodecError::Exception`], a dispatch failure
    /// as [`CodecError::Application`].
    pub fn read_reply<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        service: ServiceId,
        method: &str,
        seq_id: i32,
    ) -> Result<Option<Value>, CodecError> {
        let (owner, m) = self.find_method(service, method)?;
        let header = protocol.read_message_begin()?;
        if header.message_type == message_type::EXCEPTION {
            let exception = ApplicationException::read(protocol)?;
            protocol.read_message_end()?;
            return Err(CodecError::Application(exception));
        }
        if header.message_type != message_type::REPLY {
            return Err(CodecError::UnexpectedMessage(format!(
                "message type {} is not a reply",
                header.message_type
            )));
        }
        if header.name != m.name {
            return Err(CodecError::UnexpectedMessage(format!(
                "expected a reply to '{}', got '{}'",
                m.name, header.name
            )));
        }
        if header.seq_id != seq_id {
            return Err(CodecError::UnexpectedMessage(format!(
                "expected sequence id {}, got {}",
                seq_id, header.seq_id
            )));
        }

        let result_struct = m.result_struct(&owner.meta);
        let mut result = self.read_struct(protocol, &result_struct, MAX_SKIP_DEPTH)?;
        protocol.read_message_end()?;

        if let Some(success) = result.remove("success") {
            return Ok(Some(success));
        }
        if let Some((field, value)) = result.into_iter().next() {
            let exception = result_struct
                .field_named(&field)
                .map(|f| self.schema.type_name(&f.field_type))
                .unwrap_or_default();
            return match value {
                Value::Struct(value) => Err(CodecError::Exception {
                    method: m.name.clone(),
                    field,
                    exception,
                    value,
                }),
                other => Err(CodecError::TypeMismatch {
                    expected: exception,
                    found: other.kind().to_string(),
                }),
            };
        }
        if m.return_type.is_void() {
            Ok(None)
        } else {
            Err(CodecError::MissingResult {
                method: m.name.clone(),
            })
        }
    }

    fn find_method(
        &self,
        service: ServiceId,
        name: &str,
    ) -> Result<(&'a ServiceType, &'a ServiceMethod), CodecError> {
        let schema = self.schema;
        schema
            .service_chain(service)
            .into_iter()
            .map(|id| schema.service(id))
            .find_map(|s| s.method(name).map(|m| (s, m)))
            .ok_or_else(|| CodecError::UnknownMethod(name.to_string()))
    }

    fn write_struct<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        s: &StructType,
        values: &StructValue,
        depth: usize,
    ) -> Result<(), CodecError> {
        if s.is_union() && values.len() != 1 {
            return Err(CodecError::UnionFieldCount(s.meta.name.clone()));
        }
        self.write_fields(protocol, s, values, depth)
    }

    fn write_fields<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        s: &StructType,
        values: &StructValue,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth == 0 {
            return Err(ProtocolError::DepthLimit.into());
        }
        if let Some(unknown) = values.keys().find(|k| s.field_named(k).is_none()) {
            return Err(CodecError::UnknownField {
                struct_name: s.meta.name.clone(),
                field: unknown.clone(),
            });
        }
        protocol.write_struct_begin(&s.meta.name)?;
        for field in &s.fields {
            let Some(value) = values.get(&field.name) else {
                if field.is_required() {
                    return Err(CodecError::MissingRequired {
                        struct_name: s.meta.name.clone(),
                        field: field.name.clone(),
                    });
                }
                continue;
            };
            let wire = ttype_of(self.schema.true_type(&field.field_type));
            protocol.write_field_begin(&field.name, wire, field_id(field)?)?;
            self.write_value(protocol, &field.field_type, value, depth - 1)?;
            protocol.write_field_end()?;
        }
        protocol.write_field_stop()?;
        protocol.write_struct_end()?;
        Ok(())
    }

    fn write_value<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        ty: &ThriftType,
        value: &Value,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth == 0 {
            return Err(ProtocolError::DepthLimit.into());
        }
        let ty = self.schema.true_type(ty);
        match (ty, value) {
            (ThriftType::Builtin(b), _) => self.write_builtin(protocol, *b, value)?,
            (ThriftType::Enum(id), Value::I32(v)) => {
                self.check_enum(*id, *v)?;
                protocol.write_i32(*v)?;
            }
            (ThriftType::List(elem), Value::List(items))
            | (ThriftType::List(elem), Value::Set(items)) => {
                protocol.write_list_begin(self.wire_type(elem), items.len())?;
                for item in items {
                    self.write_value(protocol, elem, item, depth - 1)?;
                }
                protocol.write_list_end()?;
            }
            (ThriftType::Set(elem), Value::Set(items))
            | (ThriftType::Set(elem), Value::List(items)) => {
                protocol.write_set_begin(self.wire_type(elem), items.len())?;
                for item in items {
                    self.write_value(protocol, elem, item, depth - 1)?;
                }
                protocol.write_set_end()?;
            }
            (ThriftType::Map(key, val), Value::Map(entries)) => {
                protocol.write_map_begin(self.wire_type(key), self.wire_type(val), entries.len())?;
                for (k, v) in entries {
                    self.write_value(protocol, key, k, depth - 1)?;
                    self.write_value(protocol, val, v, depth - 1)?;
                }
                protocol.write_map_end()?;
            }
            (ThriftType::Struct(id), Value::Struct(fields)) => {
                self.write_struct(protocol, self.schema.struct_type(*id), fields, depth - 1)?;
            }
            _ => return Err(self.mismatch(ty, value)),
        }
        Ok(())
    }

    fn write_builtin<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        b: BuiltinType,
        value: &Value,
    ) -> Result<(), CodecError> {
        match (b, value) {
            (BuiltinType::Bool, Value::Bool(v)) => protocol.write_bool(*v)?,
            (BuiltinType::Byte | BuiltinType::I8, Value::Byte(v)) => protocol.write_byte(*v)?,
            (BuiltinType::I16, Value::I16(v)) => protocol.write_i16(*v)?,
            (BuiltinType::I32, Value::I32(v)) => protocol.write_i32(*v)?,
            (BuiltinType::I64, Value::I64(v)) => protocol.write_i64(*v)?,
            (BuiltinType::Double, Value::Double(v)) => protocol.write_double(*v)?,
            (BuiltinType::String, Value::String(v)) => protocol.write_string(v)?,
            (BuiltinType::Binary, Value::Binary(v)) => protocol.write_binary(v)?,
            (BuiltinType::Binary, Value::String(v)) => protocol.write_binary(v.as_bytes())?,
            _ => return Err(self.mismatch(&ThriftType::Builtin(b), value)),
        }
        Ok(())
    }

    fn read_struct<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        s: &StructType,
        depth: usize,
    ) -> Result<StructValue, CodecError> {
        if depth == 0 {
            return Err(ProtocolError::DepthLimit.into());
        }
        let mut values = StructValue::new();
        protocol.read_struct_begin()?;
        loop {
            let header = protocol.read_field_begin()?;
            if header.type_id == TType::STOP {
                break;
            }
            match s.field(i32::from(header.field_id)) {
                Some(field) if self.wire_type(&field.field_type) == header.type_id => {
                    let value = self.read_value(protocol, &field.field_type, depth - 1)?;
                    values.insert(field.name.clone(), value);
                }
                Some(field) => {
                    trace!(
                        struct_name = %s.meta.name,
                        field = %field.name,
                        wire = ?header.type_id,
                        "skipping field with mismatched wire type"
                    );
                    protocol.skip(header.type_id)?;
                }
                None => {
                    trace!(
                        struct_name = %s.meta.name,
                        field_id = header.field_id,
                        "skipping unknown field"
                    );
                    protocol.skip(header.type_id)?;
                }
            }
            protocol.read_field_end()?;
        }
        protocol.read_struct_end()?;

        if let Some(missing) = s
            .fields
            .iter()
            .find(|f| f.is_required() && !values.contains_key(&f.name))
        {
            return Err(CodecError::MissingRequired {
                struct_name: s.meta.name.clone(),
                field: missing.name.clone(),
            });
        }
        if s.is_union() && values.len() > 1 {
            return Err(CodecError::UnionFieldCount(s.meta.name.clone()));
        }
        Ok(values)
    }

    fn read_value<P: Protocol + ?Sized>(
        &self,
        protocol: &mut P,
        ty: &ThriftType,
        depth: usize,
    ) -> Result<Value, CodecError> {
        if depth == 0 {
            return Err(ProtocolError::DepthLimit.into());
        }
        let ty = self.schema.true_type(ty);
        let value = match ty {
            ThriftType::Builtin(b) => match b {
                BuiltinType::Bool => Value::Bool(protocol.read_bool()?),
                BuiltinType::Byte | BuiltinType::I8 => Value::Byte(protocol.read_byte()?),
                BuiltinType::I16 => Value::I16(protocol.read_i16()?),
                BuiltinType::I32 => Value::I32(protocol.read_i32()?),
                BuiltinType::I64 => Value::I64(protocol.read_i64()?),
                BuiltinType::Double => Value::Double(protocol.read_double()?),
                BuiltinType::String => Value::String(protocol.read_string()?),
                BuiltinType::Binary => Value::Binary(protocol.read_binary()?),
                BuiltinType::Void => return Err(self.unreadable(ty)),
            },
            ThriftType::Enum(id) => {
                let v = protocol.read_i32()?;
                self.check_enum(*id, v)?;
                Value::I32(v)
            }
            ThriftType::List(elem) => {
                let header = protocol.read_list_begin()?;
                self.expect_element(elem, header.element_type, header.size)?;
                let mut items = Vec::with_capacity(header.size.min(1024));
                for _ in 0..header.size {
                    items.push(self.read_value(protocol, elem, depth - 1)?);
                }
                protocol.read_list_end()?;
                Value::List(items)
            }
            ThriftType::Set(elem) => {
                let header = protocol.read_set_begin()?;
                self.expect_element(elem, header.element_type, header.size)?;
                let mut items = Vec::with_capacity(header.size.min(1024));
                for _ in 0..header.size {
                    items.push(self.read_value(protocol, elem, depth - 1)?);
                }
                protocol.read_set_end()?;
                Value::Set(items)
            }
            ThriftType::Map(key, val) => {
                let header = protocol.read_map_begin()?;
                self.expect_element(key, header.key_type, header.size)?;
                self.expect_element(val, header.value_type, header.size)?;
                let mut entries = Vec::with_capacity(header.size.min(1024));
                for _ in 0..header.size {
                    let k = self.read_value(protocol, key, depth - 1)?;
                    let v = self.read_value(protocol, val, depth - 1)?;
                    entries.push((k, v));
                }
                protocol.read_map_end()?;
                Value::Map(entries)
            }
            ThriftType::Struct(id) => {
                Value::Struct(self.read_struct(protocol, self.schema.struct_type(*id), depth - 1)?)
            }
            ThriftType::Typedef(_) | ThriftType::Service(_) | ThriftType::Annotated(..) => {
                return Err(self.unreadable(ty))
            }
        };
        Ok(value)
    }

    fn wire_type(&self, ty: &ThriftType) -> TType {
        ttype_of(self.schema.true_type(ty))
    }

    fn expect_element(&self, ty: &ThriftType, wire: TType, size: usize) -> Result<(), CodecError> {
        if size > 0 && self.wire_type(ty) != wire {
            return Err(CodecError::TypeMismatch {
                expected: self.schema.type_name(ty),
                found: format!("{:?}", wire),
            });
        }
        Ok(())
    }

    fn check_enum(&self, id: EnumId, value: i32) -> Result<(), CodecError> {
        let e = self.schema.enum_type(id);
        if self.options.strict_enums && e.find_by_value(value).is_none() {
            return Err(CodecError::UnknownEnumValue {
                enum_name: e.meta.name.clone(),
                value,
            });
        }
        Ok(())
    }

    fn mismatch(&self, ty: &ThriftType, value: &Value) -> CodecError {
        CodecError::TypeMismatch {
            expected: self.schema.type_name(ty),
            found: value.kind().to_string(),
        }
    }

    fn unreadable(&self, ty: &ThriftType) -> CodecError {
        CodecError::TypeMismatch {
            expected: "a value type".to_string(),
            found: self.schema.type_name(ty),
        }
    }
}

fn field_id(field: &Field) -> Result<i16, CodecError> {
    i16::try_from(field.id).map_err(|_| {
        ProtocolError::InvalidData(format!(
            "field id {} of '{}' does not fit in i16",
            field.id, field.name
        ))
        .into()
    })
}
