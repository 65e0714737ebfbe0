//! Wire formats end to end: hand-written protocol calls, the dynamic codec,
//! and framing.

use std::collections::BTreeMap;
use std::io::Cursor;
use thrift_schema::protocol::{
    message_type, BinaryOutputMode, BinaryProtocol, CompactProtocol, SimpleJsonProtocol,
};
use thrift_schema::{
    Codec, CodecError, CodecOptions, FramedTransport, Loader, MemoryFileSystem, Protocol,
    ProtocolError, Schema, TType, Value,
};

const IDL: &str = r#"
namespace java com.example.inventory

enum Kind { TOOL = 1, PART = 2 }

struct Tag { 1: string key; 2: binary raw }

struct Item {
  1: required i64 id
  2: string name
  3: optional Kind kind
  4: list<Tag> tags
  5: set<i16> bins
  6: map<string, double> prices
  7: bool fragile
}

exception NotFound { 1: i64 id }

service Inventory {
  Item fetch(1: i64 id) throws (1: NotFound missing)
}
"#;

fn schema() -> Schema {
    Loader::new()
        .with_file_system(MemoryFileSystem::new().with_file("/idl/inventory.thrift", IDL))
        .add_thrift_file("/idl/inventory.thrift")
        .load()
        .expect("schema")
}

fn item() -> BTreeMap<String, Value> {
    let mut tag = BTreeMap::new();
    tag.insert("key".to_string(), Value::from("color"));
    tag.insert("raw".to_string(), Value::Binary(vec![0xde, 0xad]));
    let mut item = BTreeMap::new();
    item.insert("id".to_string(), Value::I64(42));
    item.insert("name".to_string(), Value::from("wrench"));
    item.insert("kind".to_string(), Value::I32(1));
    item.insert("tags".to_string(), Value::List(vec![Value::Struct(tag)]));
    item.insert("bins".to_string(), Value::Set(vec![Value::I16(3), Value::I16(-4)]));
    item.insert(
        "prices".to_string(),
        Value::Map(vec![(Value::from("usd"), Value::Double(9.5))]),
    );
    item.insert("fragile".to_string(), Value::Bool(true));
    item
}

#[test]
fn binary_string_bytes() {
    let mut p = BinaryProtocol::new(Cursor::new(Vec::new()));
    p.write_string("ab").expect("write");
    let bytes = p.into_inner().into_inner();
    assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x02, 0x61, 0x62]);
    let mut p = BinaryProtocol::new(Cursor::new(bytes));
    assert_eq!(p.read_string().expect("read"), "ab");
}

/// Field 1 (string), unknown fields 9 and 10 holding nested containers, then
/// field 2 (binary).
fn write_with_unknown_fields<P: Protocol>(p: &mut P) {
    p.write_struct_begin("Tag").expect("begin");
    p.write_field_begin("key", TType::STRING, 1).expect("field");
    p.write_string("k").expect("value");
    p.write_field_end().expect("end");

    p.write_field_begin("extra", TType::MAP, 9).expect("field");
    p.write_map_begin(TType::STRING, TType::LIST, 1).expect("map");
    p.write_string("nested").expect("key");
    p.write_list_begin(TType::STRUCT, 1).expect("list");
    p.write_struct_begin("Inner").expect("inner");
    p.write_field_begin("flag", TType::BOOL, 1).expect("field");
    p.write_bool(true).expect("bool");
    p.write_field_end().expect("end");
    p.write_field_stop().expect("stop");
    p.write_struct_end().expect("end");
    p.write_list_end().expect("end");
    p.write_map_end().expect("end");
    p.write_field_end().expect("end");

    p.write_field_begin("more", TType::DOUBLE, 10).expect("field");
    p.write_double(0.25).expect("double");
    p.write_field_end().expect("end");

    p.write_field_begin("raw", TType::STRING, 2).expect("field");
    p.write_binary(&[1, 2, 3]).expect("binary");
    p.write_field_end().expect("end");
    p.write_field_stop().expect("stop");
    p.write_struct_end().expect("end");
}

#[test]
fn unknown_fields_are_skipped_binary() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    let mut p = BinaryProtocol::new(Cursor::new(Vec::new()));
    write_with_unknown_fields(&mut p);
    let mut p = BinaryProtocol::new(Cursor::new(p.into_inner().into_inner()));
    let tag = codec.decode_named(&mut p, "Tag").expect("decode");
    assert_eq!(tag.len(), 2);
    assert_eq!(tag["key"], Value::from("k"));
    assert_eq!(tag["raw"], Value::Binary(vec![1, 2, 3]));
}

#[test]
fn unknown_fields_are_skipped_compact() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    let mut p = CompactProtocol::new(Cursor::new(Vec::new()));
    write_with_unknown_fields(&mut p);
    let mut p = CompactProtocol::new(Cursor::new(p.into_inner().into_inner()));
    let tag = codec.decode_named(&mut p, "Tag").expect("decode");
    assert_eq!(tag["raw"], Value::Binary(vec![1, 2, 3]));
}

#[test]
fn wire_type_mismatch_is_skipped() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    let mut p = BinaryProtocol::new(Cursor::new(Vec::new()));
    p.write_struct_begin("Tag").expect("begin");
    // `key` is a string in the schema; an i32 under that id is ignored.
    p.write_field_begin("key", TType::I32, 1).expect("field");
    p.write_i32(5).expect("value");
    p.write_field_end().expect("end");
    p.write_field_stop().expect("stop");
    p.write_struct_end().expect("end");
    let mut p = BinaryProtocol::new(Cursor::new(p.into_inner().into_inner()));
    assert!(codec.decode_named(&mut p, "Tag").expect("decode").is_empty());
}

#[test]
fn codec_round_trips_every_shape() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions { strict_enums: true });

    let mut binary = BinaryProtocol::new(Cursor::new(Vec::new()));
    codec.encode_named(&mut binary, "Item", &item()).expect("encode");
    let binary_bytes = binary.into_inner().into_inner();

    let mut compact = CompactProtocol::new(Cursor::new(Vec::new()));
    codec.encode_named(&mut compact, "Item", &item()).expect("encode");
    let compact_bytes = compact.into_inner().into_inner();
    assert!(compact_bytes.len() < binary_bytes.len());

    let mut binary = BinaryProtocol::new(Cursor::new(binary_bytes));
    assert_eq!(codec.decode_named(&mut binary, "Item").expect("decode"), item());
    let mut compact = CompactProtocol::new(Cursor::new(compact_bytes));
    assert_eq!(codec.decode_named(&mut compact, "Item").expect("decode"), item());
}

#[test]
fn strict_read_rejects_unversioned_messages() {
    let mut p = BinaryProtocol::builder(Cursor::new(Vec::new()))
        .strict_write(false)
        .build();
    p.write_message_begin("fetch", message_type::CALL, 1).expect("write");
    let bytes = p.into_inner().into_inner();
    let mut p = BinaryProtocol::builder(Cursor::new(bytes))
        .strict_read(true)
        .build();
    assert!(matches!(p.read_message_begin(), Err(ProtocolError::MissingVersion)));
}

#[test]
fn hostile_sizes_fail_fast() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    // Field 2 (`name`, string) claims two gigabytes.
    let bytes = vec![TType::STRING.0, 0, 2, 0x7f, 0xff, 0xff, 0xff];
    let mut p = BinaryProtocol::builder(Cursor::new(bytes))
        .string_limit(1024)
        .build();
    match codec.decode_named(&mut p, "Item") {
        Err(CodecError::Protocol(ProtocolError::StringSizeLimit)) => {}
        other => panic!("expected size limit, got {:?}", other),
    }
}

#[test]
fn json_rendering_of_a_struct() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    let mut p = SimpleJsonProtocol::new(Cursor::new(Vec::new()))
        .with_binary_output_mode(BinaryOutputMode::Base64);
    codec.encode_named(&mut p, "Item", &item()).expect("encode");
    let json = String::from_utf8(p.into_inner().into_inner()).expect("utf8");
    assert_eq!(
        json,
        concat!(
            r#"{"__thriftStruct":"Item","id":42,"name":"wrench","kind":1,"#,
            r#""tags":[{"__thriftStruct":"Tag","key":"color","raw":"3q0="}],"#,
            r#""bins":[3,-4],"prices":{"usd":9.5},"fragile":true}"#
        )
    );
}

#[test]
fn call_over_framed_transport() {
    let schema = schema();
    let codec = Codec::new(&schema, CodecOptions::default());
    let service = schema.find_service("Inventory").expect("service");

    let mut args = BTreeMap::new();
    args.insert("id".to_string(), Value::I64(42));
    let mut p = CompactProtocol::new(FramedTransport::new(Cursor::new(Vec::new())));
    codec.write_call(&mut p, service, "fetch", 11, &args).expect("call");
    let wire = p.into_inner().into_inner().into_inner();
    let frame_len = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
    assert_eq!(frame_len, wire.len() - 4);

    let mut p = CompactProtocol::new(FramedTransport::new(Cursor::new(wire)));
    let call = codec.read_call(&mut p, service).expect("read");
    assert_eq!(call.method, "fetch");
    assert_eq!(call.seq_id, 11);
    assert_eq!(call.args, args);

    let mut missing = BTreeMap::new();
    missing.insert("id".to_string(), Value::I64(42));
    let mut result = BTreeMap::new();
    result.insert("missing".to_string(), Value::Struct(missing));
    let mut p = CompactProtocol::new(FramedTransport::new(Cursor::new(Vec::new())));
    codec
        .write_reply(&mut p, service, "fetch", 11, &result)
        .expect("reply");
    let wire = p.into_inner().into_inner().into_inner();
    let mut p = CompactProtocol::new(FramedTransport::new(Cursor::new(wire)));
    match codec.read_reply(&mut p, service, "fetch", 11) {
        Err(CodecError::Exception { exception, .. }) => assert_eq!(exception, "NotFound"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}
