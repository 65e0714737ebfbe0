//! # thrift-schema: Thrift IDL front end and wire protocols
//!
//! Loads Thrift IDL files into a linked, validated [`Schema`], and reads and
//! writes values on the wire with the binary, compact and (write-only)
//! simple-JSON protocols.
//!
//! ## Pipeline
//!
//! - **Parse**: a PEST grammar turns each file into an unresolved element tree
//!   ([`ast::ThriftFileElement`]); syntax errors are collected, not fatal.
//! - **Load**: [`Loader`] follows `include` directives (relative to the
//!   including file, then the include path), rejecting circular includes.
//! - **Link**: type and constant names are resolved across the include graph;
//!   typedef and constant cycles are reported.
//! - **Validate**: field ids, union rules, oneway methods, thrown types,
//!   service inheritance and every constant value are checked.
//!
//! Every diagnostic carries a [`Location`]; a failed load returns all of them
//! at once in a [`LoadError`].
//!
//! ## Example
//!
//! ```no_run
//! use thrift_schema::{Codec, CodecOptions, Loader, Value};
//! use thrift_schema::protocol::CompactProtocol;
//! use std::collections::BTreeMap;
//!
//! let schema = Loader::new()
//!     .add_include_path("idl/common")
//!     .add_thrift_file("idl/service.thrift")
//!     .load()?;
//!
//! let codec = Codec::new(&schema, CodecOptions::default());
//! let mut fields = BTreeMap::new();
//! fields.insert("id".to_string(), Value::I64(7));
//! let mut protocol = CompactProtocol::new(std::io::Cursor::new(Vec::new()));
//! codec.encode_named(&mut protocol, "User", &fields)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod ast;
pub mod codec;
mod constant;
pub mod dump;
pub mod error;
pub mod frame;
mod linker;
pub mod loader;
pub mod location;
pub mod parser;
pub mod program;
pub mod protocol;
pub mod schema;
pub mod types;
pub mod validate;
pub mod value;

pub use codec::{ApplicationException, Codec, CodecError, CodecOptions};
pub use error::{ErrorReporter, Level, LoadError, Report};
pub use frame::{FrameError, FramedTransport};
pub use loader::{load, DiskFileSystem, FileSystem, Loader, MemoryFileSystem};
pub use location::Location;
pub use protocol::{Protocol, ProtocolError, TType};
pub use schema::{Schema, SchemaBuilder};
pub use types::{BuiltinType, ThriftType};
pub use validate::validate;
pub use value::Value;
