//! Parse-time element tree for Thrift IDL files.
//!
//! Elements are produced once by the parser and never mutated. Type references
//! are kept as unresolved [`TypeElement`]s and literal values as
//! [`ConstValueElement`]s; the linker turns them into resolved types.

use crate::location::Location;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Language scope of a `namespace` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespaceScope {
    All,
    Cpp,
    Java,
    Py,
    PyTwisted,
    Perl,
    Rb,
    Cocoa,
    Csharp,
    Php,
    SmalltalkCategory,
    SmalltalkPrefix,
    CGlib,
    Go,
    Lua,
    St,
    Delphi,
    Js,
    Kotlin,
    Jvm,
    Swift,
}

impl NamespaceScope {
    pub const ALL_SCOPES: [NamespaceScope; 21] = [
        NamespaceScope::All,
        NamespaceScope::Cpp,
        NamespaceScope::Java,
        NamespaceScope::Py,
        NamespaceScope::PyTwisted,
        NamespaceScope::Perl,
        NamespaceScope::Rb,
        NamespaceScope::Cocoa,
        NamespaceScope::Csharp,
        NamespaceScope::Php,
        NamespaceScope::SmalltalkCategory,
        NamespaceScope::SmalltalkPrefix,
        NamespaceScope::CGlib,
        NamespaceScope::Go,
        NamespaceScope::Lua,
        NamespaceScope::St,
        NamespaceScope::Delphi,
        NamespaceScope::Js,
        NamespaceScope::Kotlin,
        NamespaceScope::Jvm,
        NamespaceScope::Swift,
    ];

    pub fn thrift_name(self) -> &'static str {
        match self {
            NamespaceScope::All => "*",
            NamespaceScope::Cpp => "cpp",
            NamespaceScope::Java => "java",
            NamespaceScope::Py => "py",
            NamespaceScope::PyTwisted => "py.twisted",
            NamespaceScope::Perl => "perl",
            NamespaceScope::Rb => "rb",
            NamespaceScope::Cocoa => "cocoa",
            NamespaceScope::Csharp => "csharp",
            NamespaceScope::Php => "php",
            NamespaceScope::SmalltalkCategory => "smalltalk.category",
            NamespaceScope::SmalltalkPrefix => "smalltalk.prefix",
            NamespaceScope::CGlib => "c_glib",
            NamespaceScope::Go => "go",
            NamespaceScope::Lua => "lua",
            NamespaceScope::St => "st",
            NamespaceScope::Delphi => "delphi",
            NamespaceScope::Js => "js",
            NamespaceScope::Kotlin => "kotlin",
            NamespaceScope::Jvm => "jvm",
            NamespaceScope::Swift => "swift",
        }
    }

    pub fn for_thrift_name(name: &str) -> Option<Self> {
        Self::ALL_SCOPES
            .iter()
            .copied()
            .find(|scope| scope.thrift_name() == name)
    }

    /// Scopes that inherit an umbrella `jvm` namespace unless they declare their own.
    pub fn jvm_members() -> &'static [NamespaceScope] {
        &[NamespaceScope::Java, NamespaceScope::Kotlin]
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.thrift_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requiredness {
    Required,
    Optional,
    Default,
}

/// `( key = "value", flag )` attached to a declaration or type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationElement {
    pub location: Location,
    pub values: BTreeMap<String, String>,
}

impl AnnotationElement {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

pub(crate) fn annotation_map(element: &Option<AnnotationElement>) -> BTreeMap<String, String> {
    element
        .as_ref()
        .map(|a| a.values.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeElement {
    pub location: Location,
    pub is_cpp: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceElement {
    pub location: Location,
    pub scope: NamespaceScope,
    pub namespace: String,
    pub annotations: Option<AnnotationElement>,
}

/// Unresolved reference to a type, as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeElement {
    pub location: Location,
    pub annotations: Option<AnnotationElement>,
    pub kind: TypeElementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeElementKind {
    /// A builtin or a (possibly `program.`-qualified) user type name.
    Scalar(String),
    List(Box<TypeElement>),
    Set(Box<TypeElement>),
    Map {
        key: Box<TypeElement>,
        value: Box<TypeElement>,
    },
}

impl TypeElement {
    pub fn scalar(location: Location, name: impl Into<String>) -> Self {
        TypeElement {
            location,
            annotations: None,
            kind: TypeElementKind::Scalar(name.into()),
        }
    }

    /// Source-like spelling: `i32`, `list<Foo>`, `map<string, i64>`.
    pub fn name(&self) -> String {
        match &self.kind {
            TypeElementKind::Scalar(name) => name.clone(),
            TypeElementKind::List(elem) => format!("list<{}>", elem.name()),
            TypeElementKind::Set(elem) => format!("set<{}>", elem.name()),
            TypeElementKind::Map { key, value } => {
                format!("map<{}, {}>", key.name(), value.name())
            }
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(&self.kind, TypeElementKind::Scalar(name) if name == "void")
    }
}

/// A literal value: in a `const` definition or as a field default.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstValueElement {
    pub location: Location,
    /// The literal's original source text.
    pub thrift_text: String,
    pub kind: ConstValueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValueKind {
    Int(i64),
    Double(f64),
    /// A quoted string, escapes already processed.
    Literal(String),
    /// A bare identifier: `true`, a constant name, or `Enum.MEMBER`.
    Identifier(String),
    List(Vec<ConstValueElement>),
    Map(Vec<(ConstValueElement, ConstValueElement)>),
}

impl ConstValueElement {
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.kind {
            ConstValueKind::Identifier(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match &self.kind {
            ConstValueKind::Literal(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValueElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ConstValueKind::Int(_) => "Int",
            ConstValueKind::Double(_) => "Double",
            ConstValueKind::Literal(_) => "Literal",
            ConstValueKind::Identifier(_) => "Identifier",
            ConstValueKind::List(_) => "List",
            ConstValueKind::Map(_) => "Map",
        };
        write!(f, "{}({})", kind, self.thrift_text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub field_id: i32,
    pub requiredness: Requiredness,
    pub field_type: TypeElement,
    pub name: String,
    pub const_value: Option<ConstValueElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMemberElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub name: String,
    pub members: Vec<EnumMemberElement>,
}

/// Which of the three struct-shaped declarations an element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructKind {
    Struct,
    Union,
    Exception,
}

impl StructKind {
    pub fn keyword(self) -> &'static str {
        match self {
            StructKind::Struct => "struct",
            StructKind::Union => "union",
            StructKind::Exception => "exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub name: String,
    pub kind: StructKind,
    pub fields: Vec<FieldElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub old_type: TypeElement,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub type_element: TypeElement,
    pub name: String,
    pub value: ConstValueElement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub one_way: bool,
    pub return_type: TypeElement,
    pub name: String,
    pub params: Vec<FieldElement>,
    pub exceptions: Vec<FieldElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceElement {
    pub uuid: Uuid,
    pub location: Location,
    pub documentation: String,
    pub annotations: Option<AnnotationElement>,
    pub name: String,
    pub extends_service: Option<TypeElement>,
    pub functions: Vec<FunctionElement>,
}

/// Everything declared in one IDL file, in source order per kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ThriftFileElement {
    pub location: Location,
    pub includes: Vec<IncludeElement>,
    pub namespaces: Vec<NamespaceElement>,
    pub typedefs: Vec<TypedefElement>,
    pub enums: Vec<EnumElement>,
    pub structs: Vec<StructElement>,
    pub unions: Vec<StructElement>,
    pub exceptions: Vec<StructElement>,
    pub constants: Vec<ConstElement>,
    pub services: Vec<ServiceElement>,
}

impl ThriftFileElement {
    pub fn empty(location: Location) -> Self {
        ThriftFileElement {
            location,
            includes: Vec::new(),
            namespaces: Vec::new(),
            typedefs: Vec::new(),
            enums: Vec::new(),
            structs: Vec::new(),
            unions: Vec::new(),
            exceptions: Vec::new(),
            constants: Vec::new(),
            services: Vec::new(),
        }
    }
}
