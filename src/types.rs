//! Resolved type model.
//!
//! User-defined types live in arenas owned by a [`crate::schema::Schema`] and
//! are referenced by typed ids, so a [`ThriftType`] is a small value that can
//! be cloned and compared freely. Equality of user types is identity: two
//! declarations with the same name in different files are different types.

use crate::ast::{ConstValueElement, NamespaceScope, Requiredness, StructKind};
use crate::location::Location;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

macro_rules! arena_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) usize);

            impl $name {
                pub fn index(self) -> usize {
                    self.0
                }
            }
        )*
    };
}

arena_id!(ProgramId, EnumId, StructId, TypedefId, ServiceId, ConstantId);

/// Builtin scalar types. `byte` and `i8` keep their spelling but compare equal.
#[derive(Debug, Clone, Copy, Eq)]
pub enum BuiltinType {
    Bool,
    Byte,
    I8,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    Void,
}

impl BuiltinType {
    pub fn for_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => BuiltinType::Bool,
            "byte" => BuiltinType::Byte,
            "i8" => BuiltinType::I8,
            "i16" => BuiltinType::I16,
            "i32" => BuiltinType::I32,
            "i64" => BuiltinType::I64,
            "double" => BuiltinType::Double,
            "string" => BuiltinType::String,
            "binary" => BuiltinType::Binary,
            "void" => BuiltinType::Void,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Bool => "bool",
            BuiltinType::Byte => "byte",
            BuiltinType::I8 => "i8",
            BuiltinType::I16 => "i16",
            BuiltinType::I32 => "i32",
            BuiltinType::I64 => "i64",
            BuiltinType::Double => "double",
            BuiltinType::String => "string",
            BuiltinType::Binary => "binary",
            BuiltinType::Void => "void",
        }
    }

    fn canonical(self) -> Self {
        match self {
            BuiltinType::I8 => BuiltinType::Byte,
            other => other,
        }
    }

    /// Closed range of the integral types; `None` for everything else.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self.canonical() {
            BuiltinType::Byte => Some((i64::from(i8::MIN), i64::from(i8::MAX))),
            BuiltinType::I16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            BuiltinType::I32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            BuiltinType::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl PartialEq for BuiltinType {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(&self.canonical()) == std::mem::discriminant(&other.canonical())
    }
}

impl Hash for BuiltinType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.canonical()).hash(state);
    }
}

/// A fully resolved type reference.
///
/// Annotations written on a type reference (`list<i32> (python.immutable = "")`)
/// are kept in an [`ThriftType::Annotated`] wrapper. They never take part in
/// equality or hashing: `i32 (a = "1")` equals `i32`.
#[derive(Debug, Clone)]
pub enum ThriftType {
    Builtin(BuiltinType),
    List(Box<ThriftType>),
    Set(Box<ThriftType>),
    Map(Box<ThriftType>, Box<ThriftType>),
    Enum(EnumId),
    Struct(StructId),
    Typedef(TypedefId),
    Service(ServiceId),
    /// Never nested; [`ThriftType::with_annotations`] merges into an existing map.
    Annotated(Box<ThriftType>, BTreeMap<String, String>),
}

impl ThriftType {
    pub const VOID: ThriftType = ThriftType::Builtin(BuiltinType::Void);

    /// The type with any annotation wrapper removed.
    pub fn unannotated(&self) -> &ThriftType {
        match self {
            ThriftType::Annotated(inner, _) => inner.unannotated(),
            other => other,
        }
    }

    /// Annotations written on this type reference, if any.
    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ThriftType::Annotated(_, annotations) => Some(annotations),
            _ => None,
        }
    }

    /// Adds `annotations`, overriding existing keys.
    pub fn with_annotations(self, annotations: BTreeMap<String, String>) -> ThriftType {
        if annotations.is_empty() {
            return self;
        }
        match self {
            ThriftType::Annotated(inner, mut existing) => {
                existing.extend(annotations);
                ThriftType::Annotated(inner, existing)
            }
            other => ThriftType::Annotated(Box::new(other), annotations),
        }
    }

    pub fn builtin(&self) -> Option<BuiltinType> {
        match self.unannotated() {
            ThriftType::Builtin(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.unannotated(), ThriftType::Builtin(BuiltinType::Void))
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self.unannotated(),
            ThriftType::List(_) | ThriftType::Set(_) | ThriftType::Map(_, _)
        )
    }
}

impl PartialEq for ThriftType {
    fn eq(&self, other: &Self) -> bool {
        match (self.unannotated(), other.unannotated()) {
            (ThriftType::Builtin(a), ThriftType::Builtin(b)) => a == b,
            (ThriftType::List(a), ThriftType::List(b)) => a == b,
            (ThriftType::Set(a), ThriftType::Set(b)) => a == b,
            (ThriftType::Map(ak, av), ThriftType::Map(bk, bv)) => ak == bk && av == bv,
            (ThriftType::Enum(a), ThriftType::Enum(b)) => a == b,
            (ThriftType::Struct(a), ThriftType::Struct(b)) => a == b,
            (ThriftType::Typedef(a), ThriftType::Typedef(b)) => a == b,
            (ThriftType::Service(a), ThriftType::Service(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ThriftType {}

impl Hash for ThriftType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let ty = self.unannotated();
        std::mem::discriminant(ty).hash(state);
        match ty {
            ThriftType::Builtin(b) => b.hash(state),
            ThriftType::List(elem) | ThriftType::Set(elem) => elem.hash(state),
            ThriftType::Map(key, value) => {
                key.hash(state);
                value.hash(state);
            }
            ThriftType::Enum(id) => id.hash(state),
            ThriftType::Struct(id) => id.hash(state),
            ThriftType::Typedef(id) => id.hash(state),
            ThriftType::Service(id) => id.hash(state),
            ThriftType::Annotated(..) => {}
        }
    }
}

/// Reference to any user-defined type, as stored in a program's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserTypeId {
    Enum(EnumId),
    Struct(StructId),
    Typedef(TypedefId),
    Service(ServiceId),
}

impl UserTypeId {
    pub fn to_type(self) -> ThriftType {
        match self {
            UserTypeId::Enum(id) => ThriftType::Enum(id),
            UserTypeId::Struct(id) => ThriftType::Struct(id),
            UserTypeId::Typedef(id) => ThriftType::Typedef(id),
            UserTypeId::Service(id) => ThriftType::Service(id),
        }
    }
}

/// Identity and metadata shared by every named declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMeta {
    pub uuid: Uuid,
    pub name: String,
    pub location: Location,
    pub documentation: String,
    pub annotations: BTreeMap<String, String>,
    /// Namespaces of the declaring program.
    pub namespaces: BTreeMap<NamespaceScope, String>,
    pub program: ProgramId,
}

impl UserMeta {
    /// Namespace for `scope`, falling back to the `*` scope.
    pub fn namespace_for(&self, scope: NamespaceScope) -> Option<&str> {
        self.namespaces
            .get(&scope)
            .or_else(|| self.namespaces.get(&NamespaceScope::All))
            .map(String::as_str)
    }

    pub fn is_deprecated(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "deprecated")
    }
}

/// `thrifty.<flag>` or `<flag>` annotation, or `@<flag>` in the docs.
fn has_flag(annotations: &BTreeMap<String, String>, documentation: &str, flag: &str) -> bool {
    annotations.contains_key(flag)
        || annotations.contains_key(&format!("thrifty.{}", flag))
        || documentation.contains(&format!("@{}", flag))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub uuid: Uuid,
    pub name: String,
    pub value: i32,
    pub location: Location,
    pub documentation: String,
    pub annotations: BTreeMap<String, String>,
}

impl EnumMember {
    pub fn is_deprecated(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "deprecated")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub meta: UserMeta,
    pub members: Vec<EnumMember>,
}

impl EnumType {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn find_by_value(&self, value: i32) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.value == value)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A struct, union or exception field, or a method parameter/exception.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub uuid: Uuid,
    pub id: i32,
    pub name: String,
    pub requiredness: Requiredness,
    pub field_type: ThriftType,
    pub default_value: Option<ConstValueElement>,
    pub location: Location,
    pub documentation: String,
    pub annotations: BTreeMap<String, String>,
}

impl Field {
    pub fn is_required(&self) -> bool {
        self.requiredness == Requiredness::Required
    }

    pub fn is_optional(&self) -> bool {
        self.requiredness == Requiredness::Optional
    }

    /// Value must not appear in `Debug`-style string renderings.
    pub fn is_redacted(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "redacted")
    }

    /// Value is replaced by a hash in string renderings.
    pub fn is_obfuscated(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "obfuscated")
    }

    pub fn is_deprecated(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "deprecated")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub meta: UserMeta,
    pub kind: StructKind,
    pub fields: Vec<Field>,
}

impl StructType {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_union(&self) -> bool {
        self.kind == StructKind::Union
    }

    pub fn is_exception(&self) -> bool {
        self.kind == StructKind::Exception
    }

    pub fn field(&self, id: i32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefType {
    pub meta: UserMeta,
    pub old_type: ThriftType,
}

impl TypedefType {
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMethod {
    pub uuid: Uuid,
    pub name: String,
    pub one_way: bool,
    pub return_type: ThriftType,
    pub params: Vec<Field>,
    pub exceptions: Vec<Field>,
    pub location: Location,
    pub documentation: String,
    pub annotations: BTreeMap<String, String>,
}

impl ServiceMethod {
    pub fn is_deprecated(&self) -> bool {
        has_flag(&self.annotations, &self.documentation, "deprecated")
    }

    /// The implicit struct carrying this method's parameters.
    pub fn args_struct(&self, meta: &UserMeta) -> StructType {
        StructType {
            meta: self.derived_meta(meta, "_Args", b"args"),
            kind: StructKind::Struct,
            fields: self.params.clone(),
        }
    }

    /// The implicit union carrying either the return value (field 0,
    /// `success`) or one of the declared exceptions.
    pub fn result_struct(&self, meta: &UserMeta) -> StructType {
        let mut fields = Vec::with_capacity(self.exceptions.len() + 1);
        if !self.return_type.is_void() {
            fields.push(Field {
                uuid: Uuid::new_v5(&self.uuid, b"success"),
                id: 0,
                name: "success".to_string(),
                requiredness: Requiredness::Optional,
                field_type: self.return_type.clone(),
                default_value: None,
                location: self.location.clone(),
                documentation: String::new(),
                annotations: BTreeMap::new(),
            });
        }
        fields.extend(self.exceptions.iter().cloned().map(|mut f| {
            f.requiredness = Requiredness::Optional;
            f
        }));
        StructType {
            meta: self.derived_meta(meta, "_Result", b"result"),
            kind: StructKind::Union,
            fields,
        }
    }

    fn derived_meta(&self, service: &UserMeta, suffix: &str, salt: &[u8]) -> UserMeta {
        UserMeta {
            uuid: Uuid::new_v5(&self.uuid, salt),
            name: pascal_case(&format!("{}{}", self.name, suffix)),
            location: self.location.clone(),
            documentation: String::new(),
            annotations: BTreeMap::new(),
            namespaces: service.namespaces.clone(),
            program: service.program,
        }
    }
}

/// `get_user_Args` -> `GetUserArgs`.
pub fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceType {
    pub meta: UserMeta,
    /// The `extends` clause, resolved. Validation checks it names a service.
    pub extends: Option<ThriftType>,
    pub methods: Vec<ServiceMethod>,
}

impl ServiceType {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn base_service(&self) -> Option<ServiceId> {
        match self.extends.as_ref().map(ThriftType::unannotated) {
            Some(ThriftType::Service(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn method(&self, name: &str) -> Option<&ServiceMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub meta: UserMeta,
    pub const_type: ThriftType,
    pub value: ConstValueElement,
    /// Named constants the value refers to, in first-use order.
    pub referenced_constants: Vec<ConstantId>,
}

impl Constant {
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn byte_and_i8_are_the_same_type() {
        let byte = ThriftType::Builtin(BuiltinType::Byte);
        let i8_ = ThriftType::Builtin(BuiltinType::I8);
        assert_eq!(byte, i8_);
        let set: HashSet<_> = [byte.clone(), i8_].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(BuiltinType::I8.name(), "i8");
        assert_ne!(byte, ThriftType::Builtin(BuiltinType::I16));
    }

    #[test]
    fn containers_compare_structurally() {
        let a = ThriftType::List(Box::new(ThriftType::Builtin(BuiltinType::I8)));
        let b = ThriftType::List(Box::new(ThriftType::Builtin(BuiltinType::Byte)));
        assert_eq!(a, b);
        assert_ne!(a, ThriftType::Set(Box::new(ThriftType::Builtin(BuiltinType::Byte))));
        assert_ne!(ThriftType::Struct(StructId(0)), ThriftType::Struct(StructId(1)));
    }

    fn annotated(ty: ThriftType, key: &str, value: &str) -> ThriftType {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.to_string(), value.to_string());
        ty.with_annotations(annotations)
    }

    #[test]
    fn annotations_do_not_affect_equality() {
        let i32_ = ThriftType::Builtin(BuiltinType::I32);
        let one = annotated(i32_.clone(), "test", "one");
        let two = annotated(i32_.clone(), "test", "two");
        assert_eq!(one, two);
        assert_eq!(one, i32_);

        let byte = annotated(ThriftType::Builtin(BuiltinType::Byte), "a", "b");
        assert_eq!(byte, ThriftType::Builtin(BuiltinType::I8));
        let set: HashSet<_> = [byte, ThriftType::Builtin(BuiltinType::I8)].into_iter().collect();
        assert_eq!(set.len(), 1);

        let list = ThriftType::List(Box::new(two));
        assert_eq!(list, ThriftType::List(Box::new(i32_)));
    }

    #[test]
    fn with_annotations_merges() {
        let ty = annotated(ThriftType::Builtin(BuiltinType::I32), "i32", "bar");
        let ty = annotated(ty, "baz", "quux");
        let annotations = ty.annotations().expect("annotations");
        assert_eq!(annotations["i32"], "bar");
        assert_eq!(annotations["baz"], "quux");
        assert!(matches!(ty.unannotated(), ThriftType::Builtin(BuiltinType::I32)));
        assert!(ThriftType::VOID.with_annotations(BTreeMap::new()).annotations().is_none());
    }

    #[test]
    fn integer_ranges() {
        assert_eq!(BuiltinType::I8.integer_range(), Some((-128, 127)));
        assert_eq!(BuiltinType::I16.integer_range(), Some((-32768, 32767)));
        assert_eq!(BuiltinType::Double.integer_range(), None);
    }

    #[test]
    fn pascal_case_names() {
        assert_eq!(pascal_case("get_user_Args"), "GetUserArgs");
        assert_eq!(pascal_case("ping_Result"), "PingResult");
    }

    fn meta(name: &str) -> UserMeta {
        UserMeta {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            location: Location::get("", "t.thrift"),
            documentation: String::new(),
            annotations: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            program: ProgramId(0),
        }
    }

    #[test]
    fn namespace_falls_back_to_star() {
        let mut m = meta("T");
        m.namespaces.insert(NamespaceScope::All, "fallback".to_string());
        m.namespaces.insert(NamespaceScope::Java, "com.java".to_string());
        assert_eq!(m.namespace_for(NamespaceScope::Java), Some("com.java"));
        assert_eq!(m.namespace_for(NamespaceScope::Py), Some("fallback"));
    }

    #[test]
    fn derived_method_structs_are_stable() {
        let field = |id: i32, name: &str| Field {
            uuid: Uuid::new_v4(),
            id,
            name: name.to_string(),
            requiredness: Requiredness::Required,
            field_type: ThriftType::Builtin(BuiltinType::I32),
            default_value: None,
            location: Location::get("", "t.thrift"),
            documentation: String::new(),
            annotations: BTreeMap::new(),
        };
        let method = ServiceMethod {
            uuid: Uuid::new_v4(),
            name: "add".to_string(),
            one_way: false,
            return_type: ThriftType::Builtin(BuiltinType::I64),
            params: vec![field(1, "a"), field(2, "b")],
            exceptions: vec![field(1, "oops")],
            location: Location::get("", "t.thrift"),
            documentation: String::new(),
            annotations: BTreeMap::new(),
        };
        let svc = meta("Calc");
        let args = method.args_struct(&svc);
        assert_eq!(args.name(), "AddArgs");
        assert_eq!(args.fields.len(), 2);
        let result = method.result_struct(&svc);
        assert_eq!(result.name(), "AddResult");
        assert!(result.is_union());
        assert_eq!(result.fields[0].id, 0);
        assert_eq!(result.fields[0].name, "success");
        assert_eq!(result.fields[1].requiredness, Requiredness::Optional);
        assert_eq!(method.result_struct(&svc), result);
        assert_ne!(args.meta.uuid, result.meta.uuid);
    }

    #[test]
    fn flags_from_annotations_and_docs() {
        let mut m = meta("T");
        assert!(!m.is_deprecated());
        m.documentation = "Old.\n@deprecated\n".to_string();
        assert!(m.is_deprecated());
        let mut m = meta("U");
        m.annotations.insert("thrifty.deprecated".to_string(), "true".to_string());
        assert!(m.is_deprecated());
    }
}
