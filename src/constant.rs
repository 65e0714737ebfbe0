//! Typed validation of constant literals, and the walk that finds which named
//! constants a literal refers to.
//!
//! Validators dispatch on the expected type with typedefs stripped. An
//! identifier literal is first looked up as a named constant; for enum-typed
//! positions it may otherwise be a qualified member, `Enum.MEMBER` or
//! `program.Enum.MEMBER`. Bare member names are never accepted.

use crate::ast::{ConstValueElement, ConstValueKind};
use crate::location::Location;
use crate::schema::Schema;
use crate::types::*;
use std::collections::HashSet;

/// Check `value` against `expected`, resolving identifiers from `program`.
///
/// Every bad element of a container or struct literal is reported, each at
/// its own location.
pub(crate) fn validate_value(
    schema: &Schema,
    program: ProgramId,
    expected: &ThriftType,
    value: &ConstValueElement,
) -> Result<(), Vec<(Location, String)>> {
    let ctx = Ctx { schema, program };
    let mut problems = Vec::new();
    ctx.validate(expected, value, &mut problems);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Named constants referenced anywhere inside `value`, in first-use order.
pub(crate) fn referenced_constants(
    schema: &Schema,
    program: ProgramId,
    expected: &ThriftType,
    value: &ConstValueElement,
) -> Vec<ConstantId> {
    let ctx = Ctx { schema, program };
    let mut out = Vec::new();
    ctx.collect_references(Some(expected), value, &mut out);
    out
}

#[derive(Clone, Copy)]
struct Ctx<'a> {
    schema: &'a Schema,
    program: ProgramId,
}

impl<'a> Ctx<'a> {
    fn validate(
        &self,
        expected: &ThriftType,
        value: &ConstValueElement,
        problems: &mut Vec<(Location, String)>,
    ) {
        if let Err(message) = self.validate_one(expected, value, problems) {
            problems.push((value.location.clone(), message));
        }
    }

    /// Errors about `value` itself come back as `Err`; nested elements report
    /// into `problems`.
    fn validate_one(
        &self,
        expected: &ThriftType,
        value: &ConstValueElement,
        problems: &mut Vec<(Location, String)>,
    ) -> Result<(), String> {
        match self.schema.true_type(expected) {
            ThriftType::Builtin(builtin) => match builtin {
                BuiltinType::Bool => self.validate_bool(expected, value),
                BuiltinType::Byte
                | BuiltinType::I8
                | BuiltinType::I16
                | BuiltinType::I32
                | BuiltinType::I64 => self.validate_integer(expected, *builtin, value),
                BuiltinType::Double => self.validate_double(expected, value),
                BuiltinType::String => self.validate_string(expected, value),
                BuiltinType::Binary => Err("binary constants are not supported".to_string()),
                BuiltinType::Void => Err("void is not a valid constant type".to_string()),
            },
            ThriftType::Enum(id) => self.validate_enum(expected, *id, value),
            ThriftType::List(elem) | ThriftType::Set(elem) => {
                self.validate_collection(expected, elem, value, problems)
            }
            ThriftType::Map(key, val) => self.validate_map(expected, key, val, value, problems),
            ThriftType::Struct(id) => self.validate_struct(expected, *id, value, problems),
            ThriftType::Service(id) => Err(format!(
                "Service '{}' is not a valid constant type",
                self.schema.service(*id).name()
            )),
            ThriftType::Typedef(id) => Err(format!(
                "Typedef '{}' does not resolve to a concrete type",
                self.schema.typedef(*id).name()
            )),
            ThriftType::Annotated(inner, _) => self.validate_one(inner, value, problems),
        }
    }

    fn type_name(&self, ty: &ThriftType) -> String {
        self.schema.type_name(ty)
    }

    fn named_constant(&self, value: &ConstValueElement) -> Option<&'a Constant> {
        let name = value.as_identifier()?;
        let id = self.schema.lookup_constant(self.program, name)?;
        Some(self.schema.constant(id))
    }

    fn has_type(&self, constant: &Constant, expected: &ThriftType) -> bool {
        self.schema.true_type(&constant.const_type) == self.schema.true_type(expected)
    }

    /// Accept an identifier naming a constant of the expected type.
    fn validate_reference(
        &self,
        expected: &ThriftType,
        value: &ConstValueElement,
    ) -> Result<(), String> {
        match self.named_constant(value) {
            Some(c) if self.has_type(c, expected) => Ok(()),
            Some(c) => Err(format!(
                "Expected a value of type {}, but constant '{}' has type {}",
                self.type_name(expected),
                c.name(),
                self.type_name(&c.const_type)
            )),
            None => Err(format!(
                "Expected a value of type {}, but got {}",
                self.type_name(expected),
                value
            )),
        }
    }

    fn validate_bool(&self, expected: &ThriftType, value: &ConstValueElement) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::Int(0) | ConstValueKind::Int(1) => Ok(()),
            ConstValueKind::Identifier(id) if id == "true" || id == "false" => Ok(()),
            ConstValueKind::Identifier(_) => self
                .validate_reference(expected, value)
                .map_err(|_| bool_error(value)),
            _ => Err(bool_error(value)),
        }
    }

    fn validate_integer(
        &self,
        expected: &ThriftType,
        builtin: BuiltinType,
        value: &ConstValueElement,
    ) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::Int(n) => {
                let (min, max) = builtin.integer_range().unwrap_or((i64::MIN, i64::MAX));
                if *n < min || *n > max {
                    return Err(format!(
                        "value '{}' is out of range for type {}",
                        n,
                        builtin.name()
                    ));
                }
                Ok(())
            }
            ConstValueKind::Identifier(_) => self.validate_reference(expected, value),
            _ => Err(format!(
                "Expected a value of type {}, but got {}",
                builtin.name(),
                value
            )),
        }
    }

    fn validate_double(&self, expected: &ThriftType, value: &ConstValueElement) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::Int(_) | ConstValueKind::Double(_) => Ok(()),
            ConstValueKind::Identifier(_) => self.validate_reference(expected, value),
            _ => Err(format!("Expected a value of type double, but got {}", value)),
        }
    }

    fn validate_string(&self, expected: &ThriftType, value: &ConstValueElement) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::Literal(_) => Ok(()),
            ConstValueKind::Identifier(_) => self.validate_reference(expected, value),
            _ => Err(format!("Expected a string literal, got {}", value)),
        }
    }

    fn validate_enum(
        &self,
        expected: &ThriftType,
        id: EnumId,
        value: &ConstValueElement,
    ) -> Result<(), String> {
        let enum_type = self.schema.enum_type(id);
        match &value.kind {
            ConstValueKind::Int(n) => {
                let member = i32::try_from(*n).ok().and_then(|v| enum_type.find_by_value(v));
                match member {
                    Some(_) => Ok(()),
                    None => Err(format!(
                        "'{}' is not a valid value for enum {}",
                        n,
                        enum_type.name()
                    )),
                }
            }
            ConstValueKind::Identifier(name) => {
                if let Some(c) = self.named_constant(value) {
                    if self.has_type(c, expected) {
                        return Ok(());
                    }
                }
                let Some((prefix, member)) = name.rsplit_once('.') else {
                    return Err(format!(
                        "Unqualified name '{}' is not a valid enum constant value",
                        name
                    ));
                };
                let named_enum = self
                    .schema
                    .lookup_symbol(self.program, prefix)
                    .map(|t| self.schema.true_type(&t.to_type()).clone());
                if named_enum != Some(ThriftType::Enum(id)) {
                    return Err(format!(
                        "'{}' is not a member of enum {}",
                        name,
                        enum_type.name()
                    ));
                }
                match enum_type.find_by_name(member) {
                    Some(_) => Ok(()),
                    None => Err(format!(
                        "'{}' is not a member of enum {}",
                        member,
                        enum_type.name()
                    )),
                }
            }
            _ => Err(format!(
                "Expected an enum member or ordinal of {}, but got {}",
                enum_type.name(),
                value
            )),
        }
    }

    fn validate_collection(
        &self,
        expected: &ThriftType,
        elem: &ThriftType,
        value: &ConstValueElement,
        problems: &mut Vec<(Location, String)>,
    ) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::List(items) => {
                for item in items {
                    self.validate(elem, item, problems);
                }
                Ok(())
            }
            ConstValueKind::Identifier(_) => self.validate_reference(expected, value),
            _ => Err(format!(
                "Expected a list literal for {}, but got {}",
                self.type_name(expected),
                value
            )),
        }
    }

    fn validate_map(
        &self,
        expected: &ThriftType,
        key: &ThriftType,
        val: &ThriftType,
        value: &ConstValueElement,
        problems: &mut Vec<(Location, String)>,
    ) -> Result<(), String> {
        match &value.kind {
            ConstValueKind::Map(entries) => {
                for (k, v) in entries {
                    self.validate(key, k, problems);
                    self.validate(val, v, problems);
                }
                Ok(())
            }
            ConstValueKind::Identifier(_) => self.validate_reference(expected, value),
            _ => Err(format!(
                "Expected a map literal for {}, but got {}",
                self.type_name(expected),
                value
            )),
        }
    }

    fn validate_struct(
        &self,
        expected: &ThriftType,
        id: StructId,
        value: &ConstValueElement,
        problems: &mut Vec<(Location, String)>,
    ) -> Result<(), String> {
        let struct_type = self.schema.struct_type(id);
        let entries = match &value.kind {
            ConstValueKind::Map(entries) => entries,
            ConstValueKind::Identifier(_) => return self.validate_reference(expected, value),
            _ => {
                return Err(format!(
                    "Expected a map literal for {} '{}', but got {}",
                    struct_type.kind.keyword(),
                    struct_type.name(),
                    value
                ))
            }
        };
        let mut provided = HashSet::new();
        for (k, v) in entries {
            let Some(field_name) = k.as_literal() else {
                problems.push((
                    k.location.clone(),
                    format!(
                        "{} '{}' constant keys must be string literals, got {}",
                        struct_type.kind.keyword(),
                        struct_type.name(),
                        k
                    ),
                ));
                continue;
            };
            let Some(field) = struct_type.field_named(field_name) else {
                problems.push((
                    k.location.clone(),
                    format!(
                        "{} '{}' has no field named '{}'",
                        struct_type.kind.keyword(),
                        struct_type.name(),
                        field_name
                    ),
                ));
                continue;
            };
            self.validate(&field.field_type, v, problems);
            provided.insert(field_name);
        }
        if struct_type.is_union() && provided.len() != 1 {
            return Err(format!(
                "union '{}' constant must set exactly one field",
                struct_type.name()
            ));
        }
        for field in &struct_type.fields {
            if field.is_required()
                && field.default_value.is_none()
                && !provided.contains(field.name.as_str())
            {
                problems.push((
                    value.location.clone(),
                    format!(
                        "Missing value for required field '{}' of {} '{}'",
                        field.name,
                        struct_type.kind.keyword(),
                        struct_type.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn collect_references(
        &self,
        expected: Option<&ThriftType>,
        value: &ConstValueElement,
        out: &mut Vec<ConstantId>,
    ) {
        let true_type = expected.map(|t| self.schema.true_type(t));
        match &value.kind {
            ConstValueKind::Identifier(name) => {
                if let Some(id) = self.schema.lookup_constant(self.program, name) {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
            ConstValueKind::List(items) => {
                let elem = match true_type {
                    Some(ThriftType::List(e)) | Some(ThriftType::Set(e)) => Some(e.as_ref()),
                    _ => None,
                };
                for item in items {
                    self.collect_references(elem, item, out);
                }
            }
            ConstValueKind::Map(entries) => {
                for (k, v) in entries {
                    let (key_type, value_type) = match true_type {
                        Some(ThriftType::Map(kt, vt)) => (Some(kt.as_ref()), Some(vt.as_ref())),
                        Some(ThriftType::Struct(id)) => {
                            let field = k
                                .as_literal()
                                .and_then(|n| self.schema.struct_type(*id).field_named(n));
                            (None, field.map(|f| &f.field_type))
                        }
                        _ => (None, None),
                    };
                    self.collect_references(key_type, k, out);
                    self.collect_references(value_type, v, out);
                }
            }
            ConstValueKind::Int(_) | ConstValueKind::Double(_) | ConstValueKind::Literal(_) => {}
        }
    }
}

fn bool_error(value: &ConstValueElement) -> String {
    format!(
        "Expected 'true', 'false', '1', '0', or a bool constant; got: {}",
        value
    )
}

#[cfg(test)]
mod tests {
    use crate::loader::{Loader, MemoryFileSystem};

    fn load(src: &str) -> Result<crate::schema::Schema, crate::error::LoadError> {
        let fs = MemoryFileSystem::new().with_file("/idl/c.thrift", src);
        Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/c.thrift")
            .load()
    }

    fn load_err(src: &str) -> String {
        match load(src) {
            Ok(_) => panic!("expected failure for {}", src),
            Err(e) => e.to_string(),
        }
    }

    const COLOR: &str = "enum Color { RED = 0, GREEN = 1 }\n";

    #[test]
    fn enum_qualified_member_and_ordinal() {
        load(&format!("{}const Color C = Color.RED\nconst Color D = 1\n", COLOR)).expect("load");
        load(&format!("{}const Color C = c.Color.GREEN\n", COLOR)).expect("qualified by program");
    }

    #[test]
    fn enum_out_of_range_ordinal_rejected() {
        let err = load_err(&format!("{}const Color C = 2\n", COLOR));
        assert!(err.contains("'2' is not a valid value for enum Color"), "{}", err);
    }

    #[test]
    fn enum_bare_member_rejected() {
        let err = load_err(&format!("{}const Color C = RED\n", COLOR));
        assert!(err.contains("not a valid enum constant value"), "{}", err);
    }

    #[test]
    fn enum_named_constant_wins_over_member_lookup() {
        load(&format!(
            "{}const Color RED_ALIAS = Color.RED\nconst Color C = RED_ALIAS\n",
            COLOR
        ))
        .expect("load");
    }

    #[test]
    fn enum_unknown_member_rejected() {
        let err = load_err(&format!("{}const Color C = Color.BLUE\n", COLOR));
        assert!(err.contains("'BLUE' is not a member of enum Color"), "{}", err);
    }

    #[test]
    fn integer_ranges_enforced() {
        load("const byte B = 127\nconst i16 S = -32768\n").expect("in range");
        let err = load_err("const byte B = 128\n");
        assert!(err.contains("value '128' is out of range for type byte"), "{}", err);
        let err = load_err("const i8 B = -129\n");
        assert!(err.contains("out of range for type i8"), "{}", err);
    }

    #[test]
    fn bool_literals() {
        load("const bool A = true\nconst bool B = 0\nconst bool C = A\n").expect("load");
        let err = load_err("const bool A = 2\n");
        assert!(err.contains("Expected 'true', 'false', '1', '0'"), "{}", err);
    }

    #[test]
    fn references_must_match_type() {
        let err = load_err("const string S = \"s\"\nconst i32 I = S\n");
        assert!(err.contains("constant 'S' has type string"), "{}", err);
    }

    #[test]
    fn double_accepts_integers() {
        load("const double D = 3\nconst double E = 2.5\n").expect("load");
    }

    #[test]
    fn collections_validate_every_element() {
        load("const list<i32> L = [1, 2]\nconst map<string, list<i16>> M = {\"a\": [1]}\n")
            .expect("load");
        let err = load_err("const list<i32> L = [1, \"two\"]\n");
        assert!(err.contains("Expected a value of type i32"), "{}", err);
        let err = load_err("const map<string, byte> M = {\"a\": 300}\n");
        assert!(err.contains("out of range for type byte"), "{}", err);
    }

    fn messages(src: &str) -> Vec<(i32, String)> {
        load(src)
            .expect_err("invalid constant")
            .reports()
            .iter()
            .map(|r| (r.location.line, r.message.clone()))
            .collect()
    }

    #[test]
    fn each_bad_element_is_reported_separately() {
        let found = messages("const list<byte> L = [\n  300,\n  1,\n  400\n]\n");
        assert_eq!(
            found,
            vec![
                (2, "value '300' is out of range for type byte".to_string()),
                (4, "value '400' is out of range for type byte".to_string()),
            ]
        );

        let found = messages("const map<string, i16> M = {\"a\": 70000, \"b\": 80000}\n");
        assert_eq!(found.len(), 2, "{:?}", found);

        let found = messages(
            "struct P { 1: required i32 x; 2: i32 y }\nconst P BAD = {\"y\": \"no\", \"z\": 1}\n",
        );
        let texts: Vec<&str> = found.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(texts.len(), 3, "{:?}", texts);
        assert!(texts[0].starts_with("Expected a value of type i32"), "{:?}", texts);
        assert_eq!(texts[1], "struct 'P' has no field named 'z'");
        assert_eq!(texts[2], "Missing value for required field 'x' of struct 'P'");
    }

    #[test]
    fn struct_literals() {
        let idl = "struct P { 1: required i32 x; 2: optional string y; 3: required i32 z = 0 }\n";
        load(&format!("{}const P OK = {{\"x\": 1}}\n", idl)).expect("load");
        let err = load_err(&format!("{}const P BAD = {{\"y\": \"a\"}}\n", idl));
        assert!(err.contains("Missing value for required field 'x'"), "{}", err);
        let err = load_err(&format!("{}const P BAD = {{\"x\": 1, \"w\": 2}}\n", idl));
        assert!(err.contains("has no field named 'w'"), "{}", err);
    }

    #[test]
    fn typedefs_are_validated_through() {
        load("typedef i32 Id\ntypedef list<Id> Ids\nconst Ids L = [1, 2]\n").expect("load");
        let err = load_err("typedef byte Small\nconst Small S = 1000\n");
        assert!(err.contains("out of range for type byte"), "{}", err);
    }

    #[test]
    fn references_are_collected_through_containers() {
        let schema = load(
            "const i32 A = 1\nconst i32 B = 2\nstruct S { 1: list<i32> xs }\nconst S V = {\"xs\": [A, B, A]}\n",
        )
        .expect("load");
        let v = schema.find_constant("V").expect("V");
        let names: Vec<_> = schema
            .constant(v)
            .referenced_constants
            .iter()
            .map(|id| schema.constant(*id).name().to_string())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
