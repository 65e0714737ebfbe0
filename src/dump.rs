//! Render a loaded schema back to IDL text (for `thrift_check --dump`).
//!
//! Types from other programs are written qualified (`common.Id`) so that the
//! output of each program parses again alongside its includes.

use crate::ast::{ConstValueElement, ConstValueKind, Requiredness};
use crate::schema::Schema;
use crate::types::*;
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Every program of `schema`, in load order, separated by a `// file` header.
pub fn render_schema(schema: &Schema) -> String {
    SchemaIdl(schema).to_string()
}

/// One program: includes, namespaces, typedefs, enums, constants (in
/// dependency order), structs, unions, exceptions, services.
pub fn render_program(schema: &Schema, id: ProgramId) -> String {
    ProgramIdl { schema, id }.to_string()
}

struct SchemaIdl<'a>(&'a Schema);

impl fmt::Display for SchemaIdl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for program in self.0.programs() {
            writeln!(f, "// {}", program.location().path)?;
            writeln!(f, "{}", ProgramIdl { schema: self.0, id: program.id() })?;
        }
        Ok(())
    }
}

struct ProgramIdl<'a> {
    schema: &'a Schema,
    id: ProgramId,
}

impl fmt::Display for ProgramIdl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (schema, id) = (self.schema, self.id);
        let program = schema.program(id);

        let header = &program.element();
        for include in &header.includes {
            let keyword = if include.is_cpp { "cpp_include" } else { "include" };
            writeln!(f, "{} {}", keyword, quote(&include.path))?;
        }
        for ns in &header.namespaces {
            writeln!(f, "namespace {} {}", ns.scope.thrift_name(), ns.namespace)?;
        }
        if !header.includes.is_empty() || !header.namespaces.is_empty() {
            f.write_char('\n')?;
        }

        for t in program.typedefs().iter().map(|t| schema.typedef(*t)) {
            doc(f, &t.meta.documentation, "")?;
            writeln!(
                f,
                "typedef {} {}{}\n",
                type_ref(schema, id, &t.old_type),
                t.meta.name,
                annotations(&t.meta.annotations)
            )?;
        }

        for e in program.enums().iter().map(|e| schema.enum_type(*e)) {
            doc(f, &e.meta.documentation, "")?;
            writeln!(f, "enum {} {{", e.meta.name)?;
            for member in &e.members {
                doc(f, &member.documentation, "  ")?;
                writeln!(
                    f,
                    "  {} = {}{},",
                    member.name,
                    member.value,
                    annotations(&member.annotations)
                )?;
            }
            writeln!(f, "}}{}\n", annotations(&e.meta.annotations))?;
        }

        for c in schema.constants().filter(|c| c.meta.program == id) {
            doc(f, &c.meta.documentation, "")?;
            writeln!(
                f,
                "const {} {} = {}\n",
                type_ref(schema, id, &c.const_type),
                c.meta.name,
                render_const_value(&c.value)
            )?;
        }

        let structs = program
            .structs()
            .iter()
            .chain(program.unions())
            .chain(program.exceptions());
        for s in structs.map(|s| schema.struct_type(*s)) {
            doc(f, &s.meta.documentation, "")?;
            writeln!(f, "{} {} {{", s.kind.keyword(), s.meta.name)?;
            for field in &s.fields {
                doc(f, &field.documentation, "  ")?;
                writeln!(f, "  {},", render_field(schema, id, field))?;
            }
            writeln!(f, "}}{}\n", annotations(&s.meta.annotations))?;
        }

        for s in program.services().iter().map(|s| schema.service(*s)) {
            doc(f, &s.meta.documentation, "")?;
            write!(f, "service {}", s.meta.name)?;
            if let Some(base) = &s.extends {
                write!(f, " extends {}", type_ref(schema, id, base))?;
            }
            f.write_str(" {\n")?;
            for method in &s.methods {
                doc(f, &method.documentation, "  ")?;
                f.write_str("  ")?;
                if method.one_way {
                    f.write_str("oneway ")?;
                }
                let params: Vec<String> = method
                    .params
                    .iter()
                    .map(|p| render_field(schema, id, p))
                    .collect();
                write!(
                    f,
                    "{} {}({})",
                    type_ref(schema, id, &method.return_type),
                    method.name,
                    params.join(", ")
                )?;
                if !method.exceptions.is_empty() {
                    let throws: Vec<String> = method
                        .exceptions
                        .iter()
                        .map(|e| render_field(schema, id, e))
                        .collect();
                    write!(f, " throws ({})", throws.join(", "))?;
                }
                writeln!(f, "{}", annotations(&method.annotations))?;
            }
            writeln!(f, "}}{}\n", annotations(&s.meta.annotations))?;
        }
        Ok(())
    }
}

/// IDL literal text for a constant value.
pub fn render_const_value(value: &ConstValueElement) -> String {
    match &value.kind {
        ConstValueKind::Int(i) => i.to_string(),
        ConstValueKind::Double(_) => value.thrift_text.clone(),
        ConstValueKind::Literal(s) => quote(s),
        ConstValueKind::Identifier(name) => name.clone(),
        ConstValueKind::List(items) => {
            let items: Vec<String> = items.iter().map(render_const_value).collect();
            format!("[{}]", items.join(", "))
        }
        ConstValueKind::Map(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", render_const_value(k), render_const_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

fn render_field(schema: &Schema, from: ProgramId, field: &Field) -> String {
    let requiredness = match field.requiredness {
        Requiredness::Required => "required ",
        Requiredness::Optional => "optional ",
        Requiredness::Default => "",
    };
    let default = field
        .default_value
        .as_ref()
        .map(|d| format!(" = {}", render_const_value(d)))
        .unwrap_or_default();
    format!(
        "{}: {}{} {}{}{}",
        field.id,
        requiredness,
        type_ref(schema, from, &field.field_type),
        field.name,
        default,
        annotations(&field.annotations)
    )
}

/// Like [`Schema::type_name`], qualifying user types declared in another
/// program and keeping type annotations.
fn type_ref(schema: &Schema, from: ProgramId, ty: &ThriftType) -> String {
    let user = |meta: &UserMeta| {
        if meta.program == from {
            meta.name.clone()
        } else {
            format!("{}.{}", schema.program(meta.program).name(), meta.name)
        }
    };
    match ty {
        ThriftType::Builtin(b) => b.name().to_string(),
        ThriftType::List(elem) => format!("list<{}>", type_ref(schema, from, elem)),
        ThriftType::Set(elem) => format!("set<{}>", type_ref(schema, from, elem)),
        ThriftType::Map(key, value) => format!(
            "map<{}, {}>",
            type_ref(schema, from, key),
            type_ref(schema, from, value)
        ),
        ThriftType::Enum(id) => user(&schema.enum_type(*id).meta),
        ThriftType::Struct(id) => user(&schema.struct_type(*id).meta),
        ThriftType::Typedef(id) => user(&schema.typedef(*id).meta),
        ThriftType::Service(id) => user(&schema.service(*id).meta),
        ThriftType::Annotated(inner, values) => {
            format!("{}{}", type_ref(schema, from, inner), annotations(values))
        }
    }
}

fn annotations(values: &BTreeMap<String, String>) -> String {
    if values.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = values
        .iter()
        .map(|(k, v)| format!("{} = {}", k, quote(v)))
        .collect();
    format!(" ({})", pairs.join(", "))
}

fn doc(f: &mut fmt::Formatter<'_>, documentation: &str, indent: &str) -> fmt::Result {
    if documentation.trim().is_empty() {
        return Ok(());
    }
    writeln!(f, "{}/**", indent)?;
    for line in documentation.trim_end().lines() {
        writeln!(f, "{} * {}", indent, line)?;
    }
    writeln!(f, "{} */", indent)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Loader, MemoryFileSystem};

    fn load(fs: MemoryFileSystem, root: &str) -> Schema {
        Loader::new()
            .with_file_system(fs)
            .add_thrift_file(root)
            .load()
            .expect("load")
    }

    #[test]
    fn renders_declarations() {
        let fs = MemoryFileSystem::new().with_file(
            "/idl/shop.thrift",
            r#"namespace java com.example.shop

/** Money in cents. */
typedef i64 Cents

enum Size { SMALL = 1, LARGE = 5 }

const Cents FREE = 0
const list<string> TAGS = ["a", "b\"c"]

struct Item {
  1: required string name
  2: optional Cents price = FREE (label = "price")
  3: map<string, Size> sizes
}

exception SoldOut { 1: string sku }

service Shop {
  Item lookup(1: string sku) throws (1: SoldOut sold_out)
  oneway void poke()
}
"#,
        );
        let schema = load(fs, "/idl/shop.thrift");
        let text = render_program(&schema, schema.programs()[0].id());
        assert!(text.contains("namespace java com.example.shop\n"), "{}", text);
        assert!(text.contains("/**\n * Money in cents.\n */\ntypedef i64 Cents\n"), "{}", text);
        assert!(text.contains("  SMALL = 1,\n  LARGE = 5,\n"), "{}", text);
        assert!(text.contains("const list<string> TAGS = [\"a\", \"b\\\"c\"]"), "{}", text);
        assert!(
            text.contains("  2: optional Cents price = FREE (label = \"price\"),"),
            "{}",
            text
        );
        assert!(text.contains("  3: map<string, Size> sizes,"), "{}", text);
        assert!(
            text.contains("  Item lookup(1: string sku) throws (1: SoldOut sold_out)\n"),
            "{}",
            text
        );
        assert!(text.contains("  oneway void poke()\n"), "{}", text);
    }

    #[test]
    fn foreign_types_are_qualified() {
        let fs = MemoryFileSystem::new()
            .with_file("/idl/common.thrift", "struct Id { 1: i64 value }\n")
            .with_file(
                "/idl/user.thrift",
                "include \"common.thrift\"\nstruct User { 1: common.Id id }\n",
            );
        let schema = load(fs, "/idl/user.thrift");
        let user = schema
            .programs()
            .iter()
            .find(|p| p.name() == "user")
            .expect("user program");
        let text = render_program(&schema, user.id());
        assert!(text.starts_with("include \"common.thrift\"\n"), "{}", text);
        assert!(text.contains("  1: common.Id id,"), "{}", text);

        let all = render_schema(&schema);
        assert!(all.contains("// common.thrift\n"), "{}", all);
        assert!(all.contains("// user.thrift\n"), "{}", all);
    }

    #[test]
    fn type_annotations_are_rendered() {
        let schema = load(
            MemoryFileSystem::new().with_file(
                "/idl/a.thrift",
                "typedef list<i32> (python.immutable = \"\") L\nstruct S { 1: map<string (k = \"v\"), i32> m }\n",
            ),
            "/idl/a.thrift",
        );
        let text = render_program(&schema, schema.programs()[0].id());
        assert!(
            text.contains("typedef list<i32> (python.immutable = \"\") L\n"),
            "{}",
            text
        );
        assert!(text.contains("  1: map<string (k = \"v\"), i32> m,"), "{}", text);
    }

    #[test]
    fn const_values() {
        let schema = load(
            MemoryFileSystem::new().with_file(
                "/idl/c.thrift",
                "const map<string, list<i32>> M = {\"x\": [1, 2], \"y\": []}\nconst double D = 2.5\n",
            ),
            "/idl/c.thrift",
        );
        let rendered: Vec<String> = schema
            .constants()
            .map(|c| render_const_value(&c.value))
            .collect();
        assert!(rendered.contains(&"{\"x\": [1, 2], \"y\": []}".to_string()), "{:?}", rendered);
        assert!(rendered.contains(&"2.5".to_string()), "{:?}", rendered);
    }
}
