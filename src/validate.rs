//! Semantic checks on a linked schema.
//!
//! Every rule reports through the shared [`ErrorReporter`] and carries on, so
//! one pass surfaces every violation.

use crate::constant;
use crate::error::{ErrorReporter, LoadError};
use crate::parser::report_duplicate_ids;
use crate::schema::Schema;
use crate::types::*;
use std::collections::HashMap;
use tracing::debug;

/// Validate a schema built or modified outside the loader.
pub fn validate(schema: &Schema) -> Result<(), LoadError> {
    let mut reporter = ErrorReporter::new();
    validate_schema(schema, &mut reporter);
    if reporter.has_error() {
        return Err(LoadError::from_reporter(reporter));
    }
    Ok(())
}

pub(crate) fn validate_schema(schema: &Schema, reporter: &mut ErrorReporter) {
    let before = reporter.error_count();
    for s in &schema.structs {
        validate_struct(schema, s, reporter);
    }
    for t in &schema.typedefs {
        validate_typedef(schema, t, reporter);
    }
    for (index, service) in schema.services.iter().enumerate() {
        validate_service(schema, ServiceId(index), service, reporter);
    }
    for c in &schema.constants {
        if let Err(problems) =
            constant::validate_value(schema, c.meta.program, &c.const_type, &c.value)
        {
            for (location, message) in problems {
                reporter.error(&location, message);
            }
        }
    }
    debug!(errors = reporter.error_count() - before, "validated schema");
}

fn validate_fields(fields: &[Field], reporter: &mut ErrorReporter) {
    for field in fields {
        if field.id <= 0 {
            reporter.error(&field.location, "field ID must be greater than zero");
        }
    }
    report_duplicate_ids(
        reporter,
        fields.iter().map(|f| (f.id, &f.location)),
        "duplicate field ID",
    );
}

fn validate_struct(schema: &Schema, s: &StructType, reporter: &mut ErrorReporter) {
    validate_fields(&s.fields, reporter);

    if s.is_union() {
        for field in s.fields.iter().filter(|f| f.is_required()) {
            reporter.error(&field.location, "unions cannot have required fields");
        }
        let defaults = s.fields.iter().filter(|f| f.default_value.is_some()).count();
        if defaults > 1 {
            reporter.error(
                &s.meta.location,
                "unions can have at most one field with a default value",
            );
        }
    }

    for field in &s.fields {
        if let Some(default) = &field.default_value {
            if let Err(problems) =
                constant::validate_value(schema, s.meta.program, &field.field_type, default)
            {
                for (location, message) in problems {
                    reporter.error(&location, message);
                }
            }
        }
    }
}

fn validate_typedef(schema: &Schema, t: &TypedefType, reporter: &mut ErrorReporter) {
    match schema.true_type(&t.old_type) {
        ThriftType::Builtin(BuiltinType::Void) => {
            reporter.error(&t.meta.location, "Cannot declare a typedef of void");
        }
        ThriftType::Service(_) => {
            reporter.error(&t.meta.location, "Cannot declare a typedef of a service");
        }
        _ => {}
    }
}

fn validate_service(
    schema: &Schema,
    id: ServiceId,
    service: &ServiceType,
    reporter: &mut ErrorReporter,
) {
    if let Some(base) = &service.extends {
        if !matches!(schema.true_type(base), ThriftType::Service(_)) {
            reporter.error(
                &service.meta.location,
                format!("Base type '{}' is not a service", schema.type_name(base)),
            );
        }
    }

    let chain = schema.service_chain(id);
    let last = chain.last().copied().unwrap_or(id);
    let loops_back = schema.service(last).base_service().is_some_and(|b| chain.contains(&b));
    if loops_back {
        // Report each inheritance loop once, from its lowest id.
        let cycle_start = schema
            .service(last)
            .base_service()
            .and_then(|b| chain.iter().position(|c| *c == b))
            .unwrap_or(0);
        let cycle = &chain[cycle_start..];
        if cycle.first() == Some(&id) && cycle.iter().all(|c| c.0 >= id.0) {
            let names: Vec<&str> = cycle
                .iter()
                .chain(std::iter::once(&id))
                .map(|s| schema.service(*s).name())
                .collect();
            reporter.error(
                &service.meta.location,
                format!("Service inheritance cycle: {}", names.join(" -> ")),
            );
        }
    }

    validate_method_names(schema, &chain, service, reporter);

    for method in &service.methods {
        validate_method(schema, method, reporter);
    }
}

/// A name clash with an inherited method is reported at the base class
/// declaration; clashes among the bases themselves belong to those bases.
fn validate_method_names(
    schema: &Schema,
    chain: &[ServiceId],
    service: &ServiceType,
    reporter: &mut ErrorReporter,
) {
    let mut own: HashMap<&str, &ServiceMethod> = HashMap::new();
    for method in &service.methods {
        if let Some(previous) = own.get(method.name.as_str()) {
            reporter.error(
                &method.location,
                format!(
                    "Duplicate method; '{}' conflicts with another method declared at {}",
                    method.name, previous.location
                ),
            );
        } else {
            own.insert(&method.name, method);
        }
    }
    for base in chain.iter().skip(1) {
        for method in &schema.service(*base).methods {
            if let Some(derived) = own.get(method.name.as_str()) {
                reporter.error(
                    &method.location,
                    format!(
                        "Duplicate method; '{}' conflicts with another method declared at {}",
                        method.name, derived.location
                    ),
                );
            }
        }
    }
}

fn validate_method(schema: &Schema, method: &ServiceMethod, reporter: &mut ErrorReporter) {
    if method.one_way {
        if !method.return_type.is_void() {
            reporter.error(
                &method.location,
                "oneway methods may not have a non-void return type",
            );
        }
        if !method.exceptions.is_empty() {
            reporter.error(&method.location, "oneway methods may not throw exceptions");
        }
    }

    validate_fields(&method.params, reporter);
    validate_fields(&method.exceptions, reporter);

    for exception in &method.exceptions {
        let is_exception = match schema.true_type(&exception.field_type) {
            ThriftType::Struct(id) => schema.struct_type(*id).is_exception(),
            _ => false,
        };
        if !is_exception {
            reporter.error(&exception.location, "Only exception types can be thrown");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::loader::{Loader, MemoryFileSystem};

    fn load(src: &str) -> Result<crate::schema::Schema, crate::error::LoadError> {
        let fs = MemoryFileSystem::new().with_file("/idl/v.thrift", src);
        Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/v.thrift")
            .load()
    }

    #[test]
    fn union_required_fields_rejected() {
        let err = load("union U { 1: required i32 a; 2: string b }\n").expect_err("fail");
        assert!(err.mentions("unions cannot have required fields"));
    }

    #[test]
    fn oneway_rules() {
        let err = load(
            "exception E {}\nservice S {\n  oneway i32 a()\n  oneway void b() throws (1: E e)\n}\n",
        )
        .expect_err("fail");
        assert!(err.mentions("oneway methods may not have a non-void return type"));
        assert!(err.mentions("oneway methods may not throw exceptions"));
    }

    #[test]
    fn only_exceptions_thrown() {
        let err = load("struct NotAnError {}\nservice S { void f() throws (1: NotAnError e) }\n")
            .expect_err("fail");
        assert!(err.mentions("Only exception types can be thrown"));
    }

    #[test]
    fn inherited_method_conflict_reported_at_base() {
        let err = load("service Base {\n  void ping()\n}\nservice Derived extends Base {\n  void ping()\n}\n")
            .expect_err("fail");
        let report = err
            .reports()
            .iter()
            .find(|r| r.message.starts_with("Duplicate method; 'ping'"))
            .expect("duplicate method");
        assert_eq!(report.location.line, 2);
        assert!(report.message.contains("(5, 3)"), "{}", report.message);
        assert_eq!(
            err.reports()
                .iter()
                .filter(|r| r.message.starts_with("Duplicate method"))
                .count(),
            1
        );
    }

    #[test]
    fn extends_must_name_a_service() {
        let err = load("struct B {}\nservice S extends B {}\n").expect_err("fail");
        assert!(err.mentions("Base type 'B' is not a service"));
    }

    #[test]
    fn inheritance_cycle_reported_once() {
        let err = load("service A extends B {}\nservice B extends A {}\n").expect_err("fail");
        let cycles: Vec<_> = err
            .reports()
            .iter()
            .filter(|r| r.message.starts_with("Service inheritance cycle"))
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.ends_with("A -> B -> A"));
    }

    #[test]
    fn typedef_of_service_rejected() {
        let err = load("service S {}\ntypedef S T\n").expect_err("fail");
        assert!(err.mentions("Cannot declare a typedef of a service"));
    }

    #[test]
    fn field_defaults_validated() {
        let err = load("struct S { 1: i16 x = 100000 }\n").expect_err("fail");
        assert!(err.mentions("out of range for type i16"));
    }

    #[test]
    fn programmatic_edits_are_revalidated() {
        let schema = load("struct S { 1: i32 a; 2: i32 b }\n").expect("load");
        crate::validate::validate(&schema).expect("still valid");
        let broken = schema
            .to_builder()
            .map_structs(|mut s| {
                for f in &mut s.fields {
                    f.id = 7;
                }
                s
            })
            .build();
        let err = crate::validate::validate(&broken).expect_err("duplicate ids");
        assert_eq!(
            err.reports()
                .iter()
                .filter(|r| r.message == "duplicate field ID: 7")
                .count(),
            2
        );
    }
}
