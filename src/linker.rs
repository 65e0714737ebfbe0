//! Turns parsed programs into a linked [`Schema`].
//!
//! Linking runs in passes over the whole include graph:
//!
//! 1. assign ids and fill every program's symbol tables;
//! 2. build the linked declarations, resolving each [`TypeElement`];
//! 3. reject typedef chains that loop;
//! 4. compute each constant's references and reject reference cycles.
//!
//! Unresolvable names are reported and replaced by `void` so later passes
//! can keep going; the load fails before validation if anything was reported.

use crate::ast::*;
use crate::constant;
use crate::error::ErrorReporter;
use crate::location::Location;
use crate::program::{self, Program};
use crate::schema::Schema;
use crate::types::*;
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub(crate) fn link(mut programs: Vec<Program>, reporter: &mut ErrorReporter) -> Schema {
    register_symbols(&mut programs, reporter);

    let linked = Resolver {
        programs: &programs,
    }
    .build(reporter);
    debug!(
        enums = linked.enums.len(),
        structs = linked.structs.len(),
        typedefs = linked.typedefs.len(),
        services = linked.services.len(),
        constants = linked.constants.len(),
        "resolved declarations"
    );

    let mut schema = Schema::from_parts(
        programs,
        linked.enums,
        linked.structs,
        linked.typedefs,
        linked.services,
        linked.constants,
    );

    if check_typedef_cycles(&schema, reporter) {
        link_constants(&mut schema, reporter);
    }
    schema
}

// ==================== Pass 1: symbols ====================

fn register_symbols(programs: &mut [Program], reporter: &mut ErrorReporter) {
    let mut next_enum = 0;
    let mut next_struct = 0;
    let mut next_typedef = 0;
    let mut next_service = 0;
    let mut next_constant = 0;

    for program in programs.iter_mut() {
        let mut symbols = SymbolTable::default();
        let file = &program.element;

        for e in &file.enums {
            let id = EnumId(next_enum);
            next_enum += 1;
            program.enums.push(id);
            symbols.add_type(reporter, &e.name, &e.location, UserTypeId::Enum(id));
        }
        for (kind_list, elements) in [
            (&mut program.structs, &file.structs),
            (&mut program.unions, &file.unions),
            (&mut program.exceptions, &file.exceptions),
        ] {
            for s in elements {
                let id = StructId(next_struct);
                next_struct += 1;
                kind_list.push(id);
                symbols.add_type(reporter, &s.name, &s.location, UserTypeId::Struct(id));
            }
        }
        for t in &file.typedefs {
            let id = TypedefId(next_typedef);
            next_typedef += 1;
            program.typedefs.push(id);
            symbols.add_type(reporter, &t.new_name, &t.location, UserTypeId::Typedef(id));
        }
        for s in &file.services {
            let id = ServiceId(next_service);
            next_service += 1;
            program.services.push(id);
            symbols.add_type(reporter, &s.name, &s.location, UserTypeId::Service(id));
        }
        for c in &file.constants {
            let id = ConstantId(next_constant);
            next_constant += 1;
            program.constants.push(id);
            symbols.add_constant(reporter, &c.name, &c.location, id);
        }

        trace!(program = %program.location, symbols = symbols.types.len(), "registered symbols");
        program.symbols = symbols.types;
        program.constant_map = symbols.constants;
    }
}

#[derive(Default)]
struct SymbolTable {
    types: BTreeMap<String, UserTypeId>,
    constants: BTreeMap<String, ConstantId>,
    locations: BTreeMap<String, Location>,
}

impl SymbolTable {
    fn add_type(
        &mut self,
        reporter: &mut ErrorReporter,
        name: &str,
        location: &Location,
        id: UserTypeId,
    ) {
        self.check_duplicate(reporter, name, location);
        self.types.insert(name.to_string(), id);
    }

    fn add_constant(
        &mut self,
        reporter: &mut ErrorReporter,
        name: &str,
        location: &Location,
        id: ConstantId,
    ) {
        self.check_duplicate(reporter, name, location);
        self.constants.insert(name.to_string(), id);
    }

    /// Later declarations shadow earlier ones after the error is reported.
    fn check_duplicate(&mut self, reporter: &mut ErrorReporter, name: &str, location: &Location) {
        if let Some(previous) = self.locations.insert(name.to_string(), location.clone()) {
            reporter.error(
                location,
                format!(
                    "Duplicate symbols: {} defined at {} and at {}",
                    name, previous, location
                ),
            );
        }
    }
}

// ==================== Pass 2: resolution ====================

struct Linked {
    enums: Vec<EnumType>,
    structs: Vec<StructType>,
    typedefs: Vec<TypedefType>,
    services: Vec<ServiceType>,
    constants: Vec<Constant>,
}

struct Resolver<'a> {
    programs: &'a [Program],
}

impl<'a> Resolver<'a> {
    /// Walks programs and elements in the same order as [`register_symbols`],
    /// so arena positions match the ids handed out there.
    fn build(&self, reporter: &mut ErrorReporter) -> Linked {
        let mut linked = Linked {
            enums: Vec::new(),
            structs: Vec::new(),
            typedefs: Vec::new(),
            services: Vec::new(),
            constants: Vec::new(),
        };
        for program in self.programs {
            let file = &program.element;
            for e in &file.enums {
                linked.enums.push(self.enum_type(program, e));
            }
            for s in file.structs.iter().chain(&file.unions).chain(&file.exceptions) {
                linked.structs.push(self.struct_type(program, s, reporter));
            }
            for t in &file.typedefs {
                let old_type = self.resolve_type(program.id, &t.old_type, reporter);
                linked.typedefs.push(TypedefType {
                    meta: self.meta(
                        program,
                        t.uuid,
                        &t.new_name,
                        &t.location,
                        &t.documentation,
                        &t.annotations,
                    ),
                    old_type,
                });
            }
            for s in &file.services {
                linked.services.push(self.service_type(program, s, reporter));
            }
            for c in &file.constants {
                let const_type = self.resolve_type(program.id, &c.type_element, reporter);
                linked.constants.push(Constant {
                    meta: self.meta(
                        program,
                        c.uuid,
                        &c.name,
                        &c.location,
                        &c.documentation,
                        &c.annotations,
                    ),
                    const_type,
                    value: c.value.clone(),
                    referenced_constants: Vec::new(),
                });
            }
        }
        linked
    }

    fn meta(
        &self,
        program: &Program,
        uuid: uuid::Uuid,
        name: &str,
        location: &Location,
        documentation: &str,
        annotations: &Option<AnnotationElement>,
    ) -> UserMeta {
        UserMeta {
            uuid,
            name: name.to_string(),
            location: location.clone(),
            documentation: documentation.to_string(),
            annotations: annotation_map(annotations),
            namespaces: program.namespaces.clone(),
            program: program.id,
        }
    }

    fn enum_type(&self, program: &Program, e: &EnumElement) -> EnumType {
        EnumType {
            meta: self.meta(
                program,
                e.uuid,
                &e.name,
                &e.location,
                &e.documentation,
                &e.annotations,
            ),
            members: e
                .members
                .iter()
                .map(|m| EnumMember {
                    uuid: m.uuid,
                    name: m.name.clone(),
                    value: m.value,
                    location: m.location.clone(),
                    documentation: m.documentation.clone(),
                    annotations: annotation_map(&m.annotations),
                })
                .collect(),
        }
    }

    fn struct_type(
        &self,
        program: &Program,
        s: &StructElement,
        reporter: &mut ErrorReporter,
    ) -> StructType {
        StructType {
            meta: self.meta(
                program,
                s.uuid,
                &s.name,
                &s.location,
                &s.documentation,
                &s.annotations,
            ),
            kind: s.kind,
            fields: self.fields(program.id, &s.fields, reporter),
        }
    }

    fn service_type(
        &self,
        program: &Program,
        s: &ServiceElement,
        reporter: &mut ErrorReporter,
    ) -> ServiceType {
        let extends = s
            .extends_service
            .as_ref()
            .map(|base| self.resolve_type(program.id, base, reporter));
        let methods = s
            .functions
            .iter()
            .map(|f| ServiceMethod {
                uuid: f.uuid,
                name: f.name.clone(),
                one_way: f.one_way,
                return_type: self.resolve_type(program.id, &f.return_type, reporter),
                params: self.fields(program.id, &f.params, reporter),
                exceptions: self.fields(program.id, &f.exceptions, reporter),
                location: f.location.clone(),
                documentation: f.documentation.clone(),
                annotations: annotation_map(&f.annotations),
            })
            .collect();
        ServiceType {
            meta: self.meta(
                program,
                s.uuid,
                &s.name,
                &s.location,
                &s.documentation,
                &s.annotations,
            ),
            extends,
            methods,
        }
    }

    fn fields(
        &self,
        program: ProgramId,
        fields: &[FieldElement],
        reporter: &mut ErrorReporter,
    ) -> Vec<Field> {
        fields
            .iter()
            .map(|f| Field {
                uuid: f.uuid,
                id: f.field_id,
                name: f.name.clone(),
                requiredness: f.requiredness,
                field_type: self.resolve_type(program, &f.field_type, reporter),
                default_value: f.const_value.clone(),
                location: f.location.clone(),
                documentation: f.documentation.clone(),
                annotations: annotation_map(&f.annotations),
            })
            .collect()
    }

    fn resolve_type(
        &self,
        program: ProgramId,
        element: &TypeElement,
        reporter: &mut ErrorReporter,
    ) -> ThriftType {
        let ty = match &element.kind {
            TypeElementKind::Scalar(name) => {
                if let Some(builtin) = BuiltinType::for_name(name) {
                    ThriftType::Builtin(builtin)
                } else {
                    match program::lookup(self.programs, program, name, |p, n| p.symbol(n)) {
                        Some(id) => id.to_type(),
                        None => {
                            reporter.error(
                                &element.location,
                                format!("Failed to resolve type '{}'", name),
                            );
                            ThriftType::VOID
                        }
                    }
                }
            }
            TypeElementKind::List(elem) => {
                ThriftType::List(Box::new(self.resolve_type(program, elem, reporter)))
            }
            TypeElementKind::Set(elem) => {
                ThriftType::Set(Box::new(self.resolve_type(program, elem, reporter)))
            }
            TypeElementKind::Map { key, value } => ThriftType::Map(
                Box::new(self.resolve_type(program, key, reporter)),
                Box::new(self.resolve_type(program, value, reporter)),
            ),
        };
        ty.with_annotations(annotation_map(&element.annotations))
    }
}

// ==================== Pass 3: typedef cycles ====================

/// Reports each typedef cycle once, at its lowest-id member. Returns false if
/// any cycle was found.
fn check_typedef_cycles(schema: &Schema, reporter: &mut ErrorReporter) -> bool {
    let mut ok = true;
    for (index, typedef) in schema.typedefs.iter().enumerate() {
        let start = TypedefId(index);
        let mut chain = vec![start];
        let mut current = typedef.old_type.unannotated();
        while let ThriftType::Typedef(next) = current {
            if *next == start {
                ok = false;
                if chain.iter().all(|id| id.0 >= index) {
                    let names: Vec<&str> = chain
                        .iter()
                        .chain(std::iter::once(&start))
                        .map(|id| schema.typedef(*id).name())
                        .collect();
                    reporter.error(
                        &typedef.meta.location,
                        format!("Cycle in typedef chain: {}", names.join(" -> ")),
                    );
                }
                break;
            }
            if chain.contains(next) {
                // Loops without passing through `start`; reported from inside the loop.
                break;
            }
            chain.push(*next);
            current = schema.typedef(*next).old_type.unannotated();
        }
    }
    ok
}

// ==================== Pass 4: constants ====================

fn link_constants(schema: &mut Schema, reporter: &mut ErrorReporter) {
    let references: Vec<Vec<ConstantId>> = schema
        .constants
        .iter()
        .map(|c| {
            constant::referenced_constants(schema, c.meta.program, &c.const_type, &c.value)
        })
        .collect();
    for (c, refs) in schema.constants.iter_mut().zip(references) {
        c.referenced_constants = refs;
    }
    check_constant_cycles(schema, reporter);
    schema.sort_constants();
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    Visiting,
    Visited,
}

fn check_constant_cycles(schema: &Schema, reporter: &mut ErrorReporter) {
    fn visit(
        id: ConstantId,
        schema: &Schema,
        states: &mut [VisitState],
        path: &mut Vec<ConstantId>,
        reporter: &mut ErrorReporter,
    ) {
        match states[id.0] {
            VisitState::Visited => return,
            VisitState::Visiting => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let names: Vec<&str> = path[start..]
                    .iter()
                    .chain(std::iter::once(&id))
                    .map(|c| schema.constant(*c).name())
                    .collect();
                let origin = schema.constant(path[start]);
                reporter.error(
                    &origin.meta.location,
                    format!(
                        "Cycle detected while validating Thrift constants: {}",
                        names.join(" -> ")
                    ),
                );
                return;
            }
            VisitState::Unvisited => {}
        }
        states[id.0] = VisitState::Visiting;
        path.push(id);
        for dep in &schema.constant(id).referenced_constants {
            visit(*dep, schema, states, path, reporter);
        }
        path.pop();
        states[id.0] = VisitState::Visited;
    }

    let mut states = vec![VisitState::Unvisited; schema.constants.len()];
    let mut path = Vec::new();
    for index in 0..schema.constants.len() {
        visit(ConstantId(index), schema, &mut states, &mut path, reporter);
    }
}
