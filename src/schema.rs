//! The linked, validated result of a load.

use crate::program::{self, Program};
use crate::types::*;

/// All declarations reachable from the load roots, fully resolved.
///
/// User types live in per-kind arenas indexed by their ids. Constants are
/// additionally kept in dependency order: every constant comes after the
/// constants its value refers to.
#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) programs: Vec<Program>,
    pub(crate) enums: Vec<EnumType>,
    pub(crate) structs: Vec<StructType>,
    pub(crate) typedefs: Vec<TypedefType>,
    pub(crate) services: Vec<ServiceType>,
    pub(crate) constants: Vec<Constant>,
    pub(crate) constant_order: Vec<ConstantId>,
}

/// Borrowed view of any named declaration.
#[derive(Debug, Clone, Copy)]
pub enum UserElement<'a> {
    Enum(&'a EnumType),
    Struct(&'a StructType),
    Typedef(&'a TypedefType),
    Service(&'a ServiceType),
    Constant(&'a Constant),
}

impl<'a> UserElement<'a> {
    pub fn meta(&self) -> &'a UserMeta {
        match self {
            UserElement::Enum(e) => &e.meta,
            UserElement::Struct(s) => &s.meta,
            UserElement::Typedef(t) => &t.meta,
            UserElement::Service(s) => &s.meta,
            UserElement::Constant(c) => &c.meta,
        }
    }
}

impl Schema {
    pub(crate) fn from_parts(
        programs: Vec<Program>,
        enums: Vec<EnumType>,
        structs: Vec<StructType>,
        typedefs: Vec<TypedefType>,
        services: Vec<ServiceType>,
        constants: Vec<Constant>,
    ) -> Self {
        let mut schema = Schema {
            programs,
            enums,
            structs,
            typedefs,
            services,
            constants,
            constant_order: Vec::new(),
        };
        schema.sort_constants();
        schema
    }

    pub(crate) fn sort_constants(&mut self) {
        self.constant_order = dependency_order(&self.constants);
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn program(&self, id: ProgramId) -> &Program {
        &self.programs[id.0]
    }

    pub fn enums(&self) -> &[EnumType] {
        &self.enums
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructType> {
        self.structs
            .iter()
            .filter(|s| s.kind == crate::ast::StructKind::Struct)
    }

    pub fn unions(&self) -> impl Iterator<Item = &StructType> {
        self.structs.iter().filter(|s| s.is_union())
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &StructType> {
        self.structs.iter().filter(|s| s.is_exception())
    }

    pub fn typedefs(&self) -> &[TypedefType] {
        &self.typedefs
    }

    pub fn services(&self) -> &[ServiceType] {
        &self.services
    }

    /// Constants in dependency order.
    pub fn constants(&self) -> impl Iterator<Item = &Constant> {
        self.constant_order.iter().map(|id| &self.constants[id.0])
    }

    pub fn constant_order(&self) -> &[ConstantId] {
        &self.constant_order
    }

    /// Every declaration: enums, structs, typedefs, services, then constants.
    pub fn elements(&self) -> impl Iterator<Item = UserElement<'_>> {
        self.enums
            .iter()
            .map(UserElement::Enum)
            .chain(self.structs.iter().map(UserElement::Struct))
            .chain(self.typedefs.iter().map(UserElement::Typedef))
            .chain(self.services.iter().map(UserElement::Service))
            .chain(self.constants().map(UserElement::Constant))
    }

    pub fn enum_type(&self, id: EnumId) -> &EnumType {
        &self.enums[id.0]
    }

    pub fn struct_type(&self, id: StructId) -> &StructType {
        &self.structs[id.0]
    }

    pub fn typedef(&self, id: TypedefId) -> &TypedefType {
        &self.typedefs[id.0]
    }

    pub fn service(&self, id: ServiceId) -> &ServiceType {
        &self.services[id.0]
    }

    pub fn constant(&self, id: ConstantId) -> &Constant {
        &self.constants[id.0]
    }

    pub fn user_meta(&self, id: UserTypeId) -> &UserMeta {
        match id {
            UserTypeId::Enum(id) => &self.enums[id.0].meta,
            UserTypeId::Struct(id) => &self.structs[id.0].meta,
            UserTypeId::Typedef(id) => &self.typedefs[id.0].meta,
            UserTypeId::Service(id) => &self.services[id.0].meta,
        }
    }

    /// Find a type by `Name` or `program.Name`, searching programs in load order.
    pub fn find_type(&self, name: &str) -> Option<UserTypeId> {
        if let Some((prefix, rest)) = name.split_once('.') {
            let qualified = self
                .programs
                .iter()
                .filter(|p| p.name() == prefix)
                .find_map(|p| p.symbol(rest));
            if qualified.is_some() {
                return qualified;
            }
        }
        self.programs.iter().find_map(|p| p.symbol(name))
    }

    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        match self.find_type(name)? {
            UserTypeId::Struct(id) => Some(id),
            _ => None,
        }
    }

    pub fn find_enum(&self, name: &str) -> Option<EnumId> {
        match self.find_type(name)? {
            UserTypeId::Enum(id) => Some(id),
            _ => None,
        }
    }

    pub fn find_service(&self, name: &str) -> Option<ServiceId> {
        match self.find_type(name)? {
            UserTypeId::Service(id) => Some(id),
            _ => None,
        }
    }

    pub fn find_constant(&self, name: &str) -> Option<ConstantId> {
        if let Some((prefix, rest)) = name.split_once('.') {
            let qualified = self
                .programs
                .iter()
                .filter(|p| p.name() == prefix)
                .find_map(|p| p.constant(rest));
            if qualified.is_some() {
                return qualified;
            }
        }
        self.programs.iter().find_map(|p| p.constant(name))
    }

    pub(crate) fn lookup_symbol(&self, from: ProgramId, name: &str) -> Option<UserTypeId> {
        program::lookup(&self.programs, from, name, |p, n| p.symbol(n))
    }

    pub(crate) fn lookup_constant(&self, from: ProgramId, name: &str) -> Option<ConstantId> {
        program::lookup(&self.programs, from, name, |p, n| p.constant(n))
    }

    /// Strip typedefs and annotations. Returns the last typedef reached if the
    /// chain loops.
    pub fn true_type<'a>(&'a self, ty: &'a ThriftType) -> &'a ThriftType {
        let mut current = ty.unannotated();
        for _ in 0..=self.typedefs.len() {
            match current {
                ThriftType::Typedef(id) => current = self.typedefs[id.0].old_type.unannotated(),
                _ => return current,
            }
        }
        current
    }

    /// IDL spelling of a type: `i32`, `list<Foo>`, `map<string, i64>`.
    pub fn type_name(&self, ty: &ThriftType) -> String {
        match ty {
            ThriftType::Builtin(b) => b.name().to_string(),
            ThriftType::List(elem) => format!("list<{}>", self.type_name(elem)),
            ThriftType::Set(elem) => format!("set<{}>", self.type_name(elem)),
            ThriftType::Map(key, value) => {
                format!("map<{}, {}>", self.type_name(key), self.type_name(value))
            }
            ThriftType::Enum(id) => self.enums[id.0].meta.name.clone(),
            ThriftType::Struct(id) => self.structs[id.0].meta.name.clone(),
            ThriftType::Typedef(id) => self.typedefs[id.0].meta.name.clone(),
            ThriftType::Service(id) => self.services[id.0].meta.name.clone(),
            ThriftType::Annotated(inner, _) => self.type_name(inner),
        }
    }

    /// Services from `id` up through its `extends` chain, stopping at a repeat.
    pub fn service_chain(&self, id: ServiceId) -> Vec<ServiceId> {
        let mut chain = vec![id];
        let mut current = self.services[id.0].base_service();
        while let Some(base) = current {
            if chain.contains(&base) {
                break;
            }
            chain.push(base);
            current = self.services[base.0].base_service();
        }
        chain
    }

    /// A mutable copy; see [`SchemaBuilder`].
    pub fn to_builder(&self) -> SchemaBuilder {
        SchemaBuilder {
            schema: self.clone(),
        }
    }
}

/// Derives a modified [`Schema`] from an existing one.
///
/// Declarations keep their ids, so references between them stay valid.
/// Constant order is recomputed by [`SchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn map_enums(mut self, f: impl FnMut(EnumType) -> EnumType) -> Self {
        self.schema.enums = std::mem::take(&mut self.schema.enums)
            .into_iter()
            .map(f)
            .collect();
        self
    }

    pub fn map_structs(mut self, f: impl FnMut(StructType) -> StructType) -> Self {
        self.schema.structs = std::mem::take(&mut self.schema.structs)
            .into_iter()
            .map(f)
            .collect();
        self
    }

    pub fn map_typedefs(mut self, f: impl FnMut(TypedefType) -> TypedefType) -> Self {
        self.schema.typedefs = std::mem::take(&mut self.schema.typedefs)
            .into_iter()
            .map(f)
            .collect();
        self
    }

    pub fn map_services(mut self, f: impl FnMut(ServiceType) -> ServiceType) -> Self {
        self.schema.services = std::mem::take(&mut self.schema.services)
            .into_iter()
            .map(f)
            .collect();
        self
    }

    pub fn map_constants(mut self, f: impl FnMut(Constant) -> Constant) -> Self {
        self.schema.constants = std::mem::take(&mut self.schema.constants)
            .into_iter()
            .map(f)
            .collect();
        self
    }

    pub fn build(mut self) -> Schema {
        self.schema.sort_constants();
        self.schema
    }
}

/// Post-order DFS over `referenced_constants`, roots in declaration order.
/// Back edges are ignored; cycles are reported by the linker.
fn dependency_order(constants: &[Constant]) -> Vec<ConstantId> {
    fn visit(id: usize, constants: &[Constant], visited: &mut [bool], out: &mut Vec<ConstantId>) {
        if visited[id] {
            return;
        }
        visited[id] = true;
        for dep in &constants[id].referenced_constants {
            if dep.0 < constants.len() {
                visit(dep.0, constants, visited, out);
            }
        }
        out.push(ConstantId(id));
    }

    let mut visited = vec![false; constants.len()];
    let mut out = Vec::with_capacity(constants.len());
    for id in 0..constants.len() {
        visit(id, constants, &mut visited, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ConstValueElement, ConstValueKind};
    use crate::location::Location;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn constant(name: &str, refs: &[usize]) -> Constant {
        let location = Location::get("", "c.thrift");
        Constant {
            meta: UserMeta {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
                location: location.clone(),
                documentation: String::new(),
                annotations: BTreeMap::new(),
                namespaces: BTreeMap::new(),
                program: ProgramId(0),
            },
            const_type: ThriftType::Builtin(BuiltinType::I32),
            value: ConstValueElement {
                location,
                thrift_text: "0".to_string(),
                kind: ConstValueKind::Int(0),
            },
            referenced_constants: refs.iter().map(|&i| ConstantId(i)).collect(),
        }
    }

    #[test]
    fn dependencies_come_first() {
        // C -> B -> A, D -> A
        let constants = vec![
            constant("C", &[1]),
            constant("B", &[2]),
            constant("A", &[]),
            constant("D", &[2]),
        ];
        let order: Vec<_> = dependency_order(&constants)
            .into_iter()
            .map(|id| constants[id.0].name().to_string())
            .collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn dependency_order_terminates_on_cycles() {
        let constants = vec![constant("A", &[1]), constant("B", &[0])];
        assert_eq!(dependency_order(&constants).len(), 2);
    }

    #[test]
    fn builder_resorts_constants() {
        let schema = Schema::from_parts(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![constant("A", &[]), constant("B", &[])],
        );
        let names: Vec<_> = schema.constants().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["A", "B"]);

        let rebuilt = schema
            .to_builder()
            .map_constants(|mut c| {
                if c.name() == "A" {
                    c.referenced_constants = vec![ConstantId(1)];
                }
                c
            })
            .build();
        let names: Vec<_> = rebuilt.constants().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
