//! One loaded IDL file: its elements, include edges and symbol tables.

use crate::ast::{NamespaceScope, ThriftFileElement};
use crate::location::Location;
use crate::types::{ConstantId, EnumId, ProgramId, ServiceId, StructId, TypedefId, UserTypeId};
use std::collections::BTreeMap;

/// A node of the include graph.
///
/// The loader creates programs with their parsed element and include edges;
/// the linker fills in the declaration ids and symbol tables.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) id: ProgramId,
    pub(crate) location: Location,
    pub(crate) element: ThriftFileElement,
    pub(crate) includes: Vec<ProgramId>,
    pub(crate) namespaces: BTreeMap<NamespaceScope, String>,
    pub(crate) enums: Vec<EnumId>,
    pub(crate) structs: Vec<StructId>,
    pub(crate) unions: Vec<StructId>,
    pub(crate) exceptions: Vec<StructId>,
    pub(crate) typedefs: Vec<TypedefId>,
    pub(crate) services: Vec<ServiceId>,
    pub(crate) constants: Vec<ConstantId>,
    pub(crate) symbols: BTreeMap<String, UserTypeId>,
    pub(crate) constant_map: BTreeMap<String, ConstantId>,
}

impl Program {
    pub(crate) fn new(id: ProgramId, element: ThriftFileElement) -> Self {
        let namespaces = element
            .namespaces
            .iter()
            .map(|ns| (ns.scope, ns.namespace.clone()))
            .collect();
        Program {
            id,
            location: element.location.clone(),
            element,
            includes: Vec::new(),
            namespaces,
            enums: Vec::new(),
            structs: Vec::new(),
            unions: Vec::new(),
            exceptions: Vec::new(),
            typedefs: Vec::new(),
            services: Vec::new(),
            constants: Vec::new(),
            symbols: BTreeMap::new(),
            constant_map: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Name used to qualify this program's symbols: `shared` for `shared.thrift`.
    pub fn name(&self) -> String {
        self.location.program_name()
    }

    pub fn element(&self) -> &ThriftFileElement {
        &self.element
    }

    /// Directly included programs, in include order.
    pub fn includes(&self) -> &[ProgramId] {
        &self.includes
    }

    pub fn namespaces(&self) -> &BTreeMap<NamespaceScope, String> {
        &self.namespaces
    }

    pub fn enums(&self) -> &[EnumId] {
        &self.enums
    }

    pub fn structs(&self) -> &[StructId] {
        &self.structs
    }

    pub fn unions(&self) -> &[StructId] {
        &self.unions
    }

    pub fn exceptions(&self) -> &[StructId] {
        &self.exceptions
    }

    pub fn typedefs(&self) -> &[TypedefId] {
        &self.typedefs
    }

    pub fn services(&self) -> &[ServiceId] {
        &self.services
    }

    pub fn constants(&self) -> &[ConstantId] {
        &self.constants
    }

    pub fn symbol(&self, name: &str) -> Option<UserTypeId> {
        self.symbols.get(name).copied()
    }

    pub fn constant(&self, name: &str) -> Option<ConstantId> {
        self.constant_map.get(name).copied()
    }
}

/// Name resolution over the include graph.
///
/// Search order: the program's own table, then `prog.Name` against the
/// program itself or any included program named `prog`, then the bare name
/// in transitively included programs (nearest first).
pub(crate) fn lookup<T: Copy>(
    programs: &[Program],
    from: ProgramId,
    name: &str,
    table: impl Fn(&Program, &str) -> Option<T>,
) -> Option<T> {
    let own = &programs[from.0];
    if let Some(found) = table(own, name) {
        return Some(found);
    }
    let reachable = transitive_includes(programs, from);
    if let Some((prefix, rest)) = name.split_once('.') {
        for id in std::iter::once(&from).chain(&reachable) {
            let program = &programs[id.0];
            if program.name() == prefix {
                if let Some(found) = table(program, rest) {
                    return Some(found);
                }
            }
        }
    }
    reachable.iter().find_map(|id| table(&programs[id.0], name))
}

/// Every program reachable through includes, breadth first, excluding `from`.
pub(crate) fn transitive_includes(programs: &[Program], from: ProgramId) -> Vec<ProgramId> {
    let mut seen = vec![false; programs.len()];
    seen[from.0] = true;
    let mut order = Vec::new();
    let mut queue = std::collections::VecDeque::from([from]);
    while let Some(id) = queue.pop_front() {
        for &inc in &programs[id.0].includes {
            if !seen[inc.0] {
                seen[inc.0] = true;
                order.push(inc);
                queue.push_back(inc);
            }
        }
    }
    order
}
