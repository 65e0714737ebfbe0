//! Loads IDL files and everything they include into a [`Schema`].
//!
//! ```no_run
//! use thrift_schema::Loader;
//!
//! let schema = Loader::new()
//!     .add_include_path("idl/common")
//!     .add_thrift_file("idl/service.thrift")
//!     .load()?;
//! # Ok::<(), thrift_schema::LoadError>(())
//! ```
//!
//! Each file is parsed once, keyed by canonical path. Includes are searched in
//! the including file's directory first, then in the include paths in the
//! order they were added. Parse errors stop the load before linking, and link
//! errors stop it before validation; within a phase every error is collected.

use crate::error::{ErrorReporter, LoadError, Report};
use crate::location::Location;
use crate::parser;
use crate::program::Program;
use crate::schema::Schema;
use crate::types::ProgramId;
use crate::{linker, validate};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Source of IDL text. Abstracts the disk so loads can run from memory.
pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn is_file(&self, path: &Path) -> bool;
    /// An absolute path that is the same for every spelling of one file.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileSystem;

impl FileSystem for DiskFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

/// In-memory files keyed by normalized absolute path.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), contents.into());
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let normalized = normalize(path);
        if self.files.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        }
    }
}

/// Lexically resolve `.` and `..`, rooting relative paths at `/`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Configures and runs a schema load.
pub struct Loader {
    include_paths: Vec<PathBuf>,
    thrift_files: Vec<PathBuf>,
    file_system: Box<dyn FileSystem>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Loader {
            include_paths: Vec::new(),
            thrift_files: Vec::new(),
            file_system: Box::new(DiskFileSystem),
        }
    }

    /// Add a directory searched for includes, after earlier ones.
    pub fn add_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    /// Add a root file to load.
    pub fn add_thrift_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.thrift_files.push(path.into());
        self
    }

    pub fn with_file_system(mut self, file_system: impl FileSystem + 'static) -> Self {
        self.file_system = Box::new(file_system);
        self
    }

    /// Load, link and validate every root file and its includes.
    pub fn load(&self) -> Result<Schema, LoadError> {
        self.load_with_warnings().map(|(schema, _)| schema)
    }

    /// Like [`Loader::load`], also returning warnings from a successful load.
    pub fn load_with_warnings(&self) -> Result<(Schema, Vec<Report>), LoadError> {
        if self.thrift_files.is_empty() {
            return Err(LoadError::NoRoots);
        }
        let mut reporter = ErrorReporter::new();
        let mut graph = IncludeGraph::new(self.file_system.as_ref(), &self.include_paths);
        for root in &self.thrift_files {
            match self.file_system.canonicalize(root) {
                Ok(path) => {
                    graph.load(&path, &mut reporter);
                }
                Err(e) => reporter.error(
                    &Location::get("", root.display().to_string()),
                    format!("Failed to locate thrift file: {}", e),
                ),
            }
        }
        if reporter.has_error() {
            return Err(LoadError::from_reporter(reporter));
        }
        info!(programs = graph.programs.len(), "parsed include graph");

        let schema = linker::link(graph.programs, &mut reporter);
        if reporter.has_error() {
            return Err(LoadError::from_reporter(reporter));
        }

        validate::validate_schema(&schema, &mut reporter);
        if reporter.has_error() {
            return Err(LoadError::from_reporter(reporter));
        }
        Ok((schema, reporter.into_reports()))
    }
}

/// Convenience for `Loader::new()` with the given roots and include paths.
pub fn load(
    thrift_files: &[PathBuf],
    include_paths: &[PathBuf],
) -> Result<Schema, LoadError> {
    let loader = include_paths
        .iter()
        .fold(Loader::new(), |l, p| l.add_include_path(p.clone()));
    thrift_files
        .iter()
        .fold(loader, |l, f| l.add_thrift_file(f.clone()))
        .load()
}

struct IncludeGraph<'a> {
    fs: &'a dyn FileSystem,
    include_paths: &'a [PathBuf],
    programs: Vec<Program>,
    by_path: HashMap<PathBuf, ProgramId>,
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
}

impl<'a> IncludeGraph<'a> {
    fn new(fs: &'a dyn FileSystem, include_paths: &'a [PathBuf]) -> Self {
        IncludeGraph {
            fs,
            include_paths,
            programs: Vec::new(),
            by_path: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn location_for(path: &Path) -> Location {
        let base = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Location::get(base, file)
    }

    /// Parse `path` and, recursively, its includes. `path` must be canonical.
    fn load(&mut self, path: &Path, reporter: &mut ErrorReporter) -> Option<ProgramId> {
        if let Some(&id) = self.by_path.get(path) {
            return Some(id);
        }
        let location = Self::location_for(path);
        let source = match self.fs.read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                reporter.error(&location, format!("Failed to read thrift file: {}", e));
                return None;
            }
        };
        debug!(path = %path.display(), "parsing");
        let element = parser::parse_with_reporter(&location, &source, reporter);

        let id = ProgramId(self.programs.len());
        let includes = element.includes.clone();
        self.programs.push(Program::new(id, element));
        self.by_path.insert(path.to_path_buf(), id);
        self.stack.push(path.to_path_buf());

        let mut edges = Vec::new();
        for include in includes.iter().filter(|i| !i.is_cpp) {
            let Some(target) = self.resolve_include(path, &include.path) else {
                reporter.error(
                    &include.location,
                    format!("Failed to locate included file '{}'", include.path),
                );
                continue;
            };
            if let Some(start) = self.stack.iter().position(|p| *p == target) {
                let chain: Vec<String> = self.stack[start..]
                    .iter()
                    .chain(std::iter::once(&target))
                    .map(|p| display_name(p))
                    .collect();
                reporter.error(
                    &include.location,
                    format!(
                        "Circular include; file includes itself transitively {}",
                        chain.join(" -> ")
                    ),
                );
                continue;
            }
            if let Some(child) = self.load(&target, reporter) {
                if !edges.contains(&child) {
                    edges.push(child);
                }
            }
        }

        self.stack.pop();
        self.programs[id.0].includes = edges;
        Some(id)
    }

    fn resolve_include(&self, from: &Path, include: &str) -> Option<PathBuf> {
        let include = Path::new(include);
        let candidates = if include.is_absolute() {
            vec![include.to_path_buf()]
        } else {
            from.parent()
                .into_iter()
                .chain(self.include_paths.iter().map(PathBuf::as_path))
                .map(|dir| dir.join(include))
                .collect()
        };
        candidates
            .into_iter()
            .filter(|c| self.fs.is_file(c))
            .find_map(|c| self.fs.canonicalize(&c).ok())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c.thrift")), PathBuf::from("/a/c.thrift"));
        assert_eq!(normalize(Path::new("x/y.thrift")), PathBuf::from("/x/y.thrift"));
    }

    #[test]
    fn no_roots_is_an_error() {
        assert!(matches!(Loader::new().load(), Err(LoadError::NoRoots)));
    }

    #[test]
    fn includes_are_parsed_once() {
        let fs = MemoryFileSystem::new()
            .with_file("/idl/a.thrift", "include \"b.thrift\"\ninclude \"./c.thrift\"\n")
            .with_file("/idl/b.thrift", "include \"c.thrift\"\n")
            .with_file("/idl/c.thrift", "struct C {}\n");
        let schema = Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/a.thrift")
            .add_thrift_file("/idl/c.thrift")
            .load()
            .expect("load");
        assert_eq!(schema.programs().len(), 3);
        assert_eq!(schema.structs().count(), 1);
    }

    #[test]
    fn include_paths_searched_after_local_dir() {
        let fs = MemoryFileSystem::new()
            .with_file("/idl/main.thrift", "include \"shared.thrift\"\nstruct M { 1: shared.S s }\n")
            .with_file("/idl/shared.thrift", "struct S { 1: i32 local }\n")
            .with_file("/lib/shared.thrift", "struct S { 1: i32 library }\n")
            .with_file("/lib/only.thrift", "struct O {}\n");
        let schema = Loader::new()
            .with_file_system(fs.clone())
            .add_include_path("/lib")
            .add_thrift_file("/idl/main.thrift")
            .load()
            .expect("load");
        let s = schema.struct_type(schema.find_struct("S").expect("S"));
        assert_eq!(s.fields[0].name, "local");

        let fs = fs.with_file("/idl/uses_lib.thrift", "include \"only.thrift\"\n");
        let schema = Loader::new()
            .with_file_system(fs)
            .add_include_path("/lib")
            .add_thrift_file("/idl/uses_lib.thrift")
            .load()
            .expect("load");
        assert!(schema.find_struct("O").is_some());
    }

    #[test]
    fn missing_include_reported() {
        let fs = MemoryFileSystem::new().with_file("/idl/a.thrift", "include \"nope.thrift\"\n");
        let err = Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/a.thrift")
            .load()
            .expect_err("fail");
        assert!(err.mentions("Failed to locate included file 'nope.thrift'"));
    }

    #[test]
    fn circular_include_names_chain() {
        let fs = MemoryFileSystem::new()
            .with_file("/idl/a.thrift", "include \"b.thrift\"\n")
            .with_file("/idl/b.thrift", "include \"a.thrift\"\n");
        let err = Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/a.thrift")
            .load()
            .expect_err("fail");
        assert!(
            err.mentions("Circular include; file includes itself transitively a.thrift -> b.thrift -> a.thrift"),
            "{}",
            err
        );
    }

    #[test]
    fn parse_errors_from_every_file_are_collected() {
        let fs = MemoryFileSystem::new()
            .with_file("/idl/a.thrift", "include \"b.thrift\"\nstruct A { 1: i32 }\n")
            .with_file("/idl/b.thrift", "struct B { 0: i32 x }\n");
        let err = Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/a.thrift")
            .load()
            .expect_err("fail");
        assert!(err.mentions("Syntax error"));
        assert!(err.mentions("field ID must be greater than zero"));
    }

    #[test]
    fn jvm_namespace_visible_on_types() {
        let fs = MemoryFileSystem::new().with_file(
            "/idl/ns.thrift",
            "namespace jvm com.example\nnamespace * fallback\nstruct S {}\n",
        );
        let schema = Loader::new()
            .with_file_system(fs)
            .add_thrift_file("/idl/ns.thrift")
            .load()
            .expect("load");
        let s = schema.struct_type(schema.find_struct("S").expect("S"));
        use crate::ast::NamespaceScope;
        assert_eq!(s.meta.namespace_for(NamespaceScope::Kotlin), Some("com.example"));
        assert_eq!(s.meta.namespace_for(NamespaceScope::Java), Some("com.example"));
        assert_eq!(s.meta.namespace_for(NamespaceScope::Go), Some("fallback"));
    }
}
