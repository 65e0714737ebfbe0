//! Source locations attached to every parsed element.

use std::fmt;
use std::path::{Path, PathBuf};

/// A position within an IDL file: `path` is relative to `base`.
///
/// `line` and `column` are 1-based, or `-1` when unknown (for example a
/// location that only identifies a file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub base: String,
    pub path: String,
    pub line: i32,
    pub column: i32,
}

impl Location {
    /// A location naming a whole file, with no line or column.
    pub fn get(base: impl Into<String>, path: impl Into<String>) -> Self {
        Location {
            base: base.into(),
            path: path.into(),
            line: -1,
            column: -1,
        }
    }

    /// Copy of this location pointing at `line`/`column`.
    pub fn at(&self, line: i32, column: i32) -> Self {
        debug_assert!(line > 0 || line == -1, "line: {}", line);
        debug_assert!(column > 0 || column == -1, "column: {}", column);
        Location {
            base: self.base.clone(),
            path: self.path.clone(),
            line,
            column,
        }
    }

    /// File name without its extension; used to qualify symbols as `program.Symbol`.
    pub fn program_name(&self) -> String {
        let file_name = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());
        match file_name.rfind('.') {
            Some(dot) => file_name[..dot].to_string(),
            None => file_name,
        }
    }

    pub fn as_path(&self) -> PathBuf {
        Path::new(&self.base).join(&self.path)
    }

    /// True if both locations name the same file, ignoring line and column.
    pub fn same_file(&self, other: &Location) -> bool {
        self.base == other.base && self.path == other.path
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.base.is_empty() {
            write!(f, "{}{}", self.base, std::path::MAIN_SEPARATOR)?;
        }
        f.write_str(&self.path)?;
        if self.line != -1 {
            write!(f, ": ({}", self.line)?;
            if self.column != -1 {
                write!(f, ", {}", self.column)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
