//! Diagnostic accumulation for the parse, link and validate passes.
//!
//! Build-time problems are never raised one by one: every pass pushes a
//! [`Report`] into a shared [`ErrorReporter`] and the loader fails once, at the
//! end, with a [`LoadError`] listing all of them.

use crate::location::Location;
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Warning => f.write_str("warning"),
            Level::Error => f.write_str("error"),
        }
    }
}

/// A single diagnostic with location.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub level: Level,
    pub location: Location,
    pub message: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Collects warnings and errors across one schema build.
#[derive(Debug, Default, Clone)]
pub struct ErrorReporter {
    reports: Vec<Report>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, location: &Location, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%location, "{}", message);
        self.reports.push(Report {
            level: Level::Warning,
            location: location.clone(),
            message,
        });
    }

    pub fn error(&mut self, location: &Location, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%location, "{}", message);
        self.reports.push(Report {
            level: Level::Error,
            location: location.clone(),
            message,
        });
    }

    pub fn has_error(&self) -> bool {
        self.reports.iter().any(|r| r.level == Level::Error)
    }

    pub fn error_count(&self) -> usize {
        self.reports.iter().filter(|r| r.level == Level::Error).count()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<Report> {
        self.reports
    }

    /// Every report as `level: location: message`, in the order reported.
    pub fn formatted_reports(&self) -> Vec<String> {
        self.reports.iter().map(format_report).collect()
    }
}

fn format_report(report: &Report) -> String {
    format!("{}: {}", report.level, report)
}

/// Aggregate failure of a schema load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Loading failed with {} error(s):\n{}", count_errors(.reports), join_reports(.reports))]
    Failed { reports: Vec<Report> },
    #[error("No thrift files were given to load")]
    NoRoots,
}

impl LoadError {
    pub(crate) fn from_reporter(reporter: ErrorReporter) -> Self {
        LoadError::Failed {
            reports: reporter.into_reports(),
        }
    }

    /// All diagnostics, warnings included.
    pub fn reports(&self) -> &[Report] {
        match self {
            LoadError::Failed { reports } => reports,
            LoadError::NoRoots => &[],
        }
    }

    /// True if any error-level report contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.reports()
            .iter()
            .any(|r| r.level == Level::Error && r.message.contains(needle))
    }
}

fn count_errors(reports: &[Report]) -> usize {
    reports.iter().filter(|r| r.level == Level::Error).count()
}

fn join_reports(reports: &[Report]) -> String {
    reports.iter().map(format_report).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let loc = Location::get("", "a.thrift").at(1, 1);
        let mut reporter = ErrorReporter::new();
        reporter.warn(&loc, "unknown scope");
        assert!(!reporter.has_error());
        reporter.error(&loc, "bad thing");
        assert!(reporter.has_error());
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(
            reporter.formatted_reports(),
            vec![
                "warning: a.thrift: (1, 1): unknown scope".to_string(),
                "error: a.thrift: (1, 1): bad thing".to_string(),
            ]
        );
    }

    #[test]
    fn load_error_lists_every_report() {
        let loc = Location::get("", "a.thrift").at(2, 3);
        let mut reporter = ErrorReporter::new();
        reporter.error(&loc, "first");
        reporter.error(&loc.at(4, 1), "second");
        let err = LoadError::from_reporter(reporter);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("a.thrift: (2, 3): first"));
        assert!(text.contains("a.thrift: (4, 1): second"));
        assert!(err.mentions("second"));
    }
}
