use std::fmt;

use colored::Colorize;

/// A position within a source file. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub location: SourceLocation,
    pub severity: Severity,
    pub message: String,
}

/// Collects diagnostics across compilation phases. Lex and parse errors
/// accumulate here and are flushed at phase boundaries; lowering warnings are
/// reported immediately by their emitters via [`DiagnosticEngine::report`].
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    emitted: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, location: SourceLocation, severity: Severity, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            location,
            severity,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(location, Severity::Warning, message);
    }

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.report(location, Severity::Error, message);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity >= Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Writes every diagnostic recorded since the last flush to stderr, in
    /// the order they were recorded.
    pub fn flush(&mut self) {
        for diagnostic in &self.diagnostics[self.emitted..] {
            let severity = match diagnostic.severity {
                Severity::Info => "info".cyan(),
                Severity::Warning => "warning".yellow(),
                Severity::Error => "error".red(),
                Severity::Fatal => "fatal".bright_red().bold(),
            };

            eprintln!("{}: {severity}: {}", diagnostic.location, diagnostic.message);
        }

        self.emitted = self.diagnostics.len();
    }
}

/// Reports an unrecoverable condition and aborts the process. Reserved for
/// compiler bugs (pass invariant violations) and output I/O failures.
pub fn report_fatal_error(message: &str) -> ! {
    eprintln!("{}: {message}", "fatal".bright_red().bold());
    std::process::exit(1);
}
