//=====================================================
// File: diagnostics/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript front-end diagnostics
// Objective: Collect lexical, syntactic and semantic diagnostics with caret
//            rendering, spelling suggestions and bounded tracebacks
//=====================================================

use std::collections::VecDeque;
use std::fmt;

use crate::errors::ErrorCode;
use crate::tokenizer::Token;

//=====================================================
// Section 1.0 - Diagnostic Model
//=====================================================

/// Front-end error classes. Compilation, load and runtime failures are fatal
/// and travel as typed errors instead (see `crate::errors`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Syntactic,
    Semantic,
}

impl DiagnosticKind {
    pub fn code(self) -> ErrorCode {
        match self {
            DiagnosticKind::Lexical => ErrorCode::Lexical,
            DiagnosticKind::Syntactic => ErrorCode::Syntactic,
            DiagnosticKind::Semantic => ErrorCode::Semantic,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::Lexical => "lexical error",
            DiagnosticKind::Syntactic => "syntax error",
            DiagnosticKind::Semantic => "semantic error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// User-relative line (absolute line for library code).
    pub line: usize,
    pub column: usize,
    pub absolute_line: usize,
    pub in_stdlib: bool,
    pub source_line: String,
    pub quick_fix: Option<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn with_quick_fix(&mut self, fix: impl Into<String>) -> &mut Self {
        self.quick_fix = Some(fix.into());
        self
    }

    pub fn with_suggestion(&mut self, suggestion: Option<String>) -> &mut Self {
        self.suggestion = suggestion;
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.kind.code().as_str()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}[{}]: {}", self.kind.label(), self.code_str(), self.message)?;
        if self.in_stdlib {
            writeln!(f, "  --> stdlib line {}, column {}", self.line, self.column)?;
        } else {
            writeln!(f, "  --> line {}, column {}", self.line, self.column)?;
        }
        let gutter = self.line.to_string();
        let pad = " ".repeat(gutter.len());
        writeln!(f, "{pad} |")?;
        writeln!(f, "{gutter} | {}", self.source_line)?;
        write!(
            f,
            "{pad} | {}^",
            " ".repeat(self.column.saturating_sub(1))
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n{pad} = did you mean `{suggestion}`?")?;
        }
        if let Some(fix) = &self.quick_fix {
            write!(f, "\n{pad} = help: {fix}")?;
        }
        Ok(())
    }
}

//=====================================================
// Section 2.0 - Diagnostic Collector
//=====================================================

/// Sticky-flag diagnostic sink shared by the tokenizer and the parser.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    source_lines: Vec<String>,
    stdlib_finish_line: usize,
    entries: Vec<Diagnostic>,
    encountered_error: bool,
}

impl Diagnostics {
    pub fn new(source: &str) -> Self {
        Self {
            source_lines: source.lines().map(str::to_string).collect(),
            stdlib_finish_line: 0,
            entries: Vec::new(),
            encountered_error: false,
        }
    }

    pub fn set_stdlib_finish_line(&mut self, line: usize) {
        self.stdlib_finish_line = line;
    }

    pub fn stdlib_finish_line(&self) -> usize {
        self.stdlib_finish_line
    }

    /// Register a diagnostic anchored at `token`.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        token: &Token,
        message: impl Into<String>,
    ) -> &mut Diagnostic {
        self.report_at(kind, token.absolute_line, token.column, message)
    }

    /// Register a diagnostic at an absolute line/column of the combined text.
    pub fn report_at(
        &mut self,
        kind: DiagnosticKind,
        absolute_line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> &mut Diagnostic {
        let message = message.into();
        tracing::debug!(line = absolute_line, column, %message, "diagnostic registered");
        let in_stdlib = absolute_line < self.stdlib_finish_line;
        let line = if absolute_line > self.stdlib_finish_line && self.stdlib_finish_line > 0 {
            absolute_line - self.stdlib_finish_line
        } else {
            absolute_line
        };
        let source_line = self
            .source_lines
            .get(absolute_line.saturating_sub(1))
            .cloned()
            .unwrap_or_default();
        self.encountered_error = true;
        self.entries.push(Diagnostic {
            kind,
            message,
            line,
            column,
            absolute_line,
            in_stdlib,
            source_line,
            quick_fix: None,
            suggestion: None,
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    pub fn has_errors(&self) -> bool {
        self.encountered_error
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    /// Render every diagnostic, separated by blank lines.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

//=====================================================
// Section 3.0 - Spelling Suggestions
//=====================================================

/// Suggestions are only offered below this edit distance.
pub const SUGGESTION_THRESHOLD: usize = 3;

pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Closest candidate to `target`, if any is within the suggestion threshold.
pub fn closest_match<'a, I>(target: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|candidate| *candidate != target)
        .map(|candidate| (edit_distance(target, candidate), candidate))
        .filter(|(distance, _)| *distance < SUGGESTION_THRESHOLD)
        .min_by(|left, right| left.0.cmp(&right.0).then_with(|| left.1.cmp(right.1)))
        .map(|(_, candidate)| candidate.to_string())
}

//=====================================================
// Section 4.0 - Traceback
//=====================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: usize,
    pub context: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.context)
    }
}

/// Ring buffer of visited source lines; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct Traceback {
    capacity: usize,
    entries: VecDeque<TraceEntry>,
}

pub const DEFAULT_TRACEBACK_DEPTH: usize = 32;

impl Default for Traceback {
    fn default() -> Self {
        Self::new(DEFAULT_TRACEBACK_DEPTH)
    }
}

impl Traceback {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: usize, context: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            line,
            context: context.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries oldest-first, the order they are displayed in.
    pub fn chronological(&self) -> Vec<TraceEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries most-recent-first.
    pub fn most_recent_first(&self) -> Vec<TraceEntry> {
        self.entries.iter().rev().cloned().collect()
    }
}

/// Render a traceback snapshot for logs and error messages.
pub fn render_trace(entries: &[TraceEntry]) -> String {
    if entries.is_empty() {
        return "  (no traceback)".to_string();
    }
    entries
        .iter()
        .map(|entry| format!("  at {entry}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_counts_single_edits() {
        assert_eq!(edit_distance("count", "count"), 0);
        assert_eq!(edit_distance("count", "cont"), 1);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn closest_match_respects_threshold() {
        let names = ["total", "counter", "index"];
        assert_eq!(
            closest_match("countr", names.iter().copied()),
            Some("counter".to_string())
        );
        assert_eq!(closest_match("zebra", names.iter().copied()), None);
    }

    #[test]
    fn traceback_evicts_oldest_entries() {
        let mut trace = Traceback::new(2);
        trace.push(1, "a");
        trace.push(2, "b");
        trace.push(3, "c");
        let lines: Vec<usize> = trace.chronological().iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert_eq!(trace.most_recent_first()[0].line, 3);
    }

    #[test]
    fn caret_points_at_column() {
        let mut diagnostics = Diagnostics::new("int x = y;");
        diagnostics.report_at(DiagnosticKind::Semantic, 1, 9, "unknown identifier 'y'");
        let rendered = diagnostics.render();
        assert!(rendered.contains("1 | int x = y;"));
        assert!(rendered.contains("  |         ^"));
    }
}

//=====================================================
// End of file
//=====================================================
