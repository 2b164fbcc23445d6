//! User-facing reports for compile and runtime failures.

pub mod ansi;

use crate::ast::Span;
use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable identifier such as `FS-P003`, when the failure has one.
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: String) -> Self {
        Diagnostic {
            severity,
            code: None,
            message,
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Error, message.into())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Warning, message.into())
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    fn label(mut self, span: Span, message: impl Into<String>, is_primary: bool) -> Self {
        self.labels.push(Label { span, message: message.into(), is_primary });
        self
    }

    pub fn with_span(self, span: Span, label: impl Into<String>) -> Self {
        self.label(span, label, true)
    }

    pub fn with_secondary_span(self, span: Span, label: impl Into<String>) -> Self {
        self.label(span, label, false)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let width = e.snippet.chars().next().map_or(1, char::len_utf8);
        let span = Span { start: e.position, end: e.position + width };
        let d = Diagnostic::error(format!("unrecognised input '{}'", e.snippet))
            .with_span(span, "not part of the language");
        match e.suggestion.as_str() {
            "" => d,
            hint => d.with_suggestion(hint),
        }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        match e {
            CompileError::Lex(lex) => lex.into(),
            CompileError::Parse(parse) => parse.into(),
            CompileError::Semantic { message, span, enclosing: None } => {
                Diagnostic::error(message).with_span(*span, "here")
            }
            CompileError::Semantic { message, span, enclosing: Some(outer) } => Diagnostic::error(message)
                .with_span(*span, "here")
                .with_secondary_span(*outer, "inside this when body"),
        }
    }
}

impl From<&EngineError> for Diagnostic {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Compile(inner) => inner.into(),
            EngineError::TriggerLimitExceeded { .. } => Diagnostic::error(e.to_string())
                .with_note("a when body must finish within one tick"),
            other => Diagnostic::error(other.to_string()),
        }
    }
}
