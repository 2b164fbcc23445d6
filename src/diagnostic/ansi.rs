use crate::ast::{SourceMap, Span};
use super::{Diagnostic, Label, Severity};

/// Renders diagnostics for a terminal, optionally with ANSI colour.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn accent(&self, severity: &Severity, s: &str) -> String {
        match severity {
            Severity::Error => self.paint("1;31", s),
            Severity::Warning => self.paint("1;33", s),
        }
    }

    fn blue(&self, s: &str) -> String {
        self.paint("34", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let severity = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let label = match d.code {
            Some(code) => format!("{severity}[{code}]"),
            None => severity.to_string(),
        };
        let mut out = format!("{}: {}\n", self.accent(&d.severity, &label), self.bold(&d.message));

        if let Some(source) = &d.source {
            let map = SourceMap::new(source);
            if let Some(primary) = d.labels.iter().find(|l| l.is_primary) {
                self.snippet(&mut out, &map, source, primary, &d.severity);
            }
            for secondary in d.labels.iter().filter(|l| !l.is_primary) {
                let (line, col) = map.lookup(secondary.span.start);
                out.push_str(&format!(
                    "  {} {} (line {line}, column {col})\n",
                    self.dim("="),
                    secondary.message
                ));
            }
        } else {
            for secondary in d.labels.iter().filter(|l| !l.is_primary && !l.message.is_empty()) {
                out.push_str(&format!("  {} {}\n", self.dim("="), secondary.message));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }
        out
    }

    fn snippet(&self, out: &mut String, map: &SourceMap, source: &str, label: &Label, severity: &Severity) {
        let (line, col) = map.lookup(label.span.start);
        let text = map.line_text(source, line);
        let width = line.to_string().len();
        let pad = " ".repeat(width);
        let bar = self.blue("|");

        out.push_str(&format!("{pad}{} line {line}, column {col}\n", self.blue("-->")));
        out.push_str(&format!("{pad} {bar}\n"));
        out.push_str(&format!("{} {bar} {text}\n", self.blue(&format!("{line:>width$}"))));

        let underline = self.accent(severity, &"^".repeat(caret_width(label.span, text, col)));
        let indent = " ".repeat(col.saturating_sub(1));
        if label.message.is_empty() {
            out.push_str(&format!("{pad} {bar} {indent}{underline}\n"));
        } else {
            let message = self.accent(severity, &label.message);
            out.push_str(&format!("{pad} {bar} {indent}{underline} {message}\n"));
        }
    }
}

/// Carets never run past the end of the rendered line.
fn caret_width(span: Span, line_text: &str, col: usize) -> usize {
    let wanted = span.end.saturating_sub(span.start).max(1);
    let available = line_text.len().saturating_sub(col.saturating_sub(1)).max(1);
    wanted.min(available)
}
