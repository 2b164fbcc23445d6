/// Byte offset to line/column translation for one source unit.
///
/// Lines can be numbered from any base so a command typed on line 40 of a
/// terminal session reports line 40, not line 1.
#[derive(Debug, Clone)]
pub struct SourceMap {
    line_starts: Vec<usize>,
    first_line: usize,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        SourceMap::starting_at(source, 1)
    }

    pub fn starting_at(source: &str, first_line: usize) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts, first_line: first_line.max(1) }
    }

    /// Index into `line_starts` of the line holding `offset`.
    fn line_index(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset).saturating_sub(1)
    }

    /// Reported line number of `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_index(offset) + self.first_line
    }

    /// (line, column), both 1-based. The line is relative to the source, so
    /// it can be passed back to [`SourceMap::line_text`].
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let index = self.line_index(offset);
        (index + 1, offset - self.line_starts[index] + 1)
    }

    /// Text of the 1-based source line without its terminator.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).map_or(source.len(), |&next| next - 1);
        source.get(start..end).unwrap_or("").trim_end_matches('\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_within_a_statement() {
        let src = "set x to 1.";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(4), (1, 5));
        assert_eq!(sm.lookup(11), (1, 12));
    }

    #[test]
    fn newline_belongs_to_the_line_it_ends() {
        let src = "set a to 1.\nset b to 2.\r\nprint a.";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(11), (1, 12));
        assert_eq!(sm.lookup(12), (2, 1));
        assert_eq!(sm.lookup(25), (3, 1));
        assert_eq!(sm.line_text(src, 2), "set b to 2.");
        assert_eq!(sm.line_text(src, 3), "print a.");
    }

    #[test]
    fn line_text_outside_the_source_is_empty() {
        let src = "print 1.\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 1), "print 1.");
        assert_eq!(sm.line_text(src, 2), "");
        assert_eq!(sm.line_text(src, 9), "");
    }

    #[test]
    fn empty_source_has_one_line() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_text("", 1), "");
    }

    #[test]
    fn reported_lines_start_at_the_base() {
        let sm = SourceMap::starting_at("print 1.\nprint 2.", 40);
        assert_eq!(sm.line_of(0), 40);
        assert_eq!(sm.line_of(9), 41);
        assert_eq!(sm.lookup(9), (2, 1));
    }
}
