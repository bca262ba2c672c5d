//! Indentation-aware source text builder
//!
//! Shared by every source-emitting backend; produces 4-space indented
//! C-family text.

/// Builds indented source text line by line
#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    depth: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indent
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Append each line of a multi-line block at the current indent
    pub fn block(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            self.line(line);
        }
    }

    /// Blank separator line
    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Emit `header {` and increase the indent
    pub fn open_block(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    /// Decrease the indent and emit the closing brace (with optional suffix,
    /// e.g. `";"` for struct definitions)
    pub fn close_block_with(&mut self, suffix: &str) {
        debug_assert!(self.depth > 0, "unbalanced close_block");
        self.depth = self.depth.saturating_sub(1);
        self.line(format!("}}{suffix}"));
    }

    pub fn close_block(&mut self) {
        self.close_block_with("");
    }

    /// Finished source text
    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting() {
        let mut w = CodeWriter::new();
        w.line("#include <math.h>");
        w.blank();
        w.open_block("void f()");
        w.line("int x = 0;");
        w.open_block("if (x)");
        w.line("x += 1;");
        w.close_block();
        w.close_block();
        assert_eq!(
            w.finish(),
            "#include <math.h>\n\nvoid f() {\n    int x = 0;\n    if (x) {\n        x += 1;\n    }\n}\n"
        );
    }

    #[test]
    fn test_block_reindents_multiline_text() {
        let mut w = CodeWriter::new();
        w.open_block("kernel");
        w.block("a;\nb;");
        w.close_block();
        assert_eq!(w.finish(), "kernel {\n    a;\n    b;\n}\n");
    }
}
