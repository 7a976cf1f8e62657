#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use molt_core::Diagnostic;

/// Render collected diagnostics as one `path:line:col: KIND: message` line
/// each, resolving spans against the sources that produced them.
pub fn render_diagnostics(diags: &[Diagnostic], sources: &HashMap<PathBuf, String>) -> String {
    let empty = String::new();
    diags
        .iter()
        .map(|d| {
            let source = sources.get(&d.path).unwrap_or(&empty);
            d.render(source)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_ast::span_between;
    use molt_core::DiagnosticKind;

    #[test]
    fn diagnostics_render_one_line_each() {
        let mut sources = HashMap::new();
        sources.insert(PathBuf::from("a.py"), "x = 1\ny = 2\n".to_string());

        let diags = vec![
            Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                "a.py",
                Some(span_between(6, 7)),
                "first",
            ),
            Diagnostic::new(DiagnosticKind::Io, "b.py", None, "second"),
        ];

        let rendered = render_diagnostics(&diags, &sources);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "a.py:2:1: E_TYPE_MISMATCH: first");
        assert_eq!(lines[1], "b.py:1:1: E_IO: second");
    }
}
