//! Turning chat payloads into interpreter source.

use crate::error::PyvalErr;
use crate::error::Result;

/// How a payload reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Typed on one line: escape sequences are interpreted.
    #[default]
    Chat,
    /// Read from a file: passed to the interpreter untouched.
    Verbatim,
}

const PRINT_SHORTHAND: &str = "?(";

/// Convert a payload into source text.
///
/// In [`InputMode::Chat`], `\n` becomes a newline, `\\n` becomes a literal
/// backslash-n, `?(` expands to `print(`, and multi-line code gets a trailing
/// newline so block statements are terminated.
pub fn parse_input(payload: &str, mode: InputMode) -> String {
    if mode == InputMode::Verbatim {
        return payload.to_string();
    }

    let mut out = String::with_capacity(payload.len() + 8);
    let mut rest = payload;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("\\\\n") {
            out.push_str("\\n");
            rest = &rest[3..];
        } else if rest.starts_with("\\n") {
            out.push('\n');
            rest = &rest[2..];
        } else if rest.starts_with(PRINT_SHORTHAND) {
            out.push_str("print(");
            rest = &rest[PRINT_SHORTHAND.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }

    if out.contains('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Reject payloads with nothing to evaluate.
pub fn require_source(source: &str) -> Result<&str> {
    if source.trim().is_empty() {
        return Err(PyvalErr::EmptyInput("no code to evaluate."));
    }
    Ok(source)
}
