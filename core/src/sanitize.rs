//! Bounded renderings of interpreter output.
//!
//! Chat gets a single line: newlines are escaped and the text is cut to the
//! configured ceilings. Pastes keep real newlines and mark every cut.

use pyval_utils_string::char_len;
use pyval_utils_string::take_chars;

/// Ceilings applied to chat output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_lines: usize,
    pub max_line_chars: usize,
    pub max_total_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_lines: 65,
            max_line_chars: 240,
            max_total_chars: 160,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeOutput {
    pub text: String,
    /// Set when any ceiling cut the text.
    pub truncated: bool,
}

/// Escape and cut `raw` for inline display.
pub fn sanitize(raw: &str, limits: &OutputLimits) -> SafeOutput {
    let mut truncated = false;

    let mut lines: Vec<&str> = raw.split('\n').collect();
    if lines.len() > limits.max_lines {
        lines.truncate(limits.max_lines);
        truncated = true;
    }

    let mut rendered = Vec::with_capacity(lines.len());
    for line in lines {
        let escaped = escape_line(line);
        if char_len(&escaped) > limits.max_line_chars {
            truncated = true;
            rendered.push(take_chars(&escaped, limits.max_line_chars).to_string());
        } else {
            rendered.push(escaped);
        }
    }

    let mut text = rendered.join("\\n");
    if char_len(&text) > limits.max_total_chars {
        truncated = true;
        text = take_chars(&text, limits.max_total_chars).to_string();
    }

    SafeOutput { text, truncated }
}

/// Raw mode: no escaping, no ceilings.
pub fn raw(raw: &str) -> SafeOutput {
    SafeOutput {
        text: raw.to_string(),
        truncated: false,
    }
}

/// Multi-line rendering for a paste document.
pub fn paste_output(raw: &str, max_lines: usize, max_line_chars: usize) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let too_many = lines.len() > max_lines;

    let mut out: Vec<String> = lines
        .into_iter()
        .take(max_lines)
        .map(|line| {
            let line = strip_control(line);
            if char_len(&line) > max_line_chars {
                format!(
                    "{} ..truncated ({max_line_chars} chars)",
                    take_chars(&line, max_line_chars)
                )
            } else {
                line
            }
        })
        .collect();
    if too_many {
        out.push(format!("..truncated at {max_lines} lines."));
    }
    out.join("\n")
}

/// First `max_chars` characters of an already sanitized text.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    take_chars(text, max_chars)
}

fn escape_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn strip_control(line: &str) -> String {
    line.chars()
        .filter(|c| *c == '\t' || !c.is_control())
        .collect()
}
