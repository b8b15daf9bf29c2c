// Truncate a &str to a byte budget at a char boundary (prefix)
#[inline]
pub fn take_bytes_at_char_boundary(s: &str, maxb: usize) -> &str {
    if s.len() <= maxb {
        return s;
    }
    let mut last_ok = 0;
    for (i, ch) in s.char_indices() {
        let nb = i + ch.len_utf8();
        if nb > maxb {
            break;
        }
        last_ok = nb;
    }
    &s[..last_ok]
}

/// Returns the prefix of `s` holding at most `max_chars` characters.
///
/// Chat limits are expressed in characters rather than bytes, so this is the
/// primitive every length ceiling in the output path is built on.
#[inline]
pub fn take_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Number of characters (not bytes) in `s`.
#[inline]
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split a comma-separated list, trimming entries and skipping empty ones
/// (`"a,,b "` yields `["a", "b"]`).
pub fn split_comma_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove spaces and tabs, the normalization applied before substring
/// filters so `import  os` and `import os` are treated alike.
pub fn strip_blanks(s: &str) -> String {
    s.chars().filter(|ch| !matches!(ch, ' ' | '\t')).collect()
}
