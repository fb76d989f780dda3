//! Reader for Java `.properties` side-files.
//!
//! Supported syntax: `=`, `:` or whitespace between key and value, `#`/`!` comment
//! lines, backslash line continuation, and the escapes `\t \n \r \f \\ \uXXXX` (any other
//! escaped character stands for itself).

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PropertiesError {
    #[error("line {line}: malformed \\uXXXX escape")]
    InvalidUnicodeEscape { line: usize },
}

/// Parse `.properties` text. Later duplicates of a key win.
///
/// # Errors
/// Returns `PropertiesError` on a malformed unicode escape.
pub fn parse(input: &str) -> Result<BTreeMap<String, String>, PropertiesError> {
    let mut out = BTreeMap::new();
    let mut lines = input.lines().enumerate();

    while let Some((idx, raw)) = lines.next() {
        let line = idx + 1;
        let first = raw.trim_start_matches(is_blank);
        if first.is_empty() || first.starts_with('#') || first.starts_with('!') {
            continue;
        }

        let mut logical = first.to_owned();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }

        let (key, value) = split_key_value(&logical);
        out.insert(unescape(key, line)?, unescape(value, line)?);
    }
    Ok(out)
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

/// Odd number of trailing backslashes.
fn ends_with_continuation(s: &str) -> bool {
    s.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_key_value(s: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = s.len();
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' || is_blank(c) {
            key_end = i;
            break;
        }
    }

    let key = &s[..key_end];
    let mut rest = s[key_end..].trim_start_matches(is_blank);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches(is_blank);
    }
    (key, rest)
}

fn unescape(s: &str, line: usize) -> Result<String, PropertiesError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = (hex.len() == 4)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                    .ok_or(PropertiesError::InvalidUnicodeEscape { line })?;
                out.push(decoded);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn get<'a>(m: &'a BTreeMap<String, String>, k: &str) -> Option<&'a str> {
        m.get(k).map(String::as_str)
    }

    #[test]
    fn separators_and_comments() {
        let m = parse(
            "# comment\n\
             ! also a comment\n\
             \n\
             a=1\n\
             b : 2\n\
             c 3\n\
             d\n\
             e=\n\
             \x20\x20 f = spaced value  \n",
        )
        .unwrap();
        assert_eq!(get(&m, "a"), Some("1"));
        assert_eq!(get(&m, "b"), Some("2"));
        assert_eq!(get(&m, "c"), Some("3"));
        assert_eq!(get(&m, "d"), Some(""));
        assert_eq!(get(&m, "e"), Some(""));
        assert_eq!(get(&m, "f"), Some("spaced value  "));
        assert_eq!(m.len(), 6);
    }

    #[test]
    fn continuation_lines() {
        let m = parse("list = one, \\\n      two, \\\n      three\nnext=x\n").unwrap();
        assert_eq!(get(&m, "list"), Some("one, two, three"));
        assert_eq!(get(&m, "next"), Some("x"));
    }

    #[test]
    fn even_backslashes_do_not_continue() {
        let m = parse("path=c:\\\\\nother=y\n").unwrap();
        assert_eq!(get(&m, "path"), Some("c:\\"));
        assert_eq!(get(&m, "other"), Some("y"));
    }

    #[test]
    fn escapes_in_keys_and_values() {
        let m = parse("key\\ with\\:colon = tab\\there\\u00e9\\n\n").unwrap();
        assert_eq!(get(&m, "key with:colon"), Some("tab\there\u{e9}\n"));
    }

    #[test]
    fn crlf_input() {
        let m = parse("a=1\r\nb=2\r\n").unwrap();
        assert_eq!(get(&m, "a"), Some("1"));
        assert_eq!(get(&m, "b"), Some("2"));
    }

    #[test]
    fn later_duplicate_wins() {
        let m = parse("a=1\na=2\n").unwrap();
        assert_eq!(get(&m, "a"), Some("2"));
    }

    #[test]
    fn bad_unicode_escape_is_an_error() {
        assert_eq!(
            parse("ok=1\nbad=\\u12G4\n"),
            Err(PropertiesError::InvalidUnicodeEscape { line: 2 })
        );
        assert!(parse("short=\\u12").is_err());
    }
}
