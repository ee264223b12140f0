//! Best-effort JavaScript minifier for attachment uploads.
//!
//! Conservative by construction: only whole-line `//` comments, `/* ... */`
//! block comments, blank lines and surrounding whitespace are removed, so the
//! output stays valid for any input the stripper understands. Anything it
//! cannot safely handle is reported as a typed error and the caller uploads
//! the expanded source instead.

use regex::Regex;
use std::sync::LazyLock;

/// Matches lines that contain only a `//` comment. Mid-line comments are
/// kept: `//` may sit inside a string or a regex literal.
static RE_LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*//").unwrap());
static RE_BLANK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum MinifyError {
    #[error("unterminated block comment starting at byte {offset}")]
    UnterminatedBlockComment { offset: usize },
}

/// Strip comments and collapse whitespace, keeping one statement per line.
pub fn minify_js(source: &str) -> Result<String, MinifyError> {
    let without_blocks = strip_block_comments(source)?;
    let mut out = String::with_capacity(without_blocks.len());
    for line in without_blocks.lines() {
        if RE_LINE_COMMENT.is_match(line) || RE_BLANK.is_match(line) {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim());
    }
    Ok(out)
}

/// Remove `/* ... */` spans. Comment openers inside single- or double-quoted
/// strings are left alone; an opener with no closer is an error rather than a
/// silently truncated output.
fn strip_block_comments(source: &str) -> Result<String, MinifyError> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();
    let mut quote: Option<char> = None;
    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '/' && matches!(chars.peek(), Some((_, '*'))) => {
                match source[i + 2..].find("*/") {
                    Some(offset) => {
                        let end = i + 2 + offset + 2;
                        while chars.next_if(|&(j, _)| j < end).is_some() {}
                    }
                    None => return Err(MinifyError::UnterminatedBlockComment { offset: i }),
                }
            }
            None => out.push(c),
        }
    }
    Ok(out)
}
