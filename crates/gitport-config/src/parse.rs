//! Event parser for git's INI dialect, preserving raw text spans so
//! the writer can round-trip untouched lines byte for byte.

use bstr::{BString, ByteSlice};

use crate::ConfigError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// A parsed event, carrying the raw line(s) it came from.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// `[section]` or `[section "subsection"]`.
    SectionHeader {
        raw: BString,
        /// Lowercased section name.
        section: BString,
        /// Case-preserved subsection.
        subsection: Option<BString>,
    },
    /// A `key = value` entry (value is None for bare boolean keys).
    Entry {
        raw: BString,
        /// Lowercased key name.
        key: BString,
        value: Option<BString>,
    },
    Comment(BString),
    Blank(BString),
}

/// Parse config bytes into an event stream.
pub fn parse_config(input: &[u8], filename: &str) -> Result<Vec<ConfigEvent>, ConfigError> {
    let mut events = Vec::new();
    let mut pos = 0;
    let mut line = 1usize;

    if input.starts_with(UTF8_BOM) {
        pos = UTF8_BOM.len();
    }

    while pos < input.len() {
        let line_start = pos;
        // Leading whitespace belongs to the following event's raw span.
        let mut cursor = pos;
        while cursor < input.len() && (input[cursor] == b' ' || input[cursor] == b'\t') {
            cursor += 1;
        }

        if cursor >= input.len() {
            events.push(ConfigEvent::Blank(BString::from(&input[line_start..])));
            break;
        }

        match input[cursor] {
            b'\n' => {
                events.push(ConfigEvent::Blank(BString::from(&input[line_start..=cursor])));
                pos = cursor + 1;
                line += 1;
            }
            b'\r' => {
                let end = if input.get(cursor + 1) == Some(&b'\n') {
                    cursor + 2
                } else {
                    cursor + 1
                };
                events.push(ConfigEvent::Blank(BString::from(&input[line_start..end])));
                pos = end;
                line += 1;
            }
            b'#' | b';' => {
                let end = line_end(input, cursor);
                events.push(ConfigEvent::Comment(BString::from(&input[line_start..end])));
                pos = end;
                line += 1;
            }
            b'[' => {
                let (section, subsection, end) =
                    parse_section_header(input, cursor, filename, line)?;
                events.push(ConfigEvent::SectionHeader {
                    raw: BString::from(&input[line_start..end]),
                    section,
                    subsection,
                });
                pos = end;
                line += 1;
            }
            _ => {
                let (key, value, end, lines) = parse_key_value(input, cursor, filename, line)?;
                events.push(ConfigEvent::Entry {
                    raw: BString::from(&input[line_start..end]),
                    key,
                    value,
                });
                pos = end;
                line += lines;
            }
        }
    }

    Ok(events)
}

fn line_end(input: &[u8], from: usize) -> usize {
    input[from..]
        .find_byte(b'\n')
        .map(|p| from + p + 1)
        .unwrap_or(input.len())
}

/// Parse `[section]` or `[section "sub section"]`, returning the
/// position just past the line's newline.
fn parse_section_header(
    input: &[u8],
    open: usize,
    filename: &str,
    line: usize,
) -> Result<(BString, Option<BString>, usize), ConfigError> {
    let close = input[open..]
        .find_byte(b']')
        .map(|p| open + p)
        .ok_or_else(|| ConfigError::Syntax {
            file: filename.to_string(),
            line,
            reason: "unterminated section header".into(),
        })?;

    let inner = &input[open + 1..close];
    let (section, subsection) = match inner.find_byte(b'"') {
        Some(quote) => {
            let section = inner[..quote].trim();
            let rest = &inner[quote + 1..];
            let end_quote = rest.rfind_byte(b'"').ok_or_else(|| ConfigError::Syntax {
                file: filename.to_string(),
                line,
                reason: "unterminated subsection quote".into(),
            })?;
            let mut sub = Vec::with_capacity(end_quote);
            let mut i = 0;
            while i < end_quote {
                if rest[i] == b'\\' && i + 1 < end_quote {
                    sub.push(rest[i + 1]);
                    i += 2;
                } else {
                    sub.push(rest[i]);
                    i += 1;
                }
            }
            (section, Some(BString::from(sub)))
        }
        None => (inner.trim(), None),
    };

    if section.is_empty()
        || !section
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
    {
        return Err(ConfigError::Syntax {
            file: filename.to_string(),
            line,
            reason: format!("invalid section name {:?}", section.as_bstr()),
        });
    }

    Ok((
        BString::from(section.to_ascii_lowercase()),
        subsection,
        line_end(input, close),
    ))
}

/// Parse one `key = value` entry; handles quotes, escapes, trailing
/// comments, and backslash-newline continuations. Returns
/// `(key, value, end_position, lines_consumed)`.
fn parse_key_value(
    input: &[u8],
    start: usize,
    filename: &str,
    line: usize,
) -> Result<(BString, Option<BString>, usize, usize), ConfigError> {
    let mut pos = start;

    // Key: alphanumeric and '-', must start with a letter.
    let key_start = pos;
    while pos < input.len() && (input[pos].is_ascii_alphanumeric() || input[pos] == b'-') {
        pos += 1;
    }
    let key = &input[key_start..pos];
    if key.is_empty() || !key[0].is_ascii_alphabetic() {
        return Err(ConfigError::Syntax {
            file: filename.to_string(),
            line,
            reason: format!("invalid key at {:?}", input[key_start..].as_bstr().get(..16)),
        });
    }

    while pos < input.len() && (input[pos] == b' ' || input[pos] == b'\t') {
        pos += 1;
    }

    // Bare key (no '=') is boolean true.
    if pos >= input.len() || input[pos] == b'\n' || input[pos] == b'#' || input[pos] == b';' {
        let end = line_end(input, pos);
        return Ok((BString::from(key.to_ascii_lowercase()), None, end, 1));
    }
    if input[pos] != b'=' {
        return Err(ConfigError::Syntax {
            file: filename.to_string(),
            line,
            reason: "expected '=' after key".into(),
        });
    }
    pos += 1;
    while pos < input.len() && (input[pos] == b' ' || input[pos] == b'\t') {
        pos += 1;
    }

    let mut value = Vec::new();
    let mut in_quotes = false;
    let mut lines = 1usize;
    let mut trailing_ws = 0usize; // unquoted trailing whitespace to trim

    loop {
        if pos >= input.len() {
            break;
        }
        let b = input[pos];
        match b {
            b'\n' => {
                pos += 1;
                break;
            }
            b'\\' => {
                let next = input.get(pos + 1).copied();
                match next {
                    Some(b'\n') => {
                        // Line continuation.
                        pos += 2;
                        lines += 1;
                        continue;
                    }
                    Some(b'n') => value.push(b'\n'),
                    Some(b't') => value.push(b'\t'),
                    Some(b'b') => value.push(0x08),
                    Some(b'\\') => value.push(b'\\'),
                    Some(b'"') => value.push(b'"'),
                    _ => {
                        return Err(ConfigError::Syntax {
                            file: filename.to_string(),
                            line: line + lines - 1,
                            reason: "bad escape in value".into(),
                        })
                    }
                }
                trailing_ws = 0;
                pos += 2;
            }
            b'"' => {
                in_quotes = !in_quotes;
                trailing_ws = 0;
                pos += 1;
            }
            b'#' | b';' if !in_quotes => {
                pos = line_end(input, pos);
                break;
            }
            b' ' | b'\t' if !in_quotes => {
                value.push(b);
                trailing_ws += 1;
                pos += 1;
            }
            b'\r' if input.get(pos + 1) == Some(&b'\n') && !in_quotes => {
                pos += 2;
                break;
            }
            _ => {
                value.push(b);
                trailing_ws = 0;
                pos += 1;
            }
        }
    }

    if in_quotes {
        return Err(ConfigError::Syntax {
            file: filename.to_string(),
            line: line + lines - 1,
            reason: "unterminated quote in value".into(),
        });
    }

    value.truncate(value.len() - trailing_ws);

    Ok((
        BString::from(key.to_ascii_lowercase()),
        Some(BString::from(value)),
        pos,
        lines,
    ))
}
