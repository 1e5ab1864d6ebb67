//! Layered `.gitignore` evaluation.
//!
//! Patterns are collected root-down: `info/exclude` first, then each
//! directory's `.gitignore`, later files refining earlier ones. Within
//! the list the last match wins, with one exception inherited from git:
//! a file cannot be re-included while a parent directory is ignored.

use std::path::Path;

use bstr::{BStr, BString, ByteSlice};
use gitport_utils::wildmatch::wildmatch;

use crate::IndexError;

/// One parsed ignore pattern.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    /// The pattern body (negation/anchoring markers stripped).
    pattern: BString,
    negated: bool,
    /// Trailing `/`: the pattern only matches directories.
    directory_only: bool,
    /// Contains an interior `/`: matched against the full relative path.
    anchored: bool,
    /// Directory the source file lives in, relative to the root
    /// (empty at the root, `"sub/"` for `sub/.gitignore`).
    base: BString,
}

/// The layered pattern stack.
#[derive(Debug, Clone, Default)]
pub struct IgnoreStack {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and append the patterns of one ignore file whose directory
    /// is `base` (root-relative, empty for the root).
    pub fn add_patterns(&mut self, content: &[u8], base: &BStr) {
        for line in content.lines() {
            if let Some(pattern) = parse_line(line, base) {
                self.patterns.push(pattern);
            }
        }
    }

    /// Load one ignore file from disk; missing files are fine.
    pub fn add_file(&mut self, path: &Path, base: &BStr) -> Result<(), IndexError> {
        match std::fs::read(path) {
            Ok(content) => {
                self.add_patterns(&content, base);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IndexError::Io(e)),
        }
    }

    /// Is a root-relative path ignored? The `.git` directory always is;
    /// the root itself never is.
    pub fn is_ignored(&self, path: &BStr, is_dir: bool) -> bool {
        if path.is_empty() {
            return false;
        }
        if path == ".git" || path.starts_with(b".git/") || path.find(b"/.git/").is_some() {
            return true;
        }

        // An ignored ancestor directory ignores everything beneath it,
        // negations notwithstanding.
        let bytes = path.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'/' && self.matches(bytes[..i].as_bstr(), true) {
                return true;
            }
        }

        self.matches(path, is_dir)
    }

    /// Last-match-wins evaluation of the raw pattern list.
    fn matches(&self, path: &BStr, is_dir: bool) -> bool {
        let mut ignored = false;
        for pat in &self.patterns {
            if pat.directory_only && !is_dir {
                continue;
            }
            if pattern_matches(pat, path) {
                ignored = !pat.negated;
            }
        }
        ignored
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn parse_line(line: &[u8], base: &BStr) -> Option<IgnorePattern> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    // Trailing unescaped spaces are stripped.
    let mut end = line.len();
    while end > 0 && line[end - 1] == b' ' && (end < 2 || line[end - 2] != b'\\') {
        end -= 1;
    }
    let line = &line[..end];

    if line.is_empty() || line[0] == b'#' {
        return None;
    }

    let (negated, line) = match line.strip_prefix(b"!") {
        Some(rest) => (true, rest),
        None if line.starts_with(b"\\!") || line.starts_with(b"\\#") => (false, &line[1..]),
        None => (false, line),
    };
    build(negated, line, base)
}

fn build(negated: bool, line: &[u8], base: &BStr) -> Option<IgnorePattern> {
    let (directory_only, line) = match line.strip_suffix(b"/") {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    if line.is_empty() {
        return None;
    }

    // A leading slash anchors; so does any interior slash.
    let (line, leading_slash) = match line.strip_prefix(b"/") {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    let anchored = leading_slash || line.contains(&b'/');

    Some(IgnorePattern {
        pattern: BString::from(line),
        negated,
        directory_only,
        anchored,
        base: BString::from(base.as_bytes()),
    })
}

fn pattern_matches(pat: &IgnorePattern, path: &BStr) -> bool {
    // Scope the path to the pattern's base directory.
    let rel: &[u8] = if pat.base.is_empty() {
        path.as_bytes()
    } else {
        match path.as_bytes().strip_prefix(pat.base.as_slice()) {
            Some(rest) => rest,
            None => return false,
        }
    };

    if pat.anchored {
        wildmatch(&pat.pattern, rel)
    } else {
        // Unanchored patterns match the basename at any depth.
        let basename = match rel.rfind_byte(b'/') {
            Some(pos) => &rel[pos + 1..],
            None => rel,
        };
        wildmatch(&pat.pattern, basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(patterns: &str) -> IgnoreStack {
        let mut s = IgnoreStack::new();
        s.add_patterns(patterns.as_bytes(), BStr::new(""));
        s
    }

    fn ignored(s: &IgnoreStack, path: &str) -> bool {
        s.is_ignored(BStr::new(path), false)
    }

    #[test]
    fn basename_patterns_match_any_depth() {
        let s = stack("*.log\n");
        assert!(ignored(&s, "debug.log"));
        assert!(ignored(&s, "deep/nested/debug.log"));
        assert!(!ignored(&s, "debug.txt"));
    }

    #[test]
    fn anchored_patterns_match_from_root() {
        let s = stack("/build\nsrc/gen.rs\n");
        assert!(ignored(&s, "build"));
        assert!(!ignored(&s, "sub/build"));
        assert!(ignored(&s, "src/gen.rs"));
        assert!(!ignored(&s, "other/src/gen.rs"));
    }

    #[test]
    fn negation_reincludes() {
        let s = stack("*.log\n!keep.log\n");
        assert!(ignored(&s, "other.log"));
        assert!(!ignored(&s, "keep.log"));
    }

    #[test]
    fn negation_cannot_escape_ignored_parent() {
        // P7: a file under an ignored directory stays ignored even when
        // a negated pattern matches the file itself.
        let s = stack("logs/\n!logs/keep.log\n");
        assert!(s.is_ignored(BStr::new("logs"), true));
        assert!(ignored(&s, "logs/keep.log"));
    }

    #[test]
    fn directory_only_patterns() {
        let s = stack("cache/\n");
        assert!(s.is_ignored(BStr::new("cache"), true));
        assert!(!s.is_ignored(BStr::new("cache"), false));
        // Files below an ignored directory are ignored.
        assert!(ignored(&s, "cache/data.bin"));
    }

    #[test]
    fn git_dir_always_ignored_root_never() {
        let s = stack("");
        assert!(s.is_ignored(BStr::new(".git"), true));
        assert!(ignored(&s, ".git/config"));
        assert!(ignored(&s, "sub/.git/config"));
        assert!(!s.is_ignored(BStr::new(""), true));
    }

    #[test]
    fn later_files_refine_earlier_ones() {
        let mut s = stack("*.tmp\n");
        // A nested .gitignore re-includes within its directory.
        s.add_patterns(b"!important.tmp\n", BStr::new("sub/"));
        assert!(ignored(&s, "top.tmp"));
        assert!(ignored(&s, "sub/other.tmp"));
        assert!(!ignored(&s, "sub/important.tmp"));
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let s = stack("# comment\n\n*.o\n");
        assert_eq!(s.len(), 1);
        assert!(ignored(&s, "a.o"));
    }

    #[test]
    fn double_star_patterns() {
        let s = stack("**/generated\ndocs/**\n");
        assert!(ignored(&s, "generated"));
        assert!(ignored(&s, "a/b/generated"));
        assert!(ignored(&s, "docs/api/index.html"));
    }
}
