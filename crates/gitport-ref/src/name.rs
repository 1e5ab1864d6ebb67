//! Ref-name grammar validation and suggestion synthesis.
//!
//! The rules follow `git check-ref-format`: no component may begin with
//! `.` or end with `.lock`, names cannot contain `..`, ASCII control
//! characters, space, `~`, `^`, `:`, `?`, `*`, `[`, `\`, `@{`, or
//! consecutive/trailing slashes, and the bare name `@` is reserved.

use std::fmt;

use crate::RefError;

/// A validated reference name (e.g. `refs/heads/main`, `HEAD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    /// Validate and wrap a ref name.
    pub fn new(name: impl Into<String>) -> Result<Self, RefError> {
        let name = name.into();
        if is_valid(&name) {
            Ok(Self(name))
        } else {
            let suggestion = sanitize(&name);
            Err(RefError::InvalidName { name, suggestion })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component (`main` for `refs/heads/main`).
    pub fn shorthand(&self) -> &str {
        self.0
            .strip_prefix("refs/heads/")
            .or_else(|| self.0.strip_prefix("refs/tags/"))
            .or_else(|| self.0.strip_prefix("refs/remotes/"))
            .unwrap_or(&self.0)
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with("refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with("refs/tags/")
    }

    /// Pseudo-refs live at the top of the gitdir (HEAD, ORIG_HEAD, …).
    pub fn is_pseudo(&self) -> bool {
        !self.0.contains('/')
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a name against the ref grammar.
pub fn is_valid(name: &str) -> bool {
    if name.is_empty() || name == "@" {
        return false;
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return false;
    }
    if name.ends_with('.') || name.contains("..") || name.contains("@{") {
        return false;
    }
    for component in name.split('/') {
        if component.is_empty() || component.starts_with('.') || component.ends_with(".lock") {
            return false;
        }
    }
    !name.bytes().any(|b| {
        b < 0x20
            || b == 0x7f
            || matches!(b, b' ' | b'~' | b'^' | b':' | b'?' | b'*' | b'[' | b'\\')
    })
}

/// Synthesise a valid name from an invalid one by replacing offending
/// bytes with `-` and cleaning up the component structure.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let bad = (c as u32) < 0x20
            || c as u32 == 0x7f
            || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\');
        out.push(if bad { '-' } else { c });
    }
    let out = out.replace("..", "-").replace("@{", "-");

    let components: Vec<String> = out
        .split('/')
        .filter(|c| !c.is_empty())
        .map(|c| {
            let c = c.trim_start_matches('.').trim_end_matches('.');
            let c = c.strip_suffix(".lock").unwrap_or(c);
            c.to_string()
        })
        .filter(|c| !c.is_empty())
        .collect();

    let joined = components.join("/");
    if is_valid(&joined) {
        joined
    } else {
        "ref".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_names() {
        for name in [
            "HEAD",
            "ORIG_HEAD",
            "MERGE_HEAD",
            "refs/heads/main",
            "refs/heads/feature/nested",
            "refs/tags/v1.0.0",
            "refs/remotes/origin/main",
            "main",
            "v1.0.0-rc1",
        ] {
            assert!(is_valid(name), "{name} should be valid");
            RefName::new(name).unwrap();
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in [
            "",
            "@",
            "refs/heads/",
            "refs//heads/x",
            "refs/heads/..",
            "refs/heads/a..b",
            "refs/heads/.hidden",
            "refs/heads/x.lock",
            "refs/heads/has space",
            "refs/heads/ca^ret",
            "refs/heads/co:lon",
            "refs/heads/what?",
            "refs/heads/star*",
            "refs/heads/br[acket",
            "refs/heads/back\\slash",
            "refs/heads/at@{sign",
            "refs/heads/trailing.",
        ] {
            assert!(!is_valid(name), "{name} should be invalid");
        }
    }

    #[test]
    fn invalid_name_error_carries_suggestion() {
        let err = RefName::new("refs/heads/has space").unwrap_err();
        match err {
            RefError::InvalidName { suggestion, .. } => {
                assert_eq!(suggestion, "refs/heads/has-space");
                assert!(is_valid(&suggestion));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sanitize_always_produces_valid_name() {
        for name in ["???", "a..b", "x.lock", "refs/heads/bad name", ".."] {
            assert!(is_valid(&sanitize(name)), "sanitize({name:?})");
        }
    }

    #[test]
    fn shorthand_strips_known_prefixes() {
        assert_eq!(RefName::new("refs/heads/main").unwrap().shorthand(), "main");
        assert_eq!(RefName::new("refs/tags/v1").unwrap().shorthand(), "v1");
        assert_eq!(RefName::new("HEAD").unwrap().shorthand(), "HEAD");
    }
}
