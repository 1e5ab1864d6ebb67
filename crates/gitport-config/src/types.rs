//! Typed value conversion: bool, int with size suffixes, path.

use bstr::{BStr, ByteSlice};

use crate::ConfigError;

/// Parse a boolean config value with git's rules: a key with no `=` is
/// true, the empty string is false, and `true/yes/on`, `false/no/off`
/// and integers are recognised case-insensitively.
pub fn parse_bool(value: Option<&BStr>) -> Result<bool, ConfigError> {
    let Some(v) = value else { return Ok(true) };
    let s = v.to_str_lossy();
    let s = s.trim();
    if s.is_empty() {
        return Ok(false);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        other => match other.parse::<i64>() {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(_) => Err(ConfigError::InvalidBool(s.to_string())),
        },
    }
}

/// Parse an integer with optional k/m/g suffix (powers of 1024).
pub fn parse_int(value: &BStr) -> Result<i64, ConfigError> {
    let s = value.to_str_lossy();
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidInt("empty value".into()));
    }

    let (digits, multiplier): (&str, i64) = match s.as_bytes().last() {
        Some(b'k') | Some(b'K') => (&s[..s.len() - 1], 1 << 10),
        Some(b'm') | Some(b'M') => (&s[..s.len() - 1], 1 << 20),
        Some(b'g') | Some(b'G') => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };

    let base: i64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidInt(s.to_string()))?;
    base.checked_mul(multiplier)
        .ok_or_else(|| ConfigError::InvalidInt(format!("overflow: {s}")))
}

/// Parse a path value, expanding a leading `~/` to the home directory.
pub fn parse_path(value: &BStr) -> std::path::PathBuf {
    let s = value.to_str_lossy();
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return std::path::PathBuf::from(home).join(rest);
        }
    }
    std::path::PathBuf::from(s)
}
