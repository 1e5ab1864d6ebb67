//! A single config file with formatting-preserving edits.

use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitport_utils::LockFile;

use crate::parse::{parse_config, ConfigEvent};
use crate::{ConfigError, ConfigKey};

/// One parsed config file. Untouched lines round-trip byte for byte;
/// `set`/`unset` rewrite only the spans they own.
pub struct ConfigFile {
    path: Option<PathBuf>,
    events: Vec<ConfigEvent>,
}

impl ConfigFile {
    /// Parse from bytes.
    pub fn parse(content: &[u8], path: Option<&Path>) -> Result<Self, ConfigError> {
        let filename = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());
        Ok(Self {
            path: path.map(|p| p.to_path_buf()),
            events: parse_config(content, &filename)?,
        })
    }

    /// Load from disk; an absent file parses as empty.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(content) => Self::parse(&content, Some(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::parse(b"", Some(path))
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Serialize, preserving original formatting for untouched events.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for event in &self.events {
            match event {
                ConfigEvent::SectionHeader { raw, .. }
                | ConfigEvent::Entry { raw, .. }
                | ConfigEvent::Comment(raw)
                | ConfigEvent::Blank(raw) => out.extend_from_slice(raw),
            }
        }
        out
    }

    /// Atomically write back to the load path.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.path.as_ref().ok_or(ConfigError::NoPath)?;
        let mut lock =
            LockFile::acquire(path).map_err(|_| ConfigError::LockBusy(path.clone()))?;
        lock.write_all(&self.to_bytes())?;
        lock.commit()?;
        Ok(())
    }

    /// All `(key, value)` pairs in file order.
    pub fn entries(&self) -> Vec<(ConfigKey, Option<BString>)> {
        let mut out = Vec::new();
        let mut section = BString::from("");
        let mut subsection: Option<BString> = None;

        for event in &self.events {
            match event {
                ConfigEvent::SectionHeader {
                    section: s,
                    subsection: sub,
                    ..
                } => {
                    section = s.clone();
                    subsection = sub.clone();
                }
                ConfigEvent::Entry { key, value, .. } => {
                    out.push((
                        ConfigKey {
                            section: section.clone(),
                            subsection: subsection.clone(),
                            name: key.clone(),
                        },
                        value.clone(),
                    ));
                }
                _ => {}
            }
        }
        out
    }

    /// Last value for a key (git semantics: later wins).
    pub fn get(&self, key: &ConfigKey) -> Option<Option<BString>> {
        self.entries()
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// All values for a multi-valued key, in order.
    pub fn get_all(&self, key: &ConfigKey) -> Vec<Option<BString>> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    /// Set a key, replacing the last existing entry or appending to the
    /// section (creating the section at the end if absent).
    pub fn set(&mut self, key: &ConfigKey, value: &BStr) {
        let new_raw = entry_raw(&key.name, value);

        if let Some(idx) = self.last_entry_index(key) {
            if let ConfigEvent::Entry { raw, value: v, .. } = &mut self.events[idx] {
                *raw = new_raw;
                *v = Some(BString::from(value.as_bytes()));
            }
            return;
        }

        match self.section_insert_point(key) {
            Some(insert_at) => {
                self.events.insert(
                    insert_at,
                    ConfigEvent::Entry {
                        raw: new_raw,
                        key: key.name.clone(),
                        value: Some(BString::from(value.as_bytes())),
                    },
                );
            }
            None => {
                // New section at the end of the file.
                self.ensure_trailing_newline();
                self.events.push(ConfigEvent::SectionHeader {
                    raw: section_raw(key),
                    section: key.section.clone(),
                    subsection: key.subsection.clone(),
                });
                self.events.push(ConfigEvent::Entry {
                    raw: new_raw,
                    key: key.name.clone(),
                    value: Some(BString::from(value.as_bytes())),
                });
            }
        }
    }

    /// Append a value without replacing existing ones (multi-valued keys).
    pub fn add(&mut self, key: &ConfigKey, value: &BStr) {
        let new_raw = entry_raw(&key.name, value);
        let insert_at = self
            .last_entry_index(key)
            .map(|i| i + 1)
            .or_else(|| self.section_insert_point(key));
        match insert_at {
            Some(at) => self.events.insert(
                at,
                ConfigEvent::Entry {
                    raw: new_raw,
                    key: key.name.clone(),
                    value: Some(BString::from(value.as_bytes())),
                },
            ),
            None => self.set(key, value),
        }
    }

    /// Remove the last entry for a key. Returns whether one was removed.
    pub fn unset(&mut self, key: &ConfigKey) -> bool {
        match self.last_entry_index(key) {
            Some(idx) => {
                self.events.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every entry for a key. Returns how many were removed.
    pub fn unset_all(&mut self, key: &ConfigKey) -> usize {
        let mut removed = 0;
        while self.unset(key) {
            removed += 1;
        }
        removed
    }

    /// Event index of the last entry matching `key`.
    fn last_entry_index(&self, key: &ConfigKey) -> Option<usize> {
        let mut section = BString::from("");
        let mut subsection: Option<BString> = None;
        let mut found = None;

        for (i, event) in self.events.iter().enumerate() {
            match event {
                ConfigEvent::SectionHeader {
                    section: s,
                    subsection: sub,
                    ..
                } => {
                    section = s.clone();
                    subsection = sub.clone();
                }
                ConfigEvent::Entry { key: k, .. } => {
                    if section == key.section && subsection == key.subsection && *k == key.name {
                        found = Some(i);
                    }
                }
                _ => {}
            }
        }
        found
    }

    /// Index just past the last event of the key's section.
    fn section_insert_point(&self, key: &ConfigKey) -> Option<usize> {
        let mut section = BString::from("");
        let mut subsection: Option<BString> = None;
        let mut end_of_match = None;

        for (i, event) in self.events.iter().enumerate() {
            match event {
                ConfigEvent::SectionHeader {
                    section: s,
                    subsection: sub,
                    ..
                } => {
                    section = s.clone();
                    subsection = sub.clone();
                    if section == key.section && subsection == key.subsection {
                        end_of_match = Some(i + 1);
                    }
                }
                _ => {
                    if section == key.section && subsection == key.subsection {
                        end_of_match = Some(i + 1);
                    }
                }
            }
        }
        end_of_match
    }

    fn ensure_trailing_newline(&mut self) {
        let needs_newline = match self.events.last() {
            None => false,
            Some(
                ConfigEvent::SectionHeader { raw, .. }
                | ConfigEvent::Entry { raw, .. }
                | ConfigEvent::Comment(raw)
                | ConfigEvent::Blank(raw),
            ) => !raw.ends_with(b"\n"),
        };
        if needs_newline {
            self.events.push(ConfigEvent::Blank(BString::from("\n")));
        }
    }
}

fn entry_raw(name: &[u8], value: &BStr) -> BString {
    let mut needs_quotes = value.starts_with(b" ")
        || value.ends_with(b" ")
        || value.contains_str(b"#")
        || value.contains_str(b";");
    let mut escaped = Vec::with_capacity(value.len());
    for &b in value.as_bytes() {
        match b {
            b'\\' => escaped.extend_from_slice(b"\\\\"),
            b'"' => escaped.extend_from_slice(b"\\\""),
            b'\n' => escaped.extend_from_slice(b"\\n"),
            b'\t' => {
                needs_quotes = true;
                escaped.push(b'\t');
            }
            _ => escaped.push(b),
        }
    }

    let mut raw = Vec::new();
    raw.push(b'\t');
    raw.extend_from_slice(name);
    raw.extend_from_slice(b" = ");
    if needs_quotes {
        raw.push(b'"');
        raw.extend_from_slice(&escaped);
        raw.push(b'"');
    } else {
        raw.extend_from_slice(&escaped);
    }
    raw.push(b'\n');
    BString::from(raw)
}

fn section_raw(key: &ConfigKey) -> BString {
    let mut raw = Vec::new();
    raw.push(b'[');
    raw.extend_from_slice(&key.section);
    if let Some(sub) = &key.subsection {
        raw.extend_from_slice(b" \"");
        for &b in sub.as_bytes() {
            if b == b'"' || b == b'\\' {
                raw.push(b'\\');
            }
            raw.push(b);
        }
        raw.push(b'"');
    }
    raw.extend_from_slice(b"]\n");
    BString::from(raw)
}
