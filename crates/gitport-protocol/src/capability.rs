//! Capability parsing and the checks behind `RemoteCapability` errors.

use crate::ProtocolError;

/// A server's advertised capability set.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    entries: Vec<CapabilityEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub name: String,
    pub value: Option<String>,
}

impl Capabilities {
    /// Parse the v1 form: space-separated words after the NUL on the
    /// first advertised ref, `name` or `name=value`.
    pub fn parse_v1(caps: &str) -> Self {
        let entries = caps
            .split_whitespace()
            .map(|word| match word.split_once('=') {
                Some((name, value)) => CapabilityEntry {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                },
                None => CapabilityEntry {
                    name: word.to_string(),
                    value: None,
                },
            })
            .collect();
        Self { entries }
    }

    /// Parse the v2 form: one capability per advertisement line.
    pub fn parse_v2(lines: &[Vec<u8>]) -> Self {
        let mut entries = Vec::new();
        for line in lines {
            let text = String::from_utf8_lossy(line);
            let text = text.trim_end_matches('\n');
            if text.is_empty() {
                continue;
            }
            match text.split_once('=') {
                Some((name, value)) => entries.push(CapabilityEntry {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                }),
                None => entries.push(CapabilityEntry {
                    name: text.to_string(),
                    value: None,
                }),
            }
        }
        Self { entries }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    /// All values for a capability advertised multiple times
    /// (`symref=` in v1).
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .filter_map(|e| e.value.as_deref())
            .collect()
    }

    /// v2 command features: `fetch=shallow wait-for-done` advertises
    /// the `shallow` feature of the `fetch` command.
    pub fn command_has_feature(&self, command: &str, feature: &str) -> bool {
        self.get(command)
            .is_some_and(|v| v.split_whitespace().any(|f| f == feature))
    }

    /// Fail with [`ProtocolError::RemoteCapability`] unless `name` is
    /// advertised. `parameter` names the caller flag that needs it.
    pub fn require(&self, name: &str, parameter: &str) -> Result<(), ProtocolError> {
        if self.has(name) {
            Ok(())
        } else {
            Err(ProtocolError::RemoteCapability {
                capability: name.to_string(),
                parameter: parameter.to_string(),
            })
        }
    }

    /// `symref=HEAD:refs/heads/main` entries as `(from, to)` pairs.
    pub fn symrefs(&self) -> Vec<(String, String)> {
        self.get_all("symref")
            .into_iter()
            .filter_map(|v| {
                v.split_once(':')
                    .map(|(from, to)| (from.to_string(), to.to_string()))
            })
            .collect()
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }
}
