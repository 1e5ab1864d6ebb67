//! Index extensions: the TREE cache, resolve-undo (REUC), and opaque
//! round-tripping of unknown optional extensions.

use bstr::{BString, ByteSlice};
use gitport_hash::Oid;
use gitport_object::FileMode;

use crate::IndexError;

/// An unrecognised extension preserved for round-trips. Extensions
/// whose signature starts with an uppercase letter are optional and may
/// be carried blindly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub signature: [u8; 4],
    pub data: Vec<u8>,
}

/// The TREE extension: cached tree OIDs so an unchanged index can be
/// committed without rebuilding trees. `entry_count == -1` marks an
/// invalidated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTree {
    pub root: CacheTreeNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTreeNode {
    /// Subtree name (empty at the root).
    pub name: BString,
    /// Number of index entries covered, or -1 when invalid.
    pub entry_count: i32,
    /// Tree OID, present only while valid.
    pub oid: Option<Oid>,
    pub children: Vec<CacheTreeNode>,
}

impl CacheTree {
    pub const SIGNATURE: &'static [u8; 4] = b"TREE";

    /// Parse the extension payload.
    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        let mut cursor = 0;
        let root = parse_node(data, &mut cursor)?;
        Ok(Self { root })
    }

    /// Serialize the extension payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_node(&self.root, &mut out);
        out
    }

    /// Invalidate every node on the path to `path` (ancestors included).
    pub fn invalidate_path(&mut self, path: &[u8]) {
        let components: Vec<&[u8]> = path.split(|&b| b == b'/').collect();
        invalidate(&mut self.root, &components);
    }
}

fn invalidate(node: &mut CacheTreeNode, components: &[&[u8]]) {
    node.entry_count = -1;
    node.oid = None;
    if let Some((head, rest)) = components.split_first() {
        if let Some(child) = node.children.iter_mut().find(|c| c.name == *head) {
            invalidate(child, rest);
        }
    }
}

fn parse_node(data: &[u8], cursor: &mut usize) -> Result<CacheTreeNode, IndexError> {
    let nul = data[*cursor..]
        .find_byte(b'\0')
        .ok_or_else(|| ext_err("TREE", "missing name terminator"))?
        + *cursor;
    let name = BString::from(&data[*cursor..nul]);
    *cursor = nul + 1;

    let space = data[*cursor..]
        .find_byte(b' ')
        .ok_or_else(|| ext_err("TREE", "missing entry count"))?
        + *cursor;
    let entry_count: i32 = std::str::from_utf8(&data[*cursor..space])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ext_err("TREE", "bad entry count"))?;
    *cursor = space + 1;

    let newline = data[*cursor..]
        .find_byte(b'\n')
        .ok_or_else(|| ext_err("TREE", "missing subtree count"))?
        + *cursor;
    let subtree_count: usize = std::str::from_utf8(&data[*cursor..newline])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ext_err("TREE", "bad subtree count"))?;
    *cursor = newline + 1;

    let oid = if entry_count >= 0 {
        if *cursor + Oid::RAW_LEN > data.len() {
            return Err(ext_err("TREE", "truncated OID"));
        }
        let oid = Oid::from_bytes(&data[*cursor..*cursor + Oid::RAW_LEN])
            .map_err(|_| ext_err("TREE", "bad OID"))?;
        *cursor += Oid::RAW_LEN;
        Some(oid)
    } else {
        None
    };

    let mut children = Vec::with_capacity(subtree_count);
    for _ in 0..subtree_count {
        children.push(parse_node(data, cursor)?);
    }

    Ok(CacheTreeNode {
        name,
        entry_count,
        oid,
        children,
    })
}

fn write_node(node: &CacheTreeNode, out: &mut Vec<u8>) {
    out.extend_from_slice(&node.name);
    out.push(b'\0');
    out.extend_from_slice(node.entry_count.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(node.children.len().to_string().as_bytes());
    out.push(b'\n');
    if node.entry_count >= 0 {
        if let Some(oid) = &node.oid {
            out.extend_from_slice(oid.as_bytes());
        }
    }
    for child in &node.children {
        write_node(child, out);
    }
}

/// Resolve-undo (REUC): the pre-resolution stages of paths whose
/// conflicts were resolved, so `checkout --merge` can restore them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveUndo {
    pub entries: Vec<ResolveUndoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveUndoEntry {
    pub path: BString,
    /// Mode+OID for stages 1..3; None where the stage was absent.
    pub stages: [Option<(FileMode, Oid)>; 3],
}

impl ResolveUndo {
    pub const SIGNATURE: &'static [u8; 4] = b"REUC";

    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        let mut entries = Vec::new();
        let mut cursor = 0;

        while cursor < data.len() {
            let nul = data[cursor..]
                .find_byte(b'\0')
                .ok_or_else(|| ext_err("REUC", "missing path terminator"))?
                + cursor;
            let path = BString::from(&data[cursor..nul]);
            cursor = nul + 1;

            let mut modes = [0u32; 3];
            for mode in &mut modes {
                let end = data[cursor..]
                    .find_byte(b'\0')
                    .ok_or_else(|| ext_err("REUC", "missing mode terminator"))?
                    + cursor;
                let text = std::str::from_utf8(&data[cursor..end])
                    .map_err(|_| ext_err("REUC", "bad mode"))?;
                *mode = u32::from_str_radix(text, 8)
                    .map_err(|_| ext_err("REUC", "bad octal mode"))?;
                cursor = end + 1;
            }

            let mut stages: [Option<(FileMode, Oid)>; 3] = [None, None, None];
            for (i, &mode) in modes.iter().enumerate() {
                if mode != 0 {
                    if cursor + Oid::RAW_LEN > data.len() {
                        return Err(ext_err("REUC", "truncated stage OID"));
                    }
                    let oid = Oid::from_bytes(&data[cursor..cursor + Oid::RAW_LEN])
                        .map_err(|_| ext_err("REUC", "bad stage OID"))?;
                    let mode = FileMode::from_raw(mode)
                        .map_err(|_| ext_err("REUC", "unknown stage mode"))?;
                    stages[i] = Some((mode, oid));
                    cursor += Oid::RAW_LEN;
                }
            }

            entries.push(ResolveUndoEntry { path, stages });
        }

        Ok(Self { entries })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(&entry.path);
            out.push(b'\0');
            for stage in &entry.stages {
                match stage {
                    Some((mode, _)) => {
                        out.extend_from_slice(format!("{:o}", mode.as_raw()).as_bytes())
                    }
                    None => out.push(b'0'),
                }
                out.push(b'\0');
            }
            for stage in entry.stages.iter().flatten() {
                out.extend_from_slice(stage.1.as_bytes());
            }
        }
        out
    }
}

fn ext_err(sig: &'static str, reason: &str) -> IndexError {
    IndexError::InvalidExtension {
        sig,
        reason: reason.to_string(),
    }
}
