use bstr::{BStr, BString, ByteSlice};
use gitport_hash::Oid;

use crate::{ObjectError, Signature};

/// A commit object.
///
/// Parent order is preserved; unknown headers are kept for byte-exact
/// round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// OID of the root tree.
    pub tree: Oid,
    /// Parent commit OIDs (empty for a root commit).
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    /// Optional encoding header.
    pub encoding: Option<BString>,
    /// Optional GPG signature block (continuation lines joined by `\n`).
    pub gpgsig: Option<BString>,
    /// Unrecognised headers, preserved in order.
    pub extra_headers: Vec<(BString, BString)>,
    /// Message: everything after the blank separator line.
    pub message: BString,
}

impl Commit {
    /// Parse commit content (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<Oid> = None;
        let mut parents = Vec::new();
        let mut author: Option<Signature> = None;
        let mut committer: Option<Signature> = None;
        let mut encoding: Option<BString> = None;
        let mut gpgsig: Option<BString> = None;
        let mut extra_headers: Vec<(BString, BString)> = Vec::new();

        let data = content;
        let mut pos = 0;

        loop {
            if pos >= data.len() {
                break;
            }
            if data[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = data[pos..]
                .find_byte(b'\n')
                .map(|p| p + pos)
                .unwrap_or(data.len());
            let line = &data[pos..line_end];

            let Some(space_pos) = line.find_byte(b' ') else {
                pos = line_end + 1;
                continue;
            };
            let key = &line[..space_pos];
            let value = &line[space_pos + 1..];

            match key {
                b"tree" => {
                    tree = Some(parse_oid_value(value, "tree")?);
                    pos = line_end + 1;
                }
                b"parent" => {
                    parents.push(parse_oid_value(value, "parent")?);
                    pos = line_end + 1;
                }
                b"author" => {
                    author = Some(Signature::parse(BStr::new(value))?);
                    pos = line_end + 1;
                }
                b"committer" => {
                    committer = Some(Signature::parse(BStr::new(value))?);
                    pos = line_end + 1;
                }
                b"encoding" => {
                    encoding = Some(BString::from(value));
                    pos = line_end + 1;
                }
                b"gpgsig" => {
                    let (sig, next) = read_continuation(data, value, line_end);
                    gpgsig = Some(sig);
                    pos = next;
                }
                _ => {
                    let (val, next) = read_continuation(data, value, line_end);
                    extra_headers.push((BString::from(key), val));
                    pos = next;
                }
            }
        }

        let tree = tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?;
        let author = author.ok_or(ObjectError::MissingCommitField { field: "author" })?;
        let committer = committer.ok_or(ObjectError::MissingCommitField { field: "committer" })?;

        Ok(Self {
            tree,
            parents,
            author,
            committer,
            encoding,
            gpgsig,
            extra_headers,
            message: BString::from(&data[pos.min(data.len())..]),
        })
    }

    /// Serialize commit content (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');

        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }

        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author.to_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer.to_bytes());
        out.push(b'\n');

        if let Some(ref enc) = self.encoding {
            out.extend_from_slice(b"encoding ");
            out.extend_from_slice(enc);
            out.push(b'\n');
        }

        if let Some(ref sig) = self.gpgsig {
            write_continuation(&mut out, b"gpgsig", sig);
        }

        for (key, val) in &self.extra_headers {
            write_continuation(&mut out, key, val);
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    pub fn first_parent(&self) -> Option<&Oid> {
        self.parents.first()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// The first line of the message.
    pub fn summary(&self) -> &BStr {
        let msg: &[u8] = self.message.as_ref();
        match msg.find_byte(b'\n') {
            Some(pos) => BStr::new(&msg[..pos]),
            None => BStr::new(msg),
        }
    }
}

fn parse_oid_value(value: &[u8], field: &'static str) -> Result<Oid, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader(format!("non-UTF8 {field} OID")))?;
    Ok(Oid::from_hex(hex)?)
}

/// Read a multi-line header value: continuation lines begin with a
/// single space. Returns the joined value and the position after it.
pub(crate) fn read_continuation(data: &[u8], first: &[u8], line_end: usize) -> (BString, usize) {
    let mut value = Vec::from(first);
    let mut next = line_end + 1;
    while next < data.len() && data[next] == b' ' {
        value.push(b'\n');
        let cont_end = data[next..]
            .find_byte(b'\n')
            .map(|p| p + next)
            .unwrap_or(data.len());
        value.extend_from_slice(&data[next + 1..cont_end]);
        next = cont_end + 1;
    }
    (BString::from(value), next)
}

/// Write a multi-line header, indenting continuation lines by a space.
pub(crate) fn write_continuation(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(b' ');
    for (i, line) in value.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
            out.push(b' ');
        }
        out.extend_from_slice(line);
    }
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE_HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    fn sample_commit() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("tree {TREE_HEX}\n").as_bytes());
        out.extend_from_slice(b"parent 0000000000000000000000000000000000000001\n");
        out.extend_from_slice(b"author John Doe <john@example.com> 1234567890 +0000\n");
        out.extend_from_slice(b"committer Jane Doe <jane@example.com> 1234567890 +0000\n");
        out.extend_from_slice(b"\nInitial commit\n");
        out
    }

    #[test]
    fn parse_commit() {
        let commit = Commit::parse(&sample_commit()).unwrap();
        assert_eq!(commit.tree.to_hex(), TREE_HEX);
        assert_eq!(commit.parents.len(), 1);
        assert_eq!(commit.author.name.as_slice(), b"John Doe");
        assert_eq!(commit.committer.email.as_slice(), b"jane@example.com");
        assert_eq!(commit.message.as_slice(), b"Initial commit\n");
        assert_eq!(commit.summary().as_bytes(), b"Initial commit");
    }

    #[test]
    fn serialize_roundtrip() {
        let raw = sample_commit();
        let commit = Commit::parse(&raw).unwrap();
        assert_eq!(commit.serialize_content(), raw);
    }

    #[test]
    fn parent_order_preserved() {
        let mut raw = Vec::new();
        raw.extend_from_slice(format!("tree {TREE_HEX}\n").as_bytes());
        raw.extend_from_slice(b"parent 0000000000000000000000000000000000000002\n");
        raw.extend_from_slice(b"parent 0000000000000000000000000000000000000001\n");
        raw.extend_from_slice(b"author A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"committer A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"\nMerge\n");

        let commit = Commit::parse(&raw).unwrap();
        assert!(commit.is_merge());
        assert_eq!(
            commit.parents[0].to_hex(),
            "0000000000000000000000000000000000000002"
        );
        assert_eq!(commit.serialize_content(), raw);
    }

    #[test]
    fn gpgsig_continuation_lines() {
        let mut raw = Vec::new();
        raw.extend_from_slice(format!("tree {TREE_HEX}\n").as_bytes());
        raw.extend_from_slice(b"author A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"committer A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"gpgsig -----BEGIN PGP SIGNATURE-----\n");
        raw.extend_from_slice(b" line2\n");
        raw.extend_from_slice(b" -----END PGP SIGNATURE-----\n");
        raw.extend_from_slice(b"\nsigned\n");

        let commit = Commit::parse(&raw).unwrap();
        let sig = commit.gpgsig.as_ref().unwrap();
        assert_eq!(
            sig.as_slice(),
            b"-----BEGIN PGP SIGNATURE-----\nline2\n-----END PGP SIGNATURE-----"
        );
        assert_eq!(commit.serialize_content(), raw);
    }

    #[test]
    fn unknown_headers_roundtrip() {
        let mut raw = Vec::new();
        raw.extend_from_slice(format!("tree {TREE_HEX}\n").as_bytes());
        raw.extend_from_slice(b"author A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"committer A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"custom some value\n");
        raw.extend_from_slice(b"\nmsg\n");

        let commit = Commit::parse(&raw).unwrap();
        assert_eq!(commit.extra_headers.len(), 1);
        assert_eq!(commit.serialize_content(), raw);
    }

    #[test]
    fn missing_tree_errors() {
        let raw = b"author A <a@b.com> 1 +0000\ncommitter A <a@b.com> 1 +0000\n\nmsg\n";
        assert!(matches!(
            Commit::parse(raw).unwrap_err(),
            ObjectError::MissingCommitField { field: "tree" }
        ));
    }

    #[test]
    fn root_commit_has_no_parents() {
        let mut raw = Vec::new();
        raw.extend_from_slice(format!("tree {TREE_HEX}\n").as_bytes());
        raw.extend_from_slice(b"author A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"committer A <a@b.com> 1 +0000\n");
        raw.extend_from_slice(b"\nroot\n");
        let commit = Commit::parse(&raw).unwrap();
        assert!(commit.is_root());
        assert_eq!(commit.first_parent(), None);
    }
}
