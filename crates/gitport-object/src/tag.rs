use bstr::{BStr, BString, ByteSlice};
use gitport_hash::Oid;

use crate::commit::{read_continuation, write_continuation};
use crate::{ObjectError, ObjectType, Signature};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The tagged object.
    pub object: Oid,
    /// Type of the tagged object.
    pub target_type: ObjectType,
    /// Tag name (without `refs/tags/`).
    pub name: BString,
    /// Tagger identity; optional in very old tags.
    pub tagger: Option<Signature>,
    /// Optional signature block appended to the message by signing tools.
    pub gpgsig: Option<BString>,
    pub message: BString,
}

impl Tag {
    /// Parse tag content (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut object: Option<Oid> = None;
        let mut target_type: Option<ObjectType> = None;
        let mut name: Option<BString> = None;
        let mut tagger: Option<Signature> = None;
        let mut gpgsig: Option<BString> = None;

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
                b"object" => {
                    let hex = std::str::from_utf8(value)
                        .map_err(|_| ObjectError::InvalidHeader("non-UTF8 object OID".into()))?;
                    object = Some(Oid::from_hex(hex)?);
                    pos = line_end + 1;
                }
                b"type" => {
                    target_type = Some(ObjectType::from_bytes(value)?);
                    pos = line_end + 1;
                }
                b"tag" => {
                    name = Some(BString::from(value));
                    pos = line_end + 1;
                }
                b"tagger" => {
                    tagger = Some(Signature::parse(BStr::new(value))?);
                    pos = line_end + 1;
                }
                b"gpgsig" => {
                    let (sig, next) = read_continuation(data, value, line_end);
                    gpgsig = Some(sig);
                    pos = next;
                }
                _ => {
                    pos = line_end + 1;
                }
            }
        }

        Ok(Self {
            object: object.ok_or(ObjectError::MissingTagField { field: "object" })?,
            target_type: target_type.ok_or(ObjectError::MissingTagField { field: "type" })?,
            name: name.ok_or(ObjectError::MissingTagField { field: "tag" })?,
            tagger,
            gpgsig,
            message: BString::from(&data[pos.min(data.len())..]),
        })
    }

    /// Serialize tag content (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.object.to_hex().as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_type.as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');

        if let Some(ref tagger) = self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(&tagger.to_bytes());
            out.push(b'\n');
        }

        if let Some(ref sig) = self.gpgsig {
            write_continuation(&mut out, b"gpgsig", sig);
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}
