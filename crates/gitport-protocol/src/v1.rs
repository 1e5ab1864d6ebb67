//! Protocol v1: ref advertisement parsing and the classic want/have
//! negotiation format.

use std::collections::BTreeMap;
use std::io::Read;

use bstr::{BString, ByteSlice};
use gitport_hash::Oid;

use crate::capability::Capabilities;
use crate::pktline::{strip_newline, PktLine, PktLineReader, PktLineWriter};
use crate::ProtocolError;

/// A parsed ref advertisement (either protocol dialect).
#[derive(Debug, Default)]
pub struct RefAdvertisement {
    /// 1 or 2.
    pub version: u32,
    /// Advertised refs (empty until `ls-refs` for v2).
    pub refs: Vec<(Oid, BString)>,
    /// `<refname>^{}` peel entries.
    pub peeled: BTreeMap<BString, Oid>,
    /// HEAD and friends: `(from, target)`.
    pub symrefs: Vec<(String, String)>,
    pub capabilities: Capabilities,
}

impl RefAdvertisement {
    pub fn resolve(&self, name: &str) -> Option<Oid> {
        self.refs
            .iter()
            .find(|(_, n)| n.as_slice() == name.as_bytes())
            .map(|(oid, _)| *oid)
    }
}

/// Parse an `info/refs` advertisement body.
///
/// Expects the smart-HTTP `# service=<name>` preamble, tolerates its
/// absence, and detects a `version 2` capability advertisement.
pub fn parse_advertisement<R: Read>(
    reader: &mut PktLineReader<R>,
    expected_service: &str,
) -> Result<RefAdvertisement, ProtocolError> {
    let mut advert = RefAdvertisement {
        version: 1,
        ..Default::default()
    };

    let mut first = loop {
        match reader.expect_pkt()? {
            // The service preamble is followed by a flush before refs.
            PktLine::Data(data) if data.starts_with(b"# service=") => {
                let service = strip_newline(&data[b"# service=".len()..]);
                if service != expected_service.as_bytes() {
                    return Err(ProtocolError::Protocol(format!(
                        "advertised service {:?}, expected {expected_service}",
                        service.as_bstr()
                    )));
                }
            }
            PktLine::Flush => continue,
            PktLine::Data(data) => break data,
            other => {
                return Err(ProtocolError::Protocol(format!(
                    "unexpected packet in advertisement: {other:?}"
                )))
            }
        }
    };

    // A v2 server answers with its capability list instead of refs.
    if strip_newline(&first) == b"version 2" {
        advert.version = 2;
        let lines = reader.read_until_flush()?;
        advert.capabilities = Capabilities::parse_v2(&lines);
        return Ok(advert);
    }

    // v1: capabilities ride behind a NUL on the first ref line.
    if let Some(nul) = first.find_byte(b'\0') {
        let caps = String::from_utf8_lossy(&first[nul + 1..]).into_owned();
        advert.capabilities = Capabilities::parse_v1(&caps);
        advert.symrefs = advert.capabilities.symrefs();
        first.truncate(nul);
    }
    parse_ref_line(&first, &mut advert)?;

    loop {
        match reader.read_pkt()? {
            None | Some(PktLine::Flush) => break,
            Some(PktLine::Data(data)) => parse_ref_line(strip_newline(&data), &mut advert)?,
            Some(other) => {
                return Err(ProtocolError::Protocol(format!(
                    "unexpected packet in ref list: {other:?}"
                )))
            }
        }
    }

    Ok(advert)
}

fn parse_ref_line(line: &[u8], advert: &mut RefAdvertisement) -> Result<(), ProtocolError> {
    let line = strip_newline(line);
    if line.is_empty() {
        return Ok(());
    }

    let space = line.find_byte(b' ').ok_or_else(|| {
        ProtocolError::Protocol(format!("malformed ref line {:?}", line.as_bstr()))
    })?;
    let oid_hex = std::str::from_utf8(&line[..space])
        .map_err(|_| ProtocolError::Protocol("non-UTF8 OID in advertisement".into()))?;
    let oid = Oid::from_hex(oid_hex)
        .map_err(|e| ProtocolError::Protocol(format!("bad OID in advertisement: {e}")))?;
    let name = &line[space + 1..];

    // An empty repository advertises the placeholder ref.
    if name == b"capabilities^{}" {
        return Ok(());
    }

    if let Some(base) = name.strip_suffix(b"^{}") {
        advert.peeled.insert(BString::from(base), oid);
    } else {
        advert.refs.push((oid, BString::from(name)));
    }
    Ok(())
}

/// Build the v1 `upload-pack` request body: wants (capabilities on the
/// first), shallow clauses, haves, `done`.
pub struct FetchRequestV1<'a> {
    pub wants: &'a [Oid],
    pub haves: &'a [Oid],
    pub capabilities: &'a [&'a str],
    pub depth: Option<u32>,
    pub deepen_since: Option<i64>,
    pub deepen_not: &'a [String],
}

pub fn write_fetch_request<W: std::io::Write>(
    writer: &mut PktLineWriter<W>,
    request: &FetchRequestV1<'_>,
) -> Result<(), ProtocolError> {
    for (i, want) in request.wants.iter().enumerate() {
        if i == 0 && !request.capabilities.is_empty() {
            writer.write_text(&format!(
                "want {} {}",
                want.to_hex(),
                request.capabilities.join(" ")
            ))?;
        } else {
            writer.write_text(&format!("want {}", want.to_hex()))?;
        }
    }
    if let Some(depth) = request.depth {
        writer.write_text(&format!("deepen {depth}"))?;
    }
    if let Some(since) = request.deepen_since {
        writer.write_text(&format!("deepen-since {since}"))?;
    }
    for not in request.deepen_not {
        writer.write_text(&format!("deepen-not {not}"))?;
    }
    writer.write_flush()?;
    for have in request.haves {
        writer.write_text(&format!("have {}", have.to_hex()))?;
    }
    writer.write_text("done")?;
    Ok(())
}

/// Server acknowledgment lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Nak,
    /// `ACK <oid>` with an optional status (`common`, `continue`, `ready`).
    Ack { oid: Oid, status: Option<String> },
}

/// Parse an `ACK`/`NAK` line; `None` for unrelated lines.
pub fn parse_ack(line: &[u8]) -> Option<Ack> {
    let line = strip_newline(line);
    if line == b"NAK" {
        return Some(Ack::Nak);
    }
    let rest = line.strip_prefix(b"ACK ")?;
    let text = std::str::from_utf8(rest).ok()?;
    let mut parts = text.split(' ');
    let oid = Oid::from_hex(parts.next()?).ok()?;
    Some(Ack::Ack {
        oid,
        status: parts.next().map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::{encode, FLUSH};
    use std::io::Cursor;

    const OID_A: &str = "dba5b92408549e55c36e16c89e2b4a4e4cbc8c8f";
    const OID_B: &str = "0a117b8378f5e5323d15694c7eb8f62c4bea152b";
    const OID_P: &str = "ce03143bd6567fc7063549c204e877834cda5645";

    fn advert_stream() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(b"# service=git-upload-pack\n"));
        buf.extend_from_slice(FLUSH);
        buf.extend_from_slice(&encode(
            format!(
                "{OID_A} HEAD\0multi_ack side-band-64k ofs-delta shallow \
                 symref=HEAD:refs/heads/main agent=git/2.39.0\n"
            )
            .as_bytes(),
        ));
        buf.extend_from_slice(&encode(format!("{OID_A} refs/heads/main\n").as_bytes()));
        buf.extend_from_slice(&encode(format!("{OID_B} refs/tags/v0.0.10\n").as_bytes()));
        buf.extend_from_slice(&encode(
            format!("{OID_P} refs/tags/v0.0.10^{{}}\n").as_bytes(),
        ));
        buf.extend_from_slice(FLUSH);
        buf
    }

    #[test]
    fn parse_v1_advertisement() {
        let mut reader = PktLineReader::new(Cursor::new(advert_stream()));
        let advert = parse_advertisement(&mut reader, "git-upload-pack").unwrap();

        assert_eq!(advert.version, 1);
        assert_eq!(advert.refs.len(), 3);
        assert_eq!(advert.resolve("HEAD").unwrap().to_hex(), OID_A);
        assert_eq!(advert.resolve("refs/tags/v0.0.10").unwrap().to_hex(), OID_B);
        assert_eq!(
            advert.peeled[&BString::from("refs/tags/v0.0.10")].to_hex(),
            OID_P
        );
        assert_eq!(
            advert.symrefs,
            vec![("HEAD".to_string(), "refs/heads/main".to_string())]
        );
        assert!(advert.capabilities.has("side-band-64k"));
    }

    #[test]
    fn version2_line_switches_dialect() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(b"# service=git-upload-pack\n"));
        buf.extend_from_slice(FLUSH);
        buf.extend_from_slice(&encode(b"version 2\n"));
        buf.extend_from_slice(&encode(b"ls-refs\n"));
        buf.extend_from_slice(&encode(b"fetch=shallow\n"));
        buf.extend_from_slice(FLUSH);

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let advert = parse_advertisement(&mut reader, "git-upload-pack").unwrap();
        assert_eq!(advert.version, 2);
        assert!(advert.refs.is_empty());
        assert!(advert.capabilities.command_has_feature("fetch", "shallow"));
    }

    #[test]
    fn wrong_service_rejected() {
        let mut reader = PktLineReader::new(Cursor::new(advert_stream()));
        assert!(parse_advertisement(&mut reader, "git-receive-pack").is_err());
    }

    #[test]
    fn empty_repo_placeholder_skipped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(
            format!("{:040} capabilities^{{}}\0multi_ack\n", 0).as_bytes(),
        ));
        buf.extend_from_slice(FLUSH);
        let mut reader = PktLineReader::new(Cursor::new(buf));
        let advert = parse_advertisement(&mut reader, "git-upload-pack").unwrap();
        assert!(advert.refs.is_empty());
        assert!(advert.capabilities.has("multi_ack"));
    }

    #[test]
    fn fetch_request_layout() {
        let wants = vec![Oid::from_hex(OID_A).unwrap()];
        let haves = vec![Oid::from_hex(OID_B).unwrap()];
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            write_fetch_request(
                &mut writer,
                &FetchRequestV1 {
                    wants: &wants,
                    haves: &haves,
                    capabilities: &["side-band-64k", "ofs-delta"],
                    depth: Some(1),
                    deepen_since: None,
                    deepen_not: &[],
                },
            )
            .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(&format!("want {OID_A} side-band-64k ofs-delta\n")));
        assert!(text.contains("deepen 1\n"));
        assert!(text.contains(&format!("have {OID_B}\n")));
        assert!(text.ends_with("0009done\n"));
    }

    #[test]
    fn ack_parsing() {
        assert_eq!(parse_ack(b"NAK\n"), Some(Ack::Nak));
        let ack = parse_ack(format!("ACK {OID_A} continue\n").as_bytes()).unwrap();
        assert!(matches!(ack, Ack::Ack { status: Some(ref s), .. } if s == "continue"));
        assert_eq!(parse_ack(b"shallow abc\n"), None);
    }
}
