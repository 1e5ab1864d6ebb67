//! Protocol v2: the `ls-refs` and `fetch` commands.

use std::io::Read;

use bstr::{BString, ByteSlice};
use gitport_hash::Oid;

use crate::pktline::{strip_newline, PktLine, PktLineReader, PktLineWriter};
use crate::ProtocolError;

/// Options for `ls-refs`.
#[derive(Debug, Clone, Default)]
pub struct LsRefsOptions {
    /// Server-side `ref-prefix` filters.
    pub ref_prefixes: Vec<String>,
    pub symrefs: bool,
    pub peel: bool,
}

/// One ref from an `ls-refs` response.
#[derive(Debug, Clone)]
pub struct LsRef {
    pub oid: Oid,
    pub name: BString,
    pub symref_target: Option<BString>,
    pub peeled: Option<Oid>,
}

/// Serialize an `ls-refs` request body.
pub fn write_ls_refs<W: std::io::Write>(
    writer: &mut PktLineWriter<W>,
    options: &LsRefsOptions,
) -> Result<(), ProtocolError> {
    writer.write_text("command=ls-refs")?;
    writer.write_delim()?;
    if options.symrefs {
        writer.write_text("symrefs")?;
    }
    if options.peel {
        writer.write_text("peel")?;
    }
    for prefix in &options.ref_prefixes {
        writer.write_text(&format!("ref-prefix {prefix}"))?;
    }
    writer.write_flush()?;
    Ok(())
}

/// Parse an `ls-refs` response.
pub fn parse_ls_refs<R: Read>(
    reader: &mut PktLineReader<R>,
) -> Result<Vec<LsRef>, ProtocolError> {
    let mut refs = Vec::new();
    loop {
        match reader.read_pkt()? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => break,
            Some(PktLine::Delimiter) => continue,
            Some(PktLine::Data(data)) => {
                let line = strip_newline(&data);
                let text = std::str::from_utf8(line).map_err(|_| {
                    ProtocolError::Protocol("non-UTF8 ls-refs line".into())
                })?;
                let mut parts = text.split(' ');
                let oid_hex = parts
                    .next()
                    .ok_or_else(|| ProtocolError::Protocol("empty ls-refs line".into()))?;
                let oid = Oid::from_hex(oid_hex)
                    .map_err(|e| ProtocolError::Protocol(format!("bad ls-refs OID: {e}")))?;
                let name = parts
                    .next()
                    .ok_or_else(|| ProtocolError::Protocol("ls-refs line without name".into()))?;

                let mut entry = LsRef {
                    oid,
                    name: BString::from(name),
                    symref_target: None,
                    peeled: None,
                };
                for attr in parts {
                    if let Some(target) = attr.strip_prefix("symref-target:") {
                        entry.symref_target = Some(BString::from(target));
                    } else if let Some(peeled) = attr.strip_prefix("peeled:") {
                        entry.peeled = Oid::from_hex(peeled).ok();
                    }
                }
                refs.push(entry);
            }
        }
    }
    Ok(refs)
}

/// Arguments for the v2 `fetch` command.
#[derive(Debug, Clone, Default)]
pub struct FetchArgsV2 {
    pub wants: Vec<Oid>,
    pub haves: Vec<Oid>,
    pub done: bool,
    pub thin_pack: bool,
    pub no_progress: bool,
    pub ofs_delta: bool,
    pub depth: Option<u32>,
    pub deepen_since: Option<i64>,
    pub deepen_not: Vec<String>,
}

/// Serialize a `fetch` command body.
pub fn write_fetch<W: std::io::Write>(
    writer: &mut PktLineWriter<W>,
    args: &FetchArgsV2,
) -> Result<(), ProtocolError> {
    writer.write_text("command=fetch")?;
    writer.write_delim()?;
    if args.thin_pack {
        writer.write_text("thin-pack")?;
    }
    if args.no_progress {
        writer.write_text("no-progress")?;
    }
    if args.ofs_delta {
        writer.write_text("ofs-delta")?;
    }
    if let Some(depth) = args.depth {
        writer.write_text(&format!("deepen {depth}"))?;
    }
    if let Some(since) = args.deepen_since {
        writer.write_text(&format!("deepen-since {since}"))?;
    }
    for not in &args.deepen_not {
        writer.write_text(&format!("deepen-not {not}"))?;
    }
    for want in &args.wants {
        writer.write_text(&format!("want {}", want.to_hex()))?;
    }
    for have in &args.haves {
        writer.write_text(&format!("have {}", have.to_hex()))?;
    }
    if args.done {
        writer.write_text("done")?;
    }
    writer.write_flush()?;
    Ok(())
}

/// A parsed v2 `fetch` response.
#[derive(Debug, Default)]
pub struct FetchResponseV2 {
    /// `ACK <oid>` lines from the acknowledgments section.
    pub acks: Vec<Oid>,
    /// Whether the acknowledgments section said `ready`.
    pub ready: bool,
    pub shallow: Vec<Oid>,
    pub unshallow: Vec<Oid>,
    /// Side-band-decoded packfile bytes.
    pub pack: Vec<u8>,
    pub progress: Vec<u8>,
}

/// Parse the sectioned v2 fetch response
/// (`acknowledgments` / `shallow-info` / `packfile`).
pub fn parse_fetch_response<R: Read>(
    reader: &mut PktLineReader<R>,
) -> Result<FetchResponseV2, ProtocolError> {
    let mut response = FetchResponseV2::default();
    let mut section: Option<String> = None;

    loop {
        match reader.read_pkt()? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => break,
            Some(PktLine::Delimiter) => continue,
            Some(PktLine::Data(data)) => {
                let in_packfile = section.as_deref() == Some("packfile");
                if in_packfile {
                    match data.first() {
                        Some(1) => response.pack.extend_from_slice(&data[1..]),
                        Some(2) => response.progress.extend_from_slice(&data[1..]),
                        Some(3) => {
                            return Err(ProtocolError::ServerError(
                                String::from_utf8_lossy(&data[1..]).into_owned(),
                            ))
                        }
                        _ => {
                            return Err(ProtocolError::Protocol(
                                "bare line inside packfile section".into(),
                            ))
                        }
                    }
                    continue;
                }

                let line = strip_newline(&data);
                match line {
                    b"acknowledgments" | b"shallow-info" | b"wanted-refs" | b"packfile" => {
                        section = Some(String::from_utf8_lossy(line).into_owned());
                    }
                    b"NAK" => {}
                    b"ready" => response.ready = true,
                    _ => {
                        if let Some(rest) = line.strip_prefix(b"ACK ") {
                            if let Ok(oid) = parse_oid(rest) {
                                response.acks.push(oid);
                            }
                        } else if let Some(rest) = line.strip_prefix(b"shallow ") {
                            response.shallow.push(parse_oid(rest)?);
                        } else if let Some(rest) = line.strip_prefix(b"unshallow ") {
                            response.unshallow.push(parse_oid(rest)?);
                        }
                    }
                }
            }
        }
    }

    Ok(response)
}

fn parse_oid(bytes: &[u8]) -> Result<Oid, ProtocolError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProtocolError::Protocol("non-UTF8 OID".into()))?;
    Oid::from_hex(text.trim())
        .map_err(|e| ProtocolError::Protocol(format!("bad OID {:?}: {e}", text.as_bytes().as_bstr())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::{encode, DELIM, FLUSH};
    use std::io::Cursor;

    const OID_A: &str = "dba5b92408549e55c36e16c89e2b4a4e4cbc8c8f";
    const OID_B: &str = "0a117b8378f5e5323d15694c7eb8f62c4bea152b";

    #[test]
    fn ls_refs_request_layout() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            write_ls_refs(
                &mut writer,
                &LsRefsOptions {
                    ref_prefixes: vec!["refs/heads/".into(), "refs/tags/".into()],
                    symrefs: true,
                    peel: true,
                },
            )
            .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("0014command=ls-refs\n0001"));
        assert!(text.contains("symrefs\n"));
        assert!(text.contains("peel\n"));
        assert!(text.contains("ref-prefix refs/heads/\n"));
        assert!(text.ends_with("0000"));
    }

    #[test]
    fn ls_refs_response_attributes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(
            format!("{OID_A} HEAD symref-target:refs/heads/main\n").as_bytes(),
        ));
        buf.extend_from_slice(&encode(
            format!("{OID_B} refs/tags/v1 peeled:{OID_A}\n").as_bytes(),
        ));
        buf.extend_from_slice(FLUSH);

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let refs = parse_ls_refs(&mut reader).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs[0].symref_target.as_ref().unwrap().as_slice(),
            b"refs/heads/main"
        );
        assert_eq!(refs[1].peeled.unwrap().to_hex(), OID_A);
    }

    #[test]
    fn fetch_request_includes_arguments() {
        let mut buf = Vec::new();
        {
            let mut writer = PktLineWriter::new(&mut buf);
            write_fetch(
                &mut writer,
                &FetchArgsV2 {
                    wants: vec![Oid::from_hex(OID_A).unwrap()],
                    haves: vec![Oid::from_hex(OID_B).unwrap()],
                    done: true,
                    thin_pack: false,
                    no_progress: true,
                    ofs_delta: true,
                    depth: Some(2),
                    deepen_since: None,
                    deepen_not: vec![],
                },
            )
            .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("command=fetch"));
        assert!(text.contains("no-progress\n"));
        assert!(text.contains("ofs-delta\n"));
        assert!(text.contains("deepen 2\n"));
        assert!(text.contains(&format!("want {OID_A}\n")));
        assert!(text.contains(&format!("have {OID_B}\n")));
        assert!(text.contains("done\n"));
    }

    #[test]
    fn fetch_response_sections() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(b"shallow-info\n"));
        buf.extend_from_slice(&encode(format!("shallow {OID_A}\n").as_bytes()));
        buf.extend_from_slice(&encode(format!("unshallow {OID_B}\n").as_bytes()));
        buf.extend_from_slice(DELIM);
        buf.extend_from_slice(&encode(b"packfile\n"));
        buf.extend_from_slice(&encode(b"\x01PACKDATA"));
        buf.extend_from_slice(&encode(b"\x02progress line"));
        buf.extend_from_slice(FLUSH);

        let mut reader = PktLineReader::new(Cursor::new(buf));
        let response = parse_fetch_response(&mut reader).unwrap();
        assert_eq!(response.shallow[0].to_hex(), OID_A);
        assert_eq!(response.unshallow[0].to_hex(), OID_B);
        assert_eq!(response.pack, b"PACKDATA");
        assert_eq!(response.progress, b"progress line");
    }

    #[test]
    fn fetch_response_error_band_fails() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(b"packfile\n"));
        buf.extend_from_slice(&encode(b"\x03fatal: nope\n"));
        buf.extend_from_slice(FLUSH);
        let mut reader = PktLineReader::new(Cursor::new(buf));
        assert!(matches!(
            parse_fetch_response(&mut reader).unwrap_err(),
            ProtocolError::ServerError(msg) if msg == "fatal: nope\n"
        ));
    }
}
