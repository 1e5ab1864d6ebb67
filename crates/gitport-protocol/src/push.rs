//! Push (send-pack) orchestration: update commands, pack upload, and
//! the report-status response.

use std::io::Cursor;

use bstr::ByteSlice;
use gitport_hash::Oid;
use gitport_transport::{Service, SmartTransport};
use tracing::debug;

use crate::pktline::{strip_newline, PktLineReader, PktLineWriter};
use crate::sideband;
use crate::v1::RefAdvertisement;
use crate::ProtocolError;

/// One ref update command.
#[derive(Debug, Clone)]
pub struct PushCommand {
    pub refname: String,
    /// The remote's current value (`Oid::NULL` to create).
    pub old_oid: Oid,
    /// The value to set (`Oid::NULL` to delete).
    pub new_oid: Oid,
}

impl PushCommand {
    pub fn is_delete(&self) -> bool {
        self.new_oid.is_null()
    }
}

/// Per-ref outcome as the server reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    Ok,
    /// `ng <refname> <reason>` — e.g. `non-fast-forward`, `tag-exists`.
    Rejected(String),
}

/// The parsed report-status response.
#[derive(Debug, Default)]
pub struct PushReport {
    pub unpack_ok: bool,
    pub refs: Vec<(String, RefStatus)>,
}

impl PushReport {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.refs.iter().all(|(_, s)| *s == RefStatus::Ok)
    }

    /// The first rejection as a typed error.
    pub fn into_result(self) -> Result<PushReport, ProtocolError> {
        if !self.unpack_ok {
            return Err(ProtocolError::Protocol("server failed to unpack".into()));
        }
        if let Some((refname, RefStatus::Rejected(reason))) = self
            .refs
            .iter()
            .find(|(_, s)| matches!(s, RefStatus::Rejected(_)))
            .cloned()
        {
            return Err(ProtocolError::PushRejected { refname, reason });
        }
        Ok(self)
    }
}

/// Send update commands plus a pack and parse the status report.
pub fn push(
    transport: &mut dyn SmartTransport,
    advert: &RefAdvertisement,
    commands: &[PushCommand],
    pack: &[u8],
) -> Result<PushReport, ProtocolError> {
    if commands.is_empty() {
        return Ok(PushReport {
            unpack_ok: true,
            refs: Vec::new(),
        });
    }

    let caps = &advert.capabilities;
    caps.require("report-status", "push")?;
    if commands.iter().any(PushCommand::is_delete) {
        caps.require("delete-refs", "delete")?;
    }
    let use_sideband = caps.has("side-band-64k");

    let mut client_caps = vec!["report-status"];
    if use_sideband {
        client_caps.push("side-band-64k");
    }
    if commands.iter().any(PushCommand::is_delete) {
        client_caps.push("delete-refs");
    }
    client_caps.push("agent=git/gitport");

    let mut body = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut body);
        for (i, command) in commands.iter().enumerate() {
            let line = format!(
                "{} {} {}",
                command.old_oid.to_hex(),
                command.new_oid.to_hex(),
                command.refname
            );
            if i == 0 {
                // Capabilities ride behind a NUL on the first command.
                let mut payload = line.into_bytes();
                payload.push(b'\0');
                payload.extend_from_slice(client_caps.join(" ").as_bytes());
                payload.push(b'\n');
                writer.write_data(&payload)?;
            } else {
                writer.write_text(&line)?;
            }
        }
        writer.write_flush()?;
    }
    // The pack follows the command section raw, outside pkt-line framing.
    body.extend_from_slice(pack);
    debug!(commands = commands.len(), pack_bytes = pack.len(), "sending push");

    let response = transport.request(Service::ReceivePack, body)?;

    // With side-band the report itself arrives on band 1.
    let report_bytes = if use_sideband {
        let mut reader = PktLineReader::new(Cursor::new(response));
        let demuxed = sideband::demux(&mut reader)?;
        if let Some(message) = demuxed.error {
            return Err(ProtocolError::ServerError(message));
        }
        demuxed.packfile
    } else {
        response
    };

    parse_report(&report_bytes)
}

/// Parse `unpack ok` / `ok <ref>` / `ng <ref> <reason>` lines.
pub fn parse_report(bytes: &[u8]) -> Result<PushReport, ProtocolError> {
    let mut report = PushReport::default();
    let mut reader = PktLineReader::new(Cursor::new(bytes));

    loop {
        match reader.read_pkt()? {
            None | Some(crate::pktline::PktLine::Flush) => break,
            Some(crate::pktline::PktLine::Data(data)) => {
                let line = strip_newline(&data);
                if let Some(rest) = line.strip_prefix(b"unpack ") {
                    report.unpack_ok = rest == b"ok";
                } else if let Some(rest) = line.strip_prefix(b"ok ") {
                    report
                        .refs
                        .push((String::from_utf8_lossy(rest).into_owned(), RefStatus::Ok));
                } else if let Some(rest) = line.strip_prefix(b"ng ") {
                    let (refname, reason) = match rest.find_byte(b' ') {
                        Some(space) => (
                            String::from_utf8_lossy(&rest[..space]).into_owned(),
                            String::from_utf8_lossy(&rest[space + 1..]).into_owned(),
                        ),
                        None => (
                            String::from_utf8_lossy(rest).into_owned(),
                            "rejected".to_string(),
                        ),
                    };
                    report.refs.push((refname, RefStatus::Rejected(reason)));
                }
            }
            Some(_) => continue,
        }
    }

    Ok(report)
}
