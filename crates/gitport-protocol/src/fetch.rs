//! Fetch orchestration over a smart transport: discovery, capability
//! checks, want/have negotiation, and packfile receipt.

use std::io::Cursor;

use gitport_hash::Oid;
use gitport_transport::{Service, SmartTransport};
use tracing::debug;

use crate::capability::Capabilities;
use crate::pktline::{PktLineReader, PktLineWriter};
use crate::sideband;
use crate::v1::{self, RefAdvertisement};
use crate::v2;
use crate::{ProtocolError, ProtocolVersion};

/// What the caller wants fetched.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub wants: Vec<Oid>,
    pub haves: Vec<Oid>,
    /// Shallow clone depth.
    pub depth: Option<u32>,
    /// `deepen-since` timestamp.
    pub deepen_since: Option<i64>,
    /// `deepen-not` revisions.
    pub deepen_not: Vec<String>,
    /// Suppress the progress side channel.
    pub no_progress: bool,
    pub protocol_version: ProtocolVersion,
}

/// What came back.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub pack: Vec<u8>,
    pub shallow: Vec<Oid>,
    pub unshallow: Vec<Oid>,
    pub progress: Vec<u8>,
}

/// Discover the remote's refs for a service, preferring v2 unless the
/// caller pinned the version.
pub fn discover(
    transport: &mut dyn SmartTransport,
    service: Service,
    version: ProtocolVersion,
) -> Result<RefAdvertisement, ProtocolError> {
    // An explicit v1 request simply never sends the v2 header, so the
    // server answers in the classic dialect even when it knows v2.
    // Push always speaks v1: receive-pack has no v2 dialect here.
    let want_v2 =
        !matches!(version, ProtocolVersion::V1) && service == Service::UploadPack;
    transport.set_protocol_v2(want_v2);

    let body = transport.discover(service)?;
    let mut reader = PktLineReader::new(Cursor::new(body));
    let advert = v1::parse_advertisement(&mut reader, service.as_str())?;

    if matches!(version, ProtocolVersion::V2) && advert.version != 2 {
        return Err(ProtocolError::Protocol(
            "server does not speak protocol v2".into(),
        ));
    }
    debug!(version = advert.version, refs = advert.refs.len(), "discovered remote");
    Ok(advert)
}

/// List refs over v2 `ls-refs` (the v1 advertisement already carries
/// the ref list).
pub fn ls_refs(
    transport: &mut dyn SmartTransport,
    prefixes: &[String],
) -> Result<Vec<v2::LsRef>, ProtocolError> {
    let mut body = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut body);
        v2::write_ls_refs(
            &mut writer,
            &v2::LsRefsOptions {
                ref_prefixes: prefixes.to_vec(),
                symrefs: true,
                peel: true,
            },
        )?;
    }
    let response = transport.request(Service::UploadPack, body)?;
    let mut reader = PktLineReader::new(Cursor::new(response));
    v2::parse_ls_refs(&mut reader)
}

/// Run the fetch against an already-discovered remote.
pub fn fetch(
    transport: &mut dyn SmartTransport,
    advert: &RefAdvertisement,
    request: &FetchRequest,
) -> Result<FetchOutcome, ProtocolError> {
    if request.wants.is_empty() {
        return Ok(FetchOutcome::default());
    }
    check_capabilities(advert, request)?;

    if advert.version == 2 {
        fetch_v2(transport, request)
    } else {
        fetch_v1(transport, &advert.capabilities, request)
    }
}

/// A shallow request needs the server to have the matching capability.
fn check_capabilities(
    advert: &RefAdvertisement,
    request: &FetchRequest,
) -> Result<(), ProtocolError> {
    let caps = &advert.capabilities;
    let shallow_supported = if advert.version == 2 {
        caps.command_has_feature("fetch", "shallow")
    } else {
        caps.has("shallow")
    };

    if request.depth.is_some() && !shallow_supported {
        return Err(ProtocolError::RemoteCapability {
            capability: "shallow".into(),
            parameter: "depth".into(),
        });
    }
    if request.deepen_since.is_some() && advert.version == 1 && !caps.has("deepen-since") {
        return Err(ProtocolError::RemoteCapability {
            capability: "deepen-since".into(),
            parameter: "since".into(),
        });
    }
    if !request.deepen_not.is_empty() && advert.version == 1 && !caps.has("deepen-not") {
        return Err(ProtocolError::RemoteCapability {
            capability: "deepen-not".into(),
            parameter: "exclude".into(),
        });
    }
    Ok(())
}

fn fetch_v2(
    transport: &mut dyn SmartTransport,
    request: &FetchRequest,
) -> Result<FetchOutcome, ProtocolError> {
    let mut body = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut body);
        v2::write_fetch(
            &mut writer,
            &v2::FetchArgsV2 {
                wants: request.wants.clone(),
                haves: request.haves.clone(),
                done: true,
                thin_pack: false,
                no_progress: request.no_progress,
                ofs_delta: true,
                depth: request.depth,
                deepen_since: request.deepen_since,
                deepen_not: request.deepen_not.clone(),
            },
        )?;
    }

    let response = transport.request(Service::UploadPack, body)?;
    let mut reader = PktLineReader::new(Cursor::new(response));
    let parsed = v2::parse_fetch_response(&mut reader)?;

    Ok(FetchOutcome {
        pack: parsed.pack,
        shallow: parsed.shallow,
        unshallow: parsed.unshallow,
        progress: parsed.progress,
    })
}

fn fetch_v1(
    transport: &mut dyn SmartTransport,
    caps: &Capabilities,
    request: &FetchRequest,
) -> Result<FetchOutcome, ProtocolError> {
    let mut client_caps: Vec<&str> = Vec::new();
    for cap in ["side-band-64k", "ofs-delta", "shallow", "deepen-since", "deepen-not"] {
        if caps.has(cap) {
            client_caps.push(cap);
        }
    }
    if request.no_progress && caps.has("no-progress") {
        client_caps.push("no-progress");
    }
    client_caps.push("agent=git/gitport");

    let mut body = Vec::new();
    {
        let mut writer = PktLineWriter::new(&mut body);
        v1::write_fetch_request(
            &mut writer,
            &v1::FetchRequestV1 {
                wants: &request.wants,
                haves: &request.haves,
                capabilities: &client_caps,
                depth: request.depth,
                deepen_since: request.deepen_since,
                deepen_not: &request.deepen_not,
            },
        )?;
    }

    let response = transport.request(Service::UploadPack, body)?;
    let mut reader = PktLineReader::new(Cursor::new(response));
    let demuxed = sideband::demux(&mut reader)?;
    if let Some(message) = demuxed.error {
        return Err(ProtocolError::ServerError(message));
    }

    // Shallow boundary updates ride as bare lines before the pack.
    let mut outcome = FetchOutcome {
        pack: demuxed.packfile,
        progress: demuxed.progress,
        ..Default::default()
    };
    for line in &demuxed.packet_lines {
        let line = crate::pktline::strip_newline(line);
        if let Some(rest) = line.strip_prefix(b"shallow ") {
            if let Ok(oid) = parse_hex(rest) {
                outcome.shallow.push(oid);
            }
        } else if let Some(rest) = line.strip_prefix(b"unshallow ") {
            if let Ok(oid) = parse_hex(rest) {
                outcome.unshallow.push(oid);
            }
        }
        // ACK/NAK lines need no action once `done` has been sent.
    }

    Ok(outcome)
}

fn parse_hex(bytes: &[u8]) -> Result<Oid, ProtocolError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProtocolError::Protocol("non-UTF8 OID".into()))?;
    Oid::from_hex(text.trim()).map_err(|e| ProtocolError::Protocol(e.to_string()))
}
