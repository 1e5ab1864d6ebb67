//! Side-band demultiplexing.
//!
//! Payloads are prefixed with one band byte: `0x01` packfile data,
//! `0x02` progress, `0x03` fatal error. A band-3 frame terminates the
//! packfile stream; packets with no band prefix (bare text lines) pass
//! through untouched.

use std::io::Read;

use crate::pktline::{PktLine, PktLineReader, MAX_PKT_DATA_LEN};
use crate::ProtocolError;

/// Band identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Data = 1,
    Progress = 2,
    Error = 3,
}

/// The fully demultiplexed form of a side-band stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Demuxed {
    /// Concatenated band-1 payloads.
    pub packfile: Vec<u8>,
    /// Concatenated band-2 payloads.
    pub progress: Vec<u8>,
    /// Data packets that carried no band prefix.
    pub packet_lines: Vec<Vec<u8>>,
    /// The band-3 message, when the stream carried one.
    pub error: Option<String>,
}

/// Split a buffered side-band stream into its three channels.
///
/// After a band-3 frame the packfile sequence ends: any further band-1
/// payloads are discarded, and the error message is surfaced.
pub fn demux<R: Read>(reader: &mut PktLineReader<R>) -> Result<Demuxed, ProtocolError> {
    let mut out = Demuxed::default();

    loop {
        match reader.read_pkt()? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => break,
            Some(PktLine::Delimiter) => continue,
            Some(PktLine::Data(data)) => {
                if data.is_empty() {
                    continue;
                }
                match data[0] {
                    1 => {
                        if out.error.is_none() {
                            out.packfile.extend_from_slice(&data[1..]);
                        }
                    }
                    2 => out.progress.extend_from_slice(&data[1..]),
                    3 => {
                        let message = String::from_utf8_lossy(&data[1..]).into_owned();
                        if out.error.is_none() {
                            out.error = Some(message);
                        }
                    }
                    _ => out.packet_lines.push(data),
                }
            }
        }
    }

    Ok(out)
}

/// Streaming variant: band-1 payloads flow to `on_data`, band-2 to
/// `on_progress`; a band-3 frame fails with [`ProtocolError::ServerError`].
pub fn drain<R: Read>(
    reader: &mut PktLineReader<R>,
    mut on_data: impl FnMut(&[u8]),
    mut on_progress: impl FnMut(&[u8]),
) -> Result<(), ProtocolError> {
    loop {
        match reader.read_pkt()? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => return Ok(()),
            Some(PktLine::Delimiter) => continue,
            Some(PktLine::Data(data)) => {
                if data.is_empty() {
                    continue;
                }
                match data[0] {
                    1 => on_data(&data[1..]),
                    2 => on_progress(&data[1..]),
                    3 => {
                        return Err(ProtocolError::ServerError(
                            String::from_utf8_lossy(&data[1..]).into_owned(),
                        ))
                    }
                    other => {
                        return Err(ProtocolError::Protocol(format!(
                            "unknown side-band channel {other}"
                        )))
                    }
                }
            }
        }
    }
}

/// Frame data onto a band, chunked below the pkt-line payload limit.
pub fn write_band<W: std::io::Write>(
    writer: &mut crate::pktline::PktLineWriter<W>,
    band: Band,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let max_chunk = MAX_PKT_DATA_LEN - 1;
    for chunk in data.chunks(max_chunk) {
        let mut pkt = Vec::with_capacity(1 + chunk.len());
        pkt.push(band as u8);
        pkt.extend_from_slice(chunk);
        writer.write_data(&pkt)?;
    }
    Ok(())
}
