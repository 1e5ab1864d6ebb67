//! Pkt-line framing.
//!
//! Each packet is `HHHH<payload>` where `HHHH` is the 4-hex-digit total
//! length including itself. Special lengths: `0000` flush, `0001` delim
//! (v2), `0002` response-end (v2).

use std::io::{Read, Write};

use crate::ProtocolError;

/// Maximum payload per packet (65520 total minus the 4-byte header).
pub const MAX_PKT_DATA_LEN: usize = 65516;

/// One packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    /// `0000` — end of section.
    Flush,
    /// `0001` — v2 section separator.
    Delimiter,
    /// `0002` — v2 response terminator.
    ResponseEnd,
}

impl PktLine {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            PktLine::Data(d) => Some(d),
            _ => None,
        }
    }
}

/// Encode one data packet.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PKT_DATA_LEN);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    out.extend_from_slice(payload);
    out
}

/// The flush packet.
pub const FLUSH: &[u8; 4] = b"0000";

/// The delim packet (v2).
pub const DELIM: &[u8; 4] = b"0001";

/// The response-end packet (v2).
pub const RESPONSE_END: &[u8; 4] = b"0002";

/// Pkt-line reader over any byte source.
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read one packet. `None` at clean EOF.
    pub fn read_pkt(&mut self) -> Result<Option<PktLine>, ProtocolError> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ProtocolError::Io(e)),
        }

        let len_str = std::str::from_utf8(&len_buf)
            .map_err(|_| ProtocolError::InvalidPktLine(format!("length bytes {len_buf:?}")))?;
        let len = u16::from_str_radix(len_str, 16)
            .map_err(|_| ProtocolError::InvalidPktLine(format!("length {len_str:?}")))? as usize;

        match len {
            0 => Ok(Some(PktLine::Flush)),
            1 => Ok(Some(PktLine::Delimiter)),
            2 => Ok(Some(PktLine::ResponseEnd)),
            3 => Err(ProtocolError::InvalidPktLine(
                "length 3 is reserved".into(),
            )),
            _ => {
                let data_len = len - 4;
                let mut data = vec![0u8; data_len];
                self.reader.read_exact(&mut data).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        ProtocolError::InvalidPktLine(format!(
                            "truncated packet: wanted {data_len} payload bytes"
                        ))
                    } else {
                        ProtocolError::Io(e)
                    }
                })?;
                Ok(Some(PktLine::Data(data)))
            }
        }
    }

    /// Read one packet, treating EOF as a protocol error.
    pub fn expect_pkt(&mut self) -> Result<PktLine, ProtocolError> {
        self.read_pkt()?
            .ok_or_else(|| ProtocolError::Protocol("unexpected EOF in pkt-line stream".into()))
    }

    /// Collect data packets up to the next flush (delim/response-end
    /// also terminate).
    pub fn read_until_flush(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut lines = Vec::new();
        loop {
            match self.expect_pkt()? {
                PktLine::Data(data) => lines.push(data),
                PktLine::Flush | PktLine::Delimiter | PktLine::ResponseEnd => return Ok(lines),
            }
        }
    }
}

/// Pkt-line writer over any byte sink.
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_data(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        for chunk in payload.chunks(MAX_PKT_DATA_LEN.max(1)) {
            self.writer.write_all(&encode(chunk))?;
        }
        Ok(())
    }

    /// Write a text line, appending the conventional trailing newline.
    pub fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(b'\n');
        self.write_data(&payload)
    }

    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(FLUSH)?;
        Ok(())
    }

    pub fn write_delim(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(DELIM)?;
        Ok(())
    }

    pub fn write_response_end(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(RESPONSE_END)?;
        Ok(())
    }
}

/// Strip one trailing newline, the conventional pkt-line text framing.
pub fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}
