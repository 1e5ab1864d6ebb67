//! Identity lines: `Name <email> <timestamp> <tz>`.

use bstr::{BStr, BString, ByteSlice};

use crate::ObjectError;

/// A point in time as git stores it: unix seconds plus a signed UTC
/// offset in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitTime {
    pub seconds: i64,
    pub offset_minutes: i32,
}

impl GitTime {
    pub fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }

    /// The current time with the local UTC offset.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            seconds: now.timestamp(),
            offset_minutes: now.offset().local_minus_utc() / 60,
        }
    }

    /// Format the offset as `+HHMM`/`-HHMM`.
    pub fn offset_string(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
    }
}

/// An author/committer/tagger identity with timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub when: GitTime,
}

impl Signature {
    /// An identity stamped with the current local time.
    pub fn now(name: impl Into<BString>, email: impl Into<BString>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when: GitTime::now(),
        }
    }

    /// Parse `Name <email> <timestamp> <tz>`.
    pub fn parse(data: &BStr) -> Result<Self, ObjectError> {
        let data = data.as_bytes();
        let lt = data
            .find_byte(b'<')
            .ok_or_else(|| ObjectError::InvalidSignature("missing '<'".into()))?;
        let gt = data[lt..]
            .find_byte(b'>')
            .map(|p| p + lt)
            .ok_or_else(|| ObjectError::InvalidSignature("missing '>'".into()))?;

        let name = data[..lt].trim_end_with(|c| c == ' ');
        let email = &data[lt + 1..gt];

        let rest = data[gt + 1..].trim_with(|c| c == ' ');
        let mut parts = rest.split(|&b| b == b' ');

        let ts_bytes = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ObjectError::InvalidSignature("missing timestamp".into()))?;
        let seconds: i64 = std::str::from_utf8(ts_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ObjectError::InvalidSignature("bad timestamp".into()))?;

        let tz_bytes = parts
            .next()
            .ok_or_else(|| ObjectError::InvalidSignature("missing timezone".into()))?;
        let offset_minutes = parse_tz(tz_bytes)?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            when: GitTime::new(seconds, offset_minutes),
        })
    }

    /// Serialize back to `Name <email> <timestamp> <tz>`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.email.len() + 24);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(b" <");
        out.extend_from_slice(&self.email);
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.when.seconds.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.when.offset_string().as_bytes());
        out
    }
}

/// Parse `+HHMM`/`-HHMM` into minutes from UTC.
fn parse_tz(tz: &[u8]) -> Result<i32, ObjectError> {
    if tz.len() != 5 || (tz[0] != b'+' && tz[0] != b'-') {
        return Err(ObjectError::InvalidSignature(format!(
            "bad timezone: {}",
            String::from_utf8_lossy(tz)
        )));
    }
    let digits = std::str::from_utf8(&tz[1..])
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| ObjectError::InvalidSignature("bad timezone digits".into()))?;
    let hours: i32 = digits[..2].parse().unwrap();
    let mins: i32 = digits[2..].parse().unwrap();
    let total = hours * 60 + mins;
    Ok(if tz[0] == b'-' { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn parse_basic_signature() {
        let sig = Signature::parse(BStr::new(b"Jane Doe <jane@example.com> 1234567890 +0230"))
            .unwrap();
        assert_eq!(sig.name.as_slice(), b"Jane Doe");
        assert_eq!(sig.email.as_slice(), b"jane@example.com");
        assert_eq!(sig.when.seconds, 1234567890);
        assert_eq!(sig.when.offset_minutes, 150);
    }

    #[test]
    fn parse_negative_offset() {
        let sig =
            Signature::parse(BStr::new(b"A <a@b.com> 1000000000 -0500")).unwrap();
        assert_eq!(sig.when.offset_minutes, -300);
        assert_eq!(sig.when.offset_string(), "-0500");
    }

    #[test]
    fn serialize_roundtrip() {
        let raw = b"Jane Doe <jane@example.com> 1234567890 -0730";
        let sig = Signature::parse(BStr::new(raw)).unwrap();
        assert_eq!(sig.to_bytes(), raw);
    }

    #[test]
    fn empty_name_allowed() {
        let sig = Signature::parse(BStr::new(b"<a@b.com> 1 +0000")).unwrap();
        assert!(sig.name.is_empty());
    }

    #[test]
    fn malformed_rejected() {
        assert!(Signature::parse(BStr::new(b"no email here")).is_err());
        assert!(Signature::parse(BStr::new(b"A <a@b.com>")).is_err());
        assert!(Signature::parse(BStr::new(b"A <a@b.com> 12 badtz")).is_err());
    }
}
