use std::convert::TryFrom;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// RFC1123 formatted date.
pub struct HttpDate(pub SystemTime);

impl std::fmt::Display for HttpDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Utc>::from(self.0);
        write!(f, "{}", datetime.format("%a, %d %b %Y %H:%M:%S GMT"))
    }
}

/// Parse an RFC1123 date like "Wed, 26 May 2021 14:51:23 GMT".
///
/// The weekday name is skipped rather than checked against the date.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    let date = match value.split_once(',') {
        Some((_weekday, date)) => date.trim_start(),
        None => value,
    };
    let datetime = NaiveDateTime::parse_from_str(date, "%d %b %Y %H:%M:%S GMT").ok()?;
    let seconds = Utc.from_utc_datetime(&datetime).timestamp();
    let seconds = u64::try_from(seconds).ok()?;
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds))
}

/// Encode string to be an RFC3986-compliant URL part.
pub struct UrlEncoded<'a>(pub &'a str);

impl<'a> std::fmt::Display for UrlEncoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
                write!(f, "{}", c)?;
            } else {
                let mut buf = [0; 4];
                c.encode_utf8(&mut buf);
                for b in buf.iter().take(c.len_utf8()) {
                    write!(f, "%{:02X}", b)?;
                }
            }
        }
        Ok(())
    }
}

/// Decode URL by converting %XX (where XX are hexadecimal digits) to the character it represents.
///
/// A "+" is decoded as a space. Invalid UTF-8 is replaced.
pub struct UrlDecoded<'a>(pub &'a str);

impl<'a> std::fmt::Display for UrlDecoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let url = self.0.as_bytes();
        let mut decoded = Vec::with_capacity(url.len());
        let mut i = 0;
        while i < url.len() {
            let c = url[i];
            if c == b'%'
                && i + 2 < url.len()
                && url[i + 1].is_ascii_hexdigit()
                && url[i + 2].is_ascii_hexdigit()
            {
                decoded.push(hex_to_digit(url[i + 1]) * 16 + hex_to_digit(url[i + 2]));
                i += 3;
            } else if c == b'+' {
                decoded.push(b' ');
                i += 1;
            } else {
                decoded.push(c);
                i += 1;
            }
        }
        write!(f, "{}", String::from_utf8_lossy(&decoded))
    }
}

/// Convert hex digit to integer.
fn hex_to_digit(hex: u8) -> u8 {
    if (b'A'..=b'F').contains(&hex) {
        hex - b'A' + 10
    } else if (b'a'..=b'f').contains(&hex) {
        hex - b'a' + 10
    } else {
        hex - b'0'
    }
}
