use std::fmt::{Display, Write as _};

use bytes::{Bytes, BytesMut};
use itertools::Itertools;

use super::status_code::reason_phrase;

/// Every response is written as HTTP/1.0 regardless of the request version.
pub const PROTOCOL: &str = "HTTP/1.0";

pub const SERVER_NAME: &str = concat!("staticd/", env!("CARGO_PKG_VERSION"));

/// `HTTP/1.0 <code> <reason>\r\n`
pub fn status_line(code: u16) -> Bytes {
    let mut line = String::with_capacity(32);
    let _ = write!(line, "{} {} {}\r\n", PROTOCOL, code, reason_phrase(code));
    Bytes::from(line)
}

/// Ordered header fields, rendered together with the terminating blank line so
/// they leave in a single write.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// The wire form, identical to the `Display` rendering.
    pub fn to_bytes(&self) -> Bytes {
        let mut block = BytesMut::with_capacity(256);
        let _ = write!(block, "{}", self);
        block.freeze()
    }
}

impl Display for HeaderBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .fields
            .iter()
            .format_with("", |(k, v), g| g(&format_args!("{}: {}\r\n", k, v)));

        // Blank line ends the header section
        write!(f, "{}\r\n", fields)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_line_for_known_and_unknown_codes() {
        assert_eq!(status_line(200), Bytes::from_static(b"HTTP/1.0 200 OK\r\n"));
        assert_eq!(
            status_line(404),
            Bytes::from_static(b"HTTP/1.0 404 Not Found\r\n")
        );
        assert_eq!(
            status_line(299),
            Bytes::from_static(b"HTTP/1.0 299 Unknown error of response status\r\n")
        );
    }

    #[test]
    fn header_block_keeps_insertion_order() {
        let block = HeaderBlock::new()
            .header("Allow", "GET")
            .header("Content-Length", 12)
            .header("Content-Type", "text/html");

        let expected = "Allow: GET\r\nContent-Length: 12\r\nContent-Type: text/html\r\n\r\n";

        assert_eq!(block.to_string(), expected, "Display renders the same bytes");
        assert_eq!(block.to_bytes(), Bytes::from(expected));
    }

    #[test]
    fn empty_block_is_just_the_terminator() {
        assert_eq!(HeaderBlock::new().to_bytes(), Bytes::from_static(b"\r\n"));
    }
}
