//! Upgrade request parsing and response writing.

use httparse::Status;

use crate::error::HandshakeError;

/// Most headers a single upgrade request may carry.
pub const MAX_HEADERS: usize = 32;

/// `400 Bad Request` with no body.
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// A parsed upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Parses the request line and headers at the start of `src`.
    ///
    /// Returns the request and the length of the header block, or `None`
    /// while the blank line ending the block has not arrived. Bare `\n` line
    /// endings are accepted.
    pub fn parse(src: &[u8]) -> Result<Option<(Self, usize)>, HandshakeError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        let len = match request.parse(src)? {
            Status::Complete(len) => len,
            Status::Partial => return Ok(None),
        };

        let parsed = Self {
            method: request.method.unwrap_or_default().to_owned(),
            path: request.path.unwrap_or_default().to_owned(),
            headers: request
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_owned(),
                        String::from_utf8_lossy(h.value).trim().to_owned(),
                    )
                })
                .collect(),
        };

        Ok(Some((parsed, len)))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target, e.g. `/chat?room=1`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Looks a header up by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Writes a status line, headers and the terminating blank line.
pub fn write_response(status: &str, headers: &[(&str, &str)], dst: &mut Vec<u8>) {
    fn write_bytes(dst: &mut Vec<u8>, parts: &[&[u8]]) {
        for part in parts {
            dst.extend_from_slice(part);
        }
    }

    write_bytes(dst, &[b"HTTP/1.1 ", status.as_bytes(), b"\r\n"]);

    for (name, value) in headers {
        write_bytes(dst, &[name.as_bytes(), b": ", value.as_bytes(), b"\r\n"]);
    }

    write_bytes(dst, &[b"\r\n"]);
}

/// The `101 Switching Protocols` response completing an upgrade.
pub fn switching_protocols(accept: &str) -> Vec<u8> {
    let mut dst = Vec::with_capacity(160);

    write_response(
        "101 Switching Protocols",
        &[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Accept", accept),
        ],
        &mut dst,
    );

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_request_needs_more_bytes() {
        let src = b"GET /chat HTTP/1.1\r\nHost: example.com\r\n";

        assert_eq!(Request::parse(src).unwrap(), None);
    }

    #[test]
    fn bare_newlines_are_accepted() {
        let src = b"GET /chat HTTP/1.1\nHost: example.com\nUpgrade: websocket\n\n";

        let (request, len) = Request::parse(src).unwrap().unwrap();

        assert_eq!(len, src.len());
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.header("host"), Some("example.com"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let src = b"GET / HTTP/1.1\r\nSEC-WEBSOCKET-KEY:   abc  \r\n\r\ntrailing";

        let (request, len) = Request::parse(src).unwrap().unwrap();

        assert_eq!(request.header("Sec-WebSocket-Key"), Some("abc"));
        assert_eq!(&src[len..], b"trailing");
    }

    #[test]
    fn garbage_is_malformed() {
        let src = b"\x00\x01\x02 nonsense\r\n\r\n";

        assert!(matches!(
            Request::parse(src),
            Err(HandshakeError::Malformed(_))
        ));
    }

    #[test]
    fn response_layout() {
        let response = switching_protocols("abc=");

        assert_eq!(
            response,
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Accept: abc=\r\n\r\n"
        );
    }
}
