//! The HTTP upgrade exchange.

use base64::{Engine as _, engine::general_purpose};
use sha1::{Digest, Sha1};

use crate::{error::HandshakeError, http};

/// Appended to the client key before hashing.
pub const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The outcome of feeding buffered bytes to [`negotiate`].
#[derive(Debug)]
pub enum Negotiation {
    /// The header block has not been fully received yet.
    Incomplete,
    /// The request was refused; answer with [`http::BAD_REQUEST`].
    Rejected(HandshakeError),
    /// The request was accepted.
    Upgraded(Upgrade),
}

/// An accepted upgrade request.
#[derive(Debug)]
pub struct Upgrade {
    /// The request target.
    pub resource: String,
    /// The value of the `Host` header, empty when absent.
    pub host: String,
    /// The `101` response to write back.
    pub response: Vec<u8>,
    /// Length of the request; any bytes after it are already frames.
    pub consumed: usize,
}

/// Computes `Sec-WebSocket-Accept` for a client key.
pub fn accept_key(sec_key: &[u8]) -> String {
    let mut sha1 = Sha1::new();

    sha1.update(sec_key);
    sha1.update(WEBSOCKET_GUID);

    general_purpose::STANDARD.encode(sha1.finalize())
}

/// Decides what to do with the bytes received so far on a connection that
/// has not completed its handshake.
///
/// `check_host` receives the `Host` header value (empty when absent).
pub fn negotiate<F>(src: &[u8], check_host: F) -> Negotiation
where
    F: FnOnce(&str) -> bool,
{
    let (request, consumed) = match http::Request::parse(src) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return Negotiation::Incomplete,
        Err(err) => return Negotiation::Rejected(err),
    };

    if !request.method().eq_ignore_ascii_case("GET") {
        return Negotiation::Rejected(HandshakeError::InvalidMethod(request.method().to_owned()));
    }

    let host = request.header("host").unwrap_or_default();

    if !check_host(host) {
        return Negotiation::Rejected(HandshakeError::HostRejected(host.to_owned()));
    }

    let sec_key = match request.header("sec-websocket-key") {
        Some(key) if !key.is_empty() => key,
        _ => return Negotiation::Rejected(HandshakeError::MissingSecKey),
    };

    Negotiation::Upgraded(Upgrade {
        resource: request.path().to_owned(),
        host: host.to_owned(),
        response: http::switching_protocols(&accept_key(sec_key.as_bytes())),
        consumed,
    })
}
