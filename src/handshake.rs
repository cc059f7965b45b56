//! Opening-handshake engine.
//!
//! Builds and parses the HTTP upgrade request/response on both sides of a
//! connection (SHA1 + base64 `Sec-WebSocket-Accept` derivation, request and
//! response parsing via `httparse`), with `httparse::Status::Partial` mapped
//! directly onto the `NeedMore` contract this crate's callers expect.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::Error;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub fn accept_value(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

pub fn generate_client_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Outcome of attempting to parse a server-side handshake request out of the
/// connection's read buffer.
pub enum ServerHandshakeOutcome {
    NeedMore,
    /// The request did not constitute a valid WebSocket upgrade.
    Invalid(Error),
    /// A valid upgrade request; `response` is the bytes to write back, and
    /// `consumed` is the number of input bytes the request occupied.
    Accepted { response: Vec<u8>, consumed: usize },
}

/// Tries to parse and respond to a server-side upgrade request buffered in
/// `input`. Scans for `Sec-WebSocket-Key`, `Upgrade: websocket`, and
/// `Connection: Upgrade` (case-insensitively, per RFC 6455 §4.2.1).
pub fn try_accept(input: &[u8]) -> ServerHandshakeOutcome {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut headers);

    let consumed = match request.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return ServerHandshakeOutcome::NeedMore,
        Err(e) => return ServerHandshakeOutcome::Invalid(Error::HttpParseError { source: e }),
    };

    let header = |name: &str| -> Option<&str> {
        request
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
    };

    let upgrade_ok = header("Upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    if !upgrade_ok {
        return ServerHandshakeOutcome::Invalid(Error::NoUpgradeHeader);
    }

    let connection_ok = header("Connection")
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    if !connection_ok {
        return ServerHandshakeOutcome::Invalid(Error::NoConnectionHeader);
    }

    if header("Host").is_none() {
        return ServerHandshakeOutcome::Invalid(Error::NoHostHeader);
    }

    let client_key = match header("Sec-WebSocket-Key") {
        Some(k) => k.trim().to_string(),
        None => return ServerHandshakeOutcome::Invalid(Error::NoSecWebsocketKey),
    };

    let accept = accept_value(&client_key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes();

    ServerHandshakeOutcome::Accepted { response, consumed }
}

/// Builds the client-side upgrade request for `path` on `host` (the literal
/// `Host:` header value, e.g. `"example.com:9002"`), returning the request
/// bytes and the nonce key to verify the reply against.
pub fn build_request(host: &str, path: &str) -> (Vec<u8>, String) {
    let key = generate_client_key();
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
    .into_bytes();
    (request, key)
}

pub enum ClientHandshakeOutcome {
    NeedMore,
    Invalid(Error),
    Accepted { consumed: usize },
}

/// Verifies the server's handshake reply buffered in `input` against the
/// nonce `key` this client sent.
pub fn verify_reply(input: &[u8], key: &str) -> ClientHandshakeOutcome {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);

    let consumed = match response.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return ClientHandshakeOutcome::NeedMore,
        Err(e) => return ClientHandshakeOutcome::Invalid(Error::HttpParseError { source: e }),
    };

    if response.code != Some(101) {
        return ClientHandshakeOutcome::Invalid(Error::NoUpgrade);
    }

    let accept_header = response
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Sec-WebSocket-Accept"))
        .and_then(|h| std::str::from_utf8(h.value).ok());

    match accept_header {
        Some(received) if received == accept_value(key) => ClientHandshakeOutcome::Accepted { consumed },
        _ => ClientHandshakeOutcome::Invalid(Error::InvalidAcceptKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_value_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_value("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn accepts_well_formed_upgrade_request() {
        let input = b"GET /x HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        match try_accept(input) {
            ServerHandshakeOutcome::Accepted { response, consumed } => {
                assert_eq!(consumed, input.len());
                let text = String::from_utf8(response).unwrap();
                assert!(text.starts_with("HTTP/1.1 101"));
                assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
            }
            _ => panic!("expected Accepted"),
        }
    }

    #[test]
    fn partial_request_needs_more() {
        let input = b"GET /x HTTP/1.1\r\nHost: h\r\n";
        assert!(matches!(try_accept(input), ServerHandshakeOutcome::NeedMore));
    }

    #[test]
    fn missing_key_is_invalid() {
        let input = b"GET /x HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        assert!(matches!(try_accept(input), ServerHandshakeOutcome::Invalid(Error::NoSecWebsocketKey)));
    }

    #[test]
    fn client_verifies_matching_accept() {
        let (_, key) = build_request("h", "/x");
        let accept = accept_value(&key);
        let reply = format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n");
        assert!(matches!(verify_reply(reply.as_bytes(), &key), ClientHandshakeOutcome::Accepted { .. }));
    }

    #[test]
    fn client_rejects_mismatched_accept() {
        let reply = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: bogus\r\n\r\n";
        assert!(matches!(verify_reply(reply, "dGhlIHNhbXBsZSBub25jZQ=="), ClientHandshakeOutcome::Invalid(_)));
    }
}
