//! the ingress boundary contract: what the HTTP front-end hands the core
//!
//! `spec.md` §6 describes this as an externally-owned collaborator; this
//! module only models its shape so the rest of the crate has something
//! concrete to consume and so tests can construct it without a real socket.

use std::net::IpAddr;

use url::Url;

/// an ordered, case-preserving list of raw header name/value pairs
///
/// the HTTP front-end hands these over verbatim (same order, same casing)
/// — spec.md is explicit that case and order both matter for the
/// pass-through header idempotence law in §8.
#[derive(Debug, Clone, Default)]
pub struct RawHeaders(pub Vec<(String, String)>);

impl RawHeaders {
    /// first header matching `name`, case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// push a header, preserving insertion order
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// replace every header with the given name (case-insensitive) with a
    /// single new header carrying `value`; inserts at the end if absent
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.push(name.to_string(), value);
    }

    /// remove every header matching `name`, case-insensitively
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// a copy with the handshake-only headers stripped: `sec-websocket-*`,
    /// `connection`, `upgrade` — the outbound client library synthesizes
    /// its own correct values for these (spec.md §4.2 step 6)
    pub fn without_handshake_headers(&self) -> Self {
        let kept = self
            .0
            .iter()
            .filter(|(k, _)| {
                let lower = k.to_ascii_lowercase();
                !(lower.starts_with("sec-websocket-") || lower == "connection" || lower == "upgrade")
            })
            .cloned()
            .collect();
        Self(kept)
    }
}

/// HTTP/1.1 vs HTTP/2 hint carried alongside the request; WebSocket over
/// HTTP/2 is out of scope (spec.md §1 Non-goals), so this exists only to
/// let the Upstream Connector force HTTP/1.1 on the outbound dial
/// regardless of what hint arrives (spec.md §4.2 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersionHint {
    Http1,
    Http2,
}

/// whether the last hop terminating at the raw socket was TLS-encrypted;
/// tri-state because the front-end may not have set it at all (spec.md §6)
pub type LastHopEncrypted = Option<bool>;

/// the parsed upgrade request as handed over by the HTTP front-end
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: String,
    pub url: Url,
    pub headers: RawHeaders,
    pub version: HttpVersionHint,
    pub remote_ip_address: Option<IpAddr>,
    pub last_hop_encrypted: LastHopEncrypted,
}

impl IncomingRequest {
    /// `true` if the request URL carries no hostname — the "transparent
    /// proxy" mode of spec.md §4.2, where the target is derived from the
    /// Host header instead
    pub fn is_transparent_proxy_request(&self) -> bool {
        self.url.host_str().is_none()
    }
}
