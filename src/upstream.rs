//! Upstream Connector (spec.md §4.2)
//!
//! resolves DNS, selects a proxy, assembles TLS trust, and dials an
//! upstream websocket endpoint honoring forwarding/transparent-proxy/
//! localhost-rewrite policy.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::codec::{FrameConfig, FrameIo};
use crate::dns::{CachingResolver, LookupOptions};
use crate::errors::WsError;
use crate::forwarding::ForwardingOptions;
use crate::handshake::{client_handshake, ClientHandshakeOutcome};
use crate::proxy::{connect_through_proxy, ProxyConfig};
use crate::request::{HttpVersionHint, IncomingRequest, RawHeaders};
use crate::stream::MaybeTlsStream;
use crate::tls::{build_client_config, parse_client_cert, ClientCertConfig, IgnoreHostHttpsErrors, TrustAnchorSource, TrustRootCache};

/// the stream type every dial produces once a TCP connection (direct or
/// proxied) and, if `wss:`, a TLS session have both been established
pub type UpstreamStream = MaybeTlsStream<TcpStream>;

/// `spec.md` §3 "Passthrough connection options" table, as a Rust struct
#[derive(Default, Clone)]
pub struct ConnectorOptions {
    pub ignore_host_https_errors: IgnoreHostHttpsErrors,
    pub trust_additional_cas: Vec<TrustAnchorSource>,
    pub client_certificate_host_map: HashMap<String, ClientCertConfig>,
    pub proxy_config: Option<ProxyConfig>,
    pub lookup_options: Option<LookupOptions>,
}

/// result of dialing the upstream endpoint
pub enum UpstreamDialOutcome {
    /// handshake completed; frames can now flow
    Open(FrameIo<UpstreamStream>),
    /// upstream answered a non-101 HTTP response; must be mirrored
    /// downstream verbatim (spec.md §4.2 step 8, §7)
    Rejected {
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

/// one connector per handler instance; trust roots and DNS resolver are
/// each memoized at most once (spec.md §3 invariant, §5 shared resources)
pub struct UpstreamConnector {
    options: ConnectorOptions,
    trust_roots: TrustRootCache,
    resolver: OnceCell<CachingResolver>,
}

impl UpstreamConnector {
    pub fn new(options: ConnectorOptions) -> Self {
        Self {
            options,
            trust_roots: TrustRootCache::new(),
            resolver: OnceCell::new(),
        }
    }

    fn resolver(&self) -> Result<Option<&CachingResolver>, WsError> {
        match &self.options.lookup_options {
            None => Ok(None),
            Some(lookup) => {
                if self.resolver.get().is_none() {
                    let _ = self.resolver.set(CachingResolver::new(lookup)?);
                }
                Ok(self.resolver.get())
            }
        }
    }

    /// spec.md §4.2 algorithm, steps 1-8
    pub async fn dial(&self, ws_url: &Url, raw_headers: &RawHeaders, _version: HttpVersionHint) -> Result<UpstreamDialOutcome, WsError> {
        let host = ws_url.host_str().ok_or_else(|| WsError::InvalidUri(ws_url.to_string()))?.to_string();
        let port = effective_port(ws_url)?;
        let strict = self.options.ignore_host_https_errors.is_strict_for(&host);
        let headers = raw_headers.without_handshake_headers();

        let tcp = self.dial_tcp(&host, port).await?;

        let stream: UpstreamStream = if ws_url.scheme() == "wss" {
            let roots = self.trust_roots.get_or_build(&self.options.trust_additional_cas)?;
            let client_cert = match self.options.client_certificate_host_map.get(&host) {
                Some(cfg) => Some(parse_client_cert(&host, cfg)?),
                None => None,
            };
            let config = build_client_config(roots, strict, client_cert)?;
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(host.as_str()).map_err(|_| WsError::InvalidUri(host.clone()))?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| WsError::TlsFailed(e.to_string()))?;
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let mut stream = stream;
        match client_handshake(&mut stream, ws_url, &headers).await? {
            ClientHandshakeOutcome::Open(remainder) => {
                let config = FrameConfig {
                    mask_send_frame: true,
                    ..Default::default()
                };
                Ok(UpstreamDialOutcome::Open(FrameIo::new_with(stream, config, remainder)))
            }
            ClientHandshakeOutcome::Rejected {
                status,
                reason,
                headers,
                body,
            } => Ok(UpstreamDialOutcome::Rejected {
                status,
                reason,
                headers,
                body,
            }),
        }
    }

    async fn dial_tcp(&self, host: &str, port: u16) -> Result<TcpStream, WsError> {
        if let Some(proxy) = self.options.proxy_config.as_ref().and_then(|c| c.resolve()) {
            return connect_through_proxy(&proxy, host, port).await;
        }
        if let Some(resolver) = self.resolver()? {
            let ip = resolver.resolve(host).await?;
            return TcpStream::connect((ip, port)).await.map_err(|e| WsError::ConnectionFailed(e.to_string()));
        }
        TcpStream::connect((host, port)).await.map_err(|e| WsError::ConnectionFailed(e.to_string()))
    }
}

fn effective_port(url: &Url) -> Result<u16, WsError> {
    if let Some(port) = url.port() {
        return Ok(port);
    }
    match url.scheme() {
        "ws" => Ok(80),
        "wss" => Ok(443),
        other => Err(WsError::InvalidUri(format!("unsupported scheme {other}"))),
    }
}

/// spec.md §4.2 "Transparent proxy variant": derive the target from the
/// Host header when the request URL carries no hostname, choosing `ws:`
/// vs `wss:` from the front-end's TLS hint, falling back to the socket's
/// own encryption state.
pub fn derive_target_url(request: &IncomingRequest, socket_encrypted: bool) -> Result<Url, WsError> {
    if !request.is_transparent_proxy_request() {
        return Ok(request.url.clone());
    }
    let host_header = request
        .headers
        .get("host")
        .ok_or_else(|| WsError::InvalidUri("missing Host header for transparent proxy request".into()))?;
    let encrypted = request.last_hop_encrypted.unwrap_or(socket_encrypted);
    let scheme = if encrypted { "wss" } else { "ws" };
    let path = request.url.path();
    let query = request.url.query().map(|q| format!("?{q}")).unwrap_or_default();
    let url_str = format!("{scheme}://{host_header}{path}{query}");
    Url::parse(&url_str).map_err(|_| WsError::InvalidUri(url_str))
}

/// spec.md §4.2 "Localhost rewrite": if the target is loopback but the
/// client's remote address is not, substitute the remote address so
/// traffic from a remote container claiming `localhost` returns to that
/// container rather than to the proxy host. The Host header is untouched.
pub fn apply_localhost_rewrite(target: Url, remote_ip: Option<IpAddr>) -> Url {
    let is_loopback_host = target
        .host_str()
        .map(|h| h.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(h.eq_ignore_ascii_case("localhost")))
        .unwrap_or(false);
    if !is_loopback_host {
        return target;
    }
    let Some(remote) = remote_ip else { return target };
    if remote.is_loopback() {
        return target;
    }
    let mut rewritten = target;
    let _ = rewritten.set_host(Some(&remote.to_string()));
    rewritten
}

/// compose forwarding, transparent-proxy, and localhost-rewrite resolution
/// into the final upstream URL and header patch, in the order spec.md
/// describes them: forwarding (if configured) takes priority over the
/// transparent-proxy derivation, and localhost rewrite applies last,
/// regardless of how the target host was determined.
pub fn resolve_upstream_target(
    request: &IncomingRequest,
    forwarding: Option<&ForwardingOptions>,
    socket_encrypted: bool,
) -> Result<(Url, RawHeaders), WsError> {
    let mut headers = request.headers.clone();
    let base = derive_target_url(request, socket_encrypted)?;

    let target = if let Some(forwarding) = forwarding {
        let resolved = forwarding.resolve(&base)?;
        forwarding.apply_host_header(&mut headers, &resolved);
        resolved.url
    } else {
        base
    };

    let target = apply_localhost_rewrite(target, request.remote_ip_address);
    Ok((target, headers))
}
