//! upstream HTTP proxy selection and CONNECT tunneling (spec.md §4.2 step 4)

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::errors::WsError;

/// a single configured proxy: `http://` or `https://` to the proxy itself
#[derive(Debug, Clone)]
pub struct ProxySetting {
    pub proxy_host: String,
    pub proxy_port: u16,
}

/// `proxyConfig`: a single proxy, a callback resolved ahead of time by the
/// embedder into a list, or an ordered list where the first non-empty
/// setting wins (spec.md §3, §4.2 step 4)
#[derive(Clone)]
pub enum ProxyConfig {
    Single(ProxySetting),
    List(Vec<ProxyConfig>),
    /// a rule-parameter reference the admin layer resolves before this
    /// crate ever sees it (spec.md Glossary "Rule parameter") — carried
    /// here only so `resolve` has something to skip over if it arrives
    /// un-dereferenced by mistake.
    Unresolved,
}

impl ProxyConfig {
    /// first non-empty setting, direct connection (`None`) if none resolve
    pub fn resolve(&self) -> Option<ProxySetting> {
        match self {
            ProxyConfig::Single(setting) => Some(setting.clone()),
            ProxyConfig::Unresolved => None,
            ProxyConfig::List(list) => list.iter().find_map(|c| c.resolve()),
        }
    }
}

/// dial `proxy`, issue `CONNECT host:port`, and return the raw TCP stream
/// positioned right after the proxy's 200 response — ready for TLS or
/// plaintext framing to begin.
pub async fn connect_through_proxy(proxy: &ProxySetting, target_host: &str, target_port: u16) -> Result<TcpStream, WsError> {
    let mut stream = TcpStream::connect((proxy.proxy_host.as_str(), proxy.proxy_port))
        .await
        .map_err(|e| WsError::ProxyError(e.to_string()))?;

    let request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n",
    );
    stream.write_all(request.as_bytes()).await.map_err(|e| WsError::ProxyError(e.to_string()))?;

    let mut buf = Vec::with_capacity(512);
    loop {
        let mut chunk = [0u8; 512];
        let n = stream.read(&mut chunk).await.map_err(|e| WsError::ProxyError(e.to_string()))?;
        if n == 0 {
            return Err(WsError::ProxyError("proxy closed connection during CONNECT".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap_or_default();
    if !status_line.contains(" 200 ") {
        return Err(WsError::ProxyError(format!("proxy CONNECT rejected: {status_line}")));
    }
    Ok(stream)
}
