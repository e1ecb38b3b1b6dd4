//! forwarding options: rewrite the upstream target (spec.md §3, §4.2)

use url::Url;

use crate::errors::WsError;
use crate::request::RawHeaders;

/// how the Host (or `:authority`) header should be treated when forwarding
///
/// replaces the original's `true | false | string`, whose falsy-non-bool
/// case was ambiguous (spec.md §9 Open Questions) — resolved in DESIGN.md
/// as: anything that is not `Rewrite` and not a `Literal` means "do not
/// touch", which is exactly what `Keep` models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateHostHeader {
    /// rewrite Host/`:authority` to the new target (the default)
    Rewrite,
    /// leave the header untouched
    Keep,
    /// set the header to this exact literal value
    Literal(String),
}

impl Default for UpdateHostHeader {
    fn default() -> Self {
        Self::Rewrite
    }
}

/// rule-configured rewrite of the upstream target, distinct from
/// transparent proxying (spec.md Glossary)
#[derive(Debug, Clone)]
pub struct ForwardingOptions {
    pub target_host: String,
    pub update_host_header: UpdateHostHeader,
}

/// the forwarding target resolved against an original request URL
pub struct ForwardingTarget {
    pub url: Url,
    pub host_header_value: String,
}

impl ForwardingOptions {
    /// compute the rewritten upstream URL and Host header value
    ///
    /// - if `target_host` contains no `/`, it is `host[:port]` and only the
    ///   hostname/port are replaced, the rest of `original` (scheme, path,
    ///   query) is kept.
    /// - otherwise `target_host` is parsed as a full URL and its scheme,
    ///   hostname, and port replace the original's; the original's path and
    ///   query are preserved (spec.md §4.2 "Forwarding variant").
    pub fn resolve(&self, original: &Url) -> Result<ForwardingTarget, WsError> {
        let mut rewritten = original.clone();
        if !self.target_host.contains('/') {
            let (host, port) = match self.target_host.split_once(':') {
                Some((h, p)) => (
                    h.to_string(),
                    Some(p.parse::<u16>().map_err(|_| WsError::InvalidUri(self.target_host.clone()))?),
                ),
                None => (self.target_host.clone(), None),
            };
            rewritten
                .set_host(Some(&host))
                .map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
            rewritten
                .set_port(port)
                .map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
        } else {
            let target = Url::parse(&self.target_host).map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
            rewritten
                .set_scheme(target.scheme())
                .map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
            rewritten
                .set_host(target.host_str())
                .map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
            rewritten
                .set_port(target.port())
                .map_err(|_| WsError::InvalidUri(self.target_host.clone()))?;
        }

        let host_header_value = match effective_port(&rewritten) {
            Some(port) if !is_default_port(&rewritten, port) => {
                format!("{}:{}", rewritten.host_str().unwrap_or_default(), port)
            }
            _ => rewritten.host_str().unwrap_or_default().to_string(),
        };

        Ok(ForwardingTarget {
            url: rewritten,
            host_header_value,
        })
    }

    /// apply `update_host_header` semantics to `headers` for the resolved
    /// target, inserting the Host header if one is not already present
    pub fn apply_host_header(&self, headers: &mut RawHeaders, target: &ForwardingTarget) {
        match &self.update_host_header {
            UpdateHostHeader::Keep => {}
            UpdateHostHeader::Rewrite => headers.set("Host", target.host_header_value.clone()),
            UpdateHostHeader::Literal(value) => headers.set("Host", value.clone()),
        }
    }
}

fn effective_port(url: &Url) -> Option<u16> {
    url.port().or_else(|| match url.scheme() {
        "ws" => Some(80),
        "wss" => Some(443),
        _ => None,
    })
}

fn is_default_port(url: &Url, port: u16) -> bool {
    matches!((url.scheme(), port), ("ws", 80) | ("wss", 443))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_only_rewrite_preserves_path_and_query() {
        let original = Url::parse("ws://client.local/chat?x=1").unwrap();
        let options = ForwardingOptions {
            target_host: "example.com:8080".to_string(),
            update_host_header: UpdateHostHeader::default(),
        };
        let target = options.resolve(&original).unwrap();
        assert_eq!(target.url.as_str(), "ws://example.com:8080/chat?x=1");
        assert_eq!(target.host_header_value, "example.com:8080");
    }

    #[test]
    fn full_url_rewrite_replaces_scheme_host_port_keeps_path() {
        let original = Url::parse("ws://client.local/socket").unwrap();
        let options = ForwardingOptions {
            target_host: "wss://secure.example.com:9443".to_string(),
            update_host_header: UpdateHostHeader::default(),
        };
        let target = options.resolve(&original).unwrap();
        assert_eq!(target.url.scheme(), "wss");
        assert_eq!(target.url.path(), "/socket");
        assert_eq!(target.host_header_value, "secure.example.com:9443");
    }

    #[test]
    fn keep_host_header_leaves_it_untouched() {
        let mut headers = RawHeaders::default();
        headers.push("Host", "client.local");
        let original = Url::parse("ws://client.local/chat").unwrap();
        let options = ForwardingOptions {
            target_host: "example.com".to_string(),
            update_host_header: UpdateHostHeader::Keep,
        };
        let target = options.resolve(&original).unwrap();
        options.apply_host_header(&mut headers, &target);
        assert_eq!(headers.get("host"), Some("client.local"));
    }

    #[test]
    fn literal_host_header_overrides_value() {
        let mut headers = RawHeaders::default();
        let original = Url::parse("ws://client.local/chat").unwrap();
        let options = ForwardingOptions {
            target_host: "example.com".to_string(),
            update_host_header: UpdateHostHeader::Literal("custom.example".to_string()),
        };
        let target = options.resolve(&original).unwrap();
        options.apply_host_header(&mut headers, &target);
        assert_eq!(headers.get("host"), Some("custom.example"));
    }
}
