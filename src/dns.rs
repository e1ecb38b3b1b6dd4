//! caching DNS resolver for the Upstream Connector (spec.md §4.2 step 5)
//!
//! backed by `hickory-resolver`'s `TokioAsyncResolver`, the same crate the
//! pack's sibling tunnel (`wstunnel`) uses for its own caching, TTL-aware
//! lookups.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::errors::WsError;

/// `lookupOptions`: presence switches the connector to this caching
/// resolver instead of the platform default (spec.md §3)
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    pub max_ttl: Option<Duration>,
    pub error_ttl: Option<Duration>,
    pub servers: Vec<IpAddr>,
}

/// a resolver instance, shared per handler and safe to reuse across dials
/// (spec.md §5 "the per-handler DNS resolver is shared mutable only via
/// its internal cache; safe for the cooperative model")
pub struct CachingResolver {
    inner: TokioAsyncResolver,
}

impl CachingResolver {
    /// build a resolver honoring `options`; "the resolver's fallback cache
    /// TTL is fixed at zero" (spec.md §4.2 step 5) maps to `negative_min_ttl`
    pub fn new(options: &LookupOptions) -> Result<Self, WsError> {
        let config = if options.servers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut config = ResolverConfig::new();
            for server in &options.servers {
                config.add_name_server(hickory_resolver::config::NameServerConfig {
                    socket_addr: std::net::SocketAddr::new(*server, 53),
                    protocol: hickory_resolver::config::Protocol::Udp,
                    tls_dns_name: None,
                    trust_negative_responses: false,
                    bind_addr: None,
                });
            }
            config
        };
        let mut opts = ResolverOpts::default();
        opts.ip_strategy = LookupIpStrategy::Ipv4thenIpv6;
        if let Some(ttl) = options.max_ttl {
            opts.positive_max_ttl = Some(ttl);
        }
        if let Some(ttl) = options.error_ttl {
            opts.negative_max_ttl = Some(ttl);
        }
        opts.negative_min_ttl = Some(Duration::from_secs(0));
        let inner = TokioAsyncResolver::tokio(config, opts);
        Ok(Self { inner })
    }

    /// resolve a hostname to its first address, using the resolver's cache
    pub async fn resolve(&self, host: &str) -> Result<IpAddr, WsError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let response = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| WsError::DnsLookupFailed(e.to_string()))?;
        response
            .iter()
            .next()
            .ok_or_else(|| WsError::DnsLookupFailed(format!("no records for {host}")))
    }
}
