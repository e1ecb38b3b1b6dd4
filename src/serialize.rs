//! the tagged payload format rule definitions travel in between an admin
//! API and a remote worker (spec.md §6 "Serialization format", §9
//! "dynamic duck typing of handler variants")
//!
//! deserializing one of these payloads and calling `into_handler_variant`
//! is how a `Rule` (see `rule.rs`) is reconstructed on the worker side.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::forwarding::{ForwardingOptions, UpdateHostHeader};
use crate::handler::{HandlerVariant, PassThroughOptions, RejectResponse};
use crate::tls::{ClientCertConfig, IgnoreHostHttpsErrors, TrustAnchorSource};
use crate::upstream::ConnectorOptions;

/// wire shape of `forwardingOptions` (spec.md §3)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingPayload {
    pub target_host: String,
    /// `true | false | string`; absent means `true` (spec.md §3, §9 Open
    /// Questions: any falsy-non-absent value is treated as "do not touch")
    #[serde(default = "default_update_host_header")]
    pub update_host_header: UpdateHostHeaderPayload,
}

fn default_update_host_header() -> UpdateHostHeaderPayload {
    UpdateHostHeaderPayload::Bool(true)
}

/// raw wire representation before being folded into `UpdateHostHeader`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UpdateHostHeaderPayload {
    Bool(bool),
    Literal(String),
}

impl From<UpdateHostHeaderPayload> for UpdateHostHeader {
    fn from(value: UpdateHostHeaderPayload) -> Self {
        match value {
            UpdateHostHeaderPayload::Bool(true) => UpdateHostHeader::Rewrite,
            // any falsy non-absent value means "do not touch" (spec.md §9)
            UpdateHostHeaderPayload::Bool(false) => UpdateHostHeader::Keep,
            UpdateHostHeaderPayload::Literal(value) => UpdateHostHeader::Literal(value),
        }
    }
}

impl From<ForwardingPayload> for ForwardingOptions {
    fn from(payload: ForwardingPayload) -> Self {
        ForwardingOptions {
            target_host: payload.target_host,
            update_host_header: payload.update_host_header.into(),
        }
    }
}

/// `ignoreHostHttpsErrors` on the wire: `true` for every host, or an
/// explicit hostname list; `ignoreHostCertificateErrors` is accepted as a
/// legacy alias for the same field (spec.md §6)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IgnoreHostHttpsErrorsPayload {
    All(bool),
    Hosts(Vec<String>),
}

impl From<IgnoreHostHttpsErrorsPayload> for IgnoreHostHttpsErrors {
    fn from(value: IgnoreHostHttpsErrorsPayload) -> Self {
        match value {
            IgnoreHostHttpsErrorsPayload::All(true) => IgnoreHostHttpsErrors::All,
            IgnoreHostHttpsErrorsPayload::All(false) => IgnoreHostHttpsErrors::None,
            IgnoreHostHttpsErrorsPayload::Hosts(hosts) => IgnoreHostHttpsErrors::Hosts(hosts.into_iter().collect::<HashSet<_>>()),
        }
    }
}

/// one `trustAdditionalCAs` entry: `{cert}` inline or `{certPath}` on disk
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustAnchorPayload {
    Cert { cert: String },
    CertPath { cert_path: PathBuf },
}

impl From<TrustAnchorPayload> for TrustAnchorSource {
    fn from(value: TrustAnchorPayload) -> Self {
        match value {
            TrustAnchorPayload::Cert { cert } => TrustAnchorSource::Pem(cert),
            TrustAnchorPayload::CertPath { cert_path } => TrustAnchorSource::Path(cert_path),
        }
    }
}

/// `clientCertificateHostMap` entry value
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientCertPayload {
    /// base64-encoded PKCS#12 bundle (PEM-converted, see `tls.rs`)
    pub pfx: String,
    pub passphrase: Option<String>,
}

impl TryFrom<ClientCertPayload> for ClientCertConfig {
    type Error = base64::DecodeError;

    fn try_from(value: ClientCertPayload) -> Result<Self, Self::Error> {
        Ok(ClientCertConfig {
            pfx: BASE64.decode(value.pfx)?,
            passphrase: value.passphrase,
        })
    }
}

/// one configured proxy (spec.md §3 `proxyConfig`)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettingPayload {
    pub proxy_host: String,
    pub proxy_port: u16,
}

/// `proxyConfig`: a single setting, an ordered list, or a rule-parameter
/// reference token the admin layer is expected to have already
/// dereferenced before this payload reaches the worker
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProxyConfigPayload {
    Single(ProxySettingPayload),
    List(Vec<ProxyConfigPayload>),
    Reference(String),
}

impl From<ProxyConfigPayload> for crate::proxy::ProxyConfig {
    fn from(value: ProxyConfigPayload) -> Self {
        match value {
            ProxyConfigPayload::Single(setting) => crate::proxy::ProxyConfig::Single(crate::proxy::ProxySetting {
                proxy_host: setting.proxy_host,
                proxy_port: setting.proxy_port,
            }),
            ProxyConfigPayload::List(list) => crate::proxy::ProxyConfig::List(list.into_iter().map(Into::into).collect()),
            // an un-dereferenced reference token; the admin layer is
            // responsible for resolving this before dispatch (spec.md
            // Glossary "Rule parameter")
            ProxyConfigPayload::Reference(_) => crate::proxy::ProxyConfig::Unresolved,
        }
    }
}

/// `lookupOptions` (spec.md §3)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOptionsPayload {
    pub max_ttl: Option<u64>,
    pub error_ttl: Option<u64>,
    #[serde(default)]
    pub servers: Vec<IpAddr>,
}

impl From<LookupOptionsPayload> for crate::dns::LookupOptions {
    fn from(value: LookupOptionsPayload) -> Self {
        crate::dns::LookupOptions {
            max_ttl: value.max_ttl.map(Duration::from_millis),
            error_ttl: value.error_ttl.map(Duration::from_millis),
            servers: value.servers,
        }
    }
}

/// the `ws-passthrough` connection-options bundle on the wire
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorOptionsPayload {
    #[serde(alias = "ignoreHostCertificateErrors")]
    pub ignore_host_https_errors: Option<IgnoreHostHttpsErrorsPayload>,
    /// defaults to empty (spec.md §6 "reviving trustAdditionalCAs
    /// (defaulting to empty)")
    #[serde(default)]
    pub trust_additional_cas: Vec<TrustAnchorPayload>,
    #[serde(default)]
    pub client_certificate_host_map: HashMap<String, ClientCertPayload>,
    pub proxy_config: Option<ProxyConfigPayload>,
    pub lookup_options: Option<LookupOptionsPayload>,
}

impl ConnectorOptionsPayload {
    pub fn into_connector_options(self) -> Result<ConnectorOptions, base64::DecodeError> {
        let mut client_certificate_host_map = HashMap::new();
        for (host, cert) in self.client_certificate_host_map {
            client_certificate_host_map.insert(host, ClientCertConfig::try_from(cert)?);
        }
        Ok(ConnectorOptions {
            ignore_host_https_errors: self.ignore_host_https_errors.map(Into::into).unwrap_or_default(),
            trust_additional_cas: self.trust_additional_cas.into_iter().map(Into::into).collect(),
            client_certificate_host_map,
            proxy_config: self.proxy_config.map(Into::into),
            lookup_options: self.lookup_options.map(Into::into),
        })
    }
}

/// the `ws-reject` payload (spec.md §4.4.4)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectPayload {
    pub status_code: u16,
    pub status_message: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl From<RejectPayload> for RejectResponse {
    fn from(payload: RejectPayload) -> Self {
        RejectResponse {
            status_code: payload.status_code,
            status_message: payload.status_message,
            headers: payload.headers,
            body: payload.body.into_bytes(),
        }
    }
}

/// tagged sum over the handler variant payloads (spec.md §3 "Handler
/// variant tag", §9 "replace with a tagged sum... dispatch via exhaustive
/// match")
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum HandlerPayload {
    #[serde(rename = "ws-passthrough")]
    WsPassthrough {
        forwarding: Option<ForwardingPayload>,
        #[serde(flatten)]
        options: ConnectorOptionsPayload,
    },
    #[serde(rename = "ws-echo")]
    WsEcho,
    #[serde(rename = "ws-listen")]
    WsListen,
    #[serde(rename = "ws-reject")]
    WsReject(RejectPayload),
    #[serde(rename = "close-connection")]
    CloseConnection,
    #[serde(rename = "reset-connection")]
    ResetConnection,
    #[serde(rename = "timeout")]
    Timeout,
}

/// the actual dial target is always derived from the inbound request at
/// dispatch time (spec.md §4.2); this conversion only produces the
/// handler's static configuration — the forwarding rewrite rule and the
/// connector options.
#[derive(Debug)]
pub enum HandlerConversionError {
    InvalidClientCert(base64::DecodeError),
}

impl std::fmt::Display for HandlerConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidClientCert(e) => write!(f, "invalid client certificate: {e}"),
        }
    }
}

impl std::error::Error for HandlerConversionError {}

impl HandlerPayload {
    /// revive the tagged payload into a `HandlerVariant`, performing every
    /// field rename and default documented in spec.md §6
    pub fn into_handler_variant(self) -> Result<HandlerVariant, HandlerConversionError> {
        Ok(match self {
            HandlerPayload::WsPassthrough { options, forwarding } => {
                let connector_options = options.into_connector_options().map_err(HandlerConversionError::InvalidClientCert)?;
                HandlerVariant::PassThrough(PassThroughOptions {
                    forwarding: forwarding.map(Into::into),
                    connector: crate::upstream::UpstreamConnector::new(connector_options),
                })
            }
            HandlerPayload::WsEcho => HandlerVariant::Echo,
            HandlerPayload::WsListen => HandlerVariant::Listen,
            HandlerPayload::WsReject(payload) => HandlerVariant::Reject(payload.into()),
            HandlerPayload::CloseConnection => HandlerVariant::CloseConnection,
            HandlerPayload::ResetConnection => HandlerVariant::ResetConnection,
            HandlerPayload::Timeout => HandlerVariant::Timeout,
        })
    }
}
