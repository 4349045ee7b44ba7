//! TLS policy for outbound HTTPS fetches.

use crate::url::Scheme;
use crate::url::TargetUrl;
use gk_core::RelayError;
use gk_core::RelayResult;
use std::net::IpAddr;

/// Supported TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

impl TlsVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_2 => "TLS1.2",
            Self::V1_3 => "TLS1.3",
        }
    }
}

/// Trust anchors used for server certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Embedded Mozilla/WebPKI roots only.
    WebPkiOnly,
    /// WebPKI roots merged with operating-system roots (enterprise/local CAs).
    WebPkiAndOs,
}

/// Handshake parameters for one HTTPS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandshakeConfig {
    pub server_name: String,
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub alpn_protocols: Vec<String>,
    pub enable_sni: bool,
}

/// TLS requirements applied to every outbound connection. Certificates are
/// always verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            minimum_version: TlsVersion::V1_2,
            maximum_version: TlsVersion::V1_3,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

impl TlsPolicy {
    pub fn with_trust_store_mode(mut self, mode: TrustStoreMode) -> Self {
        self.trust_store_mode = mode;
        self
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.minimum_version > self.maximum_version {
            return Err(RelayError::new(
                "net.tls.invalid_version_range",
                "minimum TLS version cannot be greater than maximum version",
            ));
        }

        Ok(())
    }

    /// Handshake parameters for `url`, or `None` for plain HTTP.
    pub fn handshake_config_for(
        &self,
        url: &TargetUrl,
    ) -> RelayResult<Option<TlsHandshakeConfig>> {
        self.validate()?;

        match url.scheme() {
            Scheme::Http => Ok(None),
            Scheme::Https => Ok(Some(TlsHandshakeConfig {
                server_name: url.host().to_owned(),
                minimum_version: self.minimum_version,
                maximum_version: self.maximum_version,
                alpn_protocols: vec!["http/1.1".to_owned()],
                // SNI carries DNS names only.
                enable_sni: !is_ip_address(url.host()),
            })),
        }
    }
}

fn is_ip_address(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}
