//! Upgrading TCP streams to TLS with rustls.

use crate::tls::TlsHandshakeConfig;
use crate::tls::TlsPolicy;
use crate::connect::BoxedIoStream;
use gk_core::RelayError;
use gk_core::RelayResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use crate::tls::TlsVersion;
#[cfg(feature = "tls-rustls")]
use crate::tls::TrustStoreMode;
#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::SupportedProtocolVersion;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

/// Upgrades a connected TCP stream to TLS.
pub trait TlsBackendAdapter: Send + Sync {
    fn connect_tls(
        &self,
        stream: TcpStream,
        handshake: &TlsHandshakeConfig,
        tls_policy: &TlsPolicy,
    ) -> RelayResult<BoxedIoStream>;
}

/// rustls-backed TLS connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsTlsAdapter;

#[cfg(feature = "tls-rustls")]
impl TlsBackendAdapter for RustlsTlsAdapter {
    fn connect_tls(
        &self,
        mut stream: TcpStream,
        handshake: &TlsHandshakeConfig,
        tls_policy: &TlsPolicy,
    ) -> RelayResult<BoxedIoStream> {
        use rustls::ClientConnection;
        use rustls::StreamOwned;

        let config = client_config(handshake, tls_policy)?;

        let server_name = ServerName::try_from(handshake.server_name.clone()).map_err(|error| {
            RelayError::new(
                "net.tls.server_name_invalid",
                format!(
                    "invalid TLS server name `{}`: {error}",
                    handshake.server_name
                ),
            )
        })?;

        let mut connection = ClientConnection::new(Arc::new(config), server_name).map_err(|error| {
            RelayError::new(
                "net.tls.connection_init_failed",
                format!(
                    "failed to initialize TLS connection for `{}`: {error}",
                    handshake.server_name
                ),
            )
        })?;

        connection.complete_io(&mut stream).map_err(|error| {
            RelayError::new(
                "net.tls.handshake_failed",
                format!(
                    "TLS handshake failed for `{}`: {error}",
                    handshake.server_name
                ),
            )
        })?;

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

#[cfg(feature = "tls-rustls")]
fn client_config(handshake: &TlsHandshakeConfig, tls_policy: &TlsPolicy) -> RelayResult<ClientConfig> {
    let versions = supported_versions(handshake.minimum_version, handshake.maximum_version)?;
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = root_store(tls_policy)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&versions)
        .map_err(|error| {
            RelayError::new(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.enable_sni = handshake.enable_sni;
    config.alpn_protocols = handshake
        .alpn_protocols
        .iter()
        .map(|value| value.as_bytes().to_vec())
        .collect();

    Ok(config)
}

#[cfg(feature = "tls-rustls")]
fn root_store(tls_policy: &TlsPolicy) -> RelayResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if matches!(tls_policy.trust_store_mode, TrustStoreMode::WebPkiAndOs) {
        let native = rustls_native_certs::load_native_certs();
        if native.certs.is_empty() && !native.errors.is_empty() {
            let details = native
                .errors
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RelayError::new(
                "net.tls.os_roots_load_failed",
                format!("failed to load operating-system roots: {details}"),
            ));
        }

        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        tracing::debug!(added, ignored, "merged operating-system trust anchors");
    }

    if roots.is_empty() {
        return Err(RelayError::new(
            "net.tls.root_store_empty",
            "no trust anchors available for TLS verification",
        ));
    }

    Ok(roots)
}

#[cfg(feature = "tls-rustls")]
fn supported_versions(
    minimum: TlsVersion,
    maximum: TlsVersion,
) -> RelayResult<Vec<&'static SupportedProtocolVersion>> {
    let versions: Vec<&'static SupportedProtocolVersion> = [TlsVersion::V1_3, TlsVersion::V1_2]
        .into_iter()
        .filter(|version| *version >= minimum && *version <= maximum)
        .map(|version| match version {
            TlsVersion::V1_2 => &rustls::version::TLS12,
            TlsVersion::V1_3 => &rustls::version::TLS13,
        })
        .collect();

    if versions.is_empty() {
        return Err(RelayError::new(
            "net.tls.version_set_empty",
            "no supported TLS versions match the requested policy",
        ));
    }

    Ok(versions)
}

#[cfg(not(feature = "tls-rustls"))]
impl TlsBackendAdapter for RustlsTlsAdapter {
    fn connect_tls(
        &self,
        _stream: TcpStream,
        _handshake: &TlsHandshakeConfig,
        _tls_policy: &TlsPolicy,
    ) -> RelayResult<BoxedIoStream> {
        Err(RelayError::new(
            "net.tls.backend_unavailable",
            "rustls backend is disabled for this build; enable `gk-net/tls-rustls`",
        ))
    }
}
