//! Opening origin connections: resolve, then try each address in turn.

use gk_core::RelayError;
use gk_core::RelayResult;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;

/// Stream the client and pool move around, plain or TLS.
pub trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Produces a connected socket for `host:port`.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<TcpStream>;
}

/// System resolver plus blocking TCP. `timeout` bounds the connect and every
/// later read and write, so a stalled origin frees its worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> RelayResult<TcpStream> {
        let addresses = resolve(host, port)?;
        let stream = connect_any(host, &addresses, timeout)?;

        stream
            .set_nodelay(true)
            .and_then(|()| stream.set_read_timeout(Some(timeout)))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|error| {
                RelayError::new(
                    "net.connect.socket_options_failed",
                    format!("failed to configure socket for `{host}`: {error}"),
                )
            })?;

        Ok(stream)
    }
}

fn resolve(host: &str, port: u16) -> RelayResult<Vec<SocketAddr>> {
    // Bracketed IPv6 hosts must lose their brackets for the resolver.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    let addresses: Vec<SocketAddr> = (bare, port)
        .to_socket_addrs()
        .map_err(|error| {
            RelayError::new(
                "net.connect.resolve_failed",
                format!("failed to resolve `{host}`: {error}"),
            )
        })?
        .collect();

    if addresses.is_empty() {
        return Err(RelayError::new(
            "net.connect.no_addresses",
            format!("`{host}` resolved to no addresses"),
        ));
    }

    Ok(addresses)
}

fn connect_any(host: &str, addresses: &[SocketAddr], timeout: Duration) -> RelayResult<TcpStream> {
    let mut last_error = None;

    for address in addresses {
        match TcpStream::connect_timeout(address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::debug!(%address, host, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(match last_error {
        Some(error) => RelayError::new(
            "net.connect.refused",
            format!("could not connect to `{host}`: {error}"),
        ),
        None => RelayError::new(
            "net.connect.no_addresses",
            format!("no addresses to connect to for `{host}`"),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::Connector;
    use super::TcpConnector;
    use super::connect_any;
    use super::resolve;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn resolves_literals_including_bracketed_ipv6() {
        let v4 = match resolve("127.0.0.1", 8080) {
            Ok(addresses) => addresses,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(v4.len(), 1);
        assert_eq!(v4[0].port(), 8080);

        let v6 = match resolve("[::1]", 443) {
            Ok(addresses) => addresses,
            Err(error) => panic!("{error}"),
        };
        assert!(v6[0].is_ipv6());
    }

    #[test]
    fn connects_to_local_listener_with_timeouts() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };

        let stream = match TcpConnector.connect("127.0.0.1", port, Duration::from_secs(2)) {
            Ok(stream) => stream,
            Err(error) => panic!("{error}"),
        };
        assert!(stream
            .read_timeout()
            .is_ok_and(|timeout| timeout == Some(Duration::from_secs(2))));
    }

    #[test]
    fn reports_refused_and_empty_address_lists() {
        let closed = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => match listener.local_addr() {
                Ok(address) => address,
                Err(error) => panic!("{error}"),
            },
            Err(error) => panic!("{error}"),
        };
        // The listener is dropped here, so nothing accepts on `closed`.

        let refused = connect_any("origin.test", &[closed], Duration::from_secs(2));
        assert!(refused.is_err_and(|error| error.code == "net.connect.refused"));

        let empty = connect_any("origin.test", &[], Duration::from_secs(2));
        assert!(empty.is_err_and(|error| error.code == "net.connect.no_addresses"));
    }
}
