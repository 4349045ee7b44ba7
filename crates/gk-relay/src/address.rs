//! Source-URL normalization and the target address a conversion runs on.

use gk_core::RelayError;
use gk_core::RelayResult;
use gk_net::Scheme;
use url::Url;

/// Route prefix of the conversion endpoint.
pub const FORWARDING_PREFIX: &str = "/soup";

/// Maps a full source URL to `/soup/<scheme>/<host[:port]>/<path>[?<query>]`.
pub fn forwarding_path(source: &str) -> RelayResult<String> {
    let url = Url::parse(source.trim()).map_err(|error| {
        RelayError::invalid_address(
            "relay.source_unparseable",
            format!("cannot parse source URL `{source}`: {error}"),
        )
    })?;

    let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(|| {
        RelayError::invalid_address(
            "relay.source_host_missing",
            format!("source URL `{source}` has no host"),
        )
    })?;

    let netloc = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let collapsed = collapse_slashes(url.path());
    let path = collapsed.strip_prefix('/').unwrap_or(&collapsed);

    let mut endpoint = format!("{FORWARDING_PREFIX}/{}/{netloc}/{path}", url.scheme());
    // Control characters cannot travel in a Location header; `url` escapes them.
    let query = raw_query(source.trim())
        .filter(|query| !query.chars().any(char::is_control))
        .or_else(|| url.query());
    if let Some(query) = query.filter(|query| !query.is_empty()) {
        endpoint.push('?');
        endpoint.push_str(query);
    }

    Ok(endpoint)
}

/// The query exactly as written in `source`, without the fragment.
fn raw_query(source: &str) -> Option<&str> {
    let without_fragment = source.split_once('#').map_or(source, |(head, _)| head);
    without_fragment.split_once('?').map(|(_, query)| query)
}

/// Replaces every run of consecutive `/` with a single one.
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;

    for ch in path.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }

    out
}

/// `(host, port)` as the outbound fetch would see them: lower-cased, IDNA
/// and trailing-dot normalized, port defaulting to `"80"` whatever the
/// scheme.
pub fn host_port_key(netloc: &str) -> (String, String) {
    match Url::parse(&format!("http://{netloc}/")) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_suffix('.').unwrap_or(host);
            let port = url.port().unwrap_or(80);
            (host.to_owned(), port.to_string())
        }
        Err(_) => raw_host_port_key(netloc),
    }
}

fn raw_host_port_key(netloc: &str) -> (String, String) {
    let netloc = netloc.to_ascii_lowercase();

    // Bracketed IPv6 literals carry colons of their own.
    if netloc.starts_with('[') {
        if let Some((host, rest)) = netloc.split_once(']') {
            let port = rest.strip_prefix(':').unwrap_or("80");
            return (format!("{host}]"), port.to_owned());
        }
    }

    match netloc.split_once(':') {
        Some((host, port)) => (host.to_owned(), port.to_owned()),
        None => (netloc, "80".to_owned()),
    }
}

/// A conversion target as it arrives from the forwarding route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    /// As given; validated by [`TargetAddress::checked_scheme`].
    pub scheme: String,
    pub host: String,
    pub port: Option<String>,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl TargetAddress {
    /// Splits `domain` into host and port; an empty path becomes `/`.
    pub fn from_route(
        protocol: &str,
        domain: &str,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Self {
        let (host, port) = match domain.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                (host.to_owned(), Some(port.to_owned()))
            }
            _ => (domain.to_owned(), None),
        };

        let path = if path.is_empty() {
            "/".to_owned()
        } else {
            path.to_owned()
        };

        Self {
            scheme: protocol.to_owned(),
            host,
            port,
            path,
            query,
        }
    }

    pub fn netloc(&self) -> String {
        match &self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    pub fn checked_scheme(&self) -> RelayResult<Scheme> {
        Scheme::parse(&self.scheme).ok_or_else(RelayError::unsupported_scheme)
    }

    /// Outbound URL: scheme, host, path, then the query form-encoded.
    pub fn request_url(&self) -> RelayResult<Url> {
        let scheme = self.checked_scheme()?;
        let mut url = Url::parse(&format!("{}://{}/", scheme.as_str(), self.netloc()))
            .map_err(|error| {
                RelayError::fetch(
                    "relay.target_unparseable",
                    format!("invalid target `{}`: {error}", self.netloc()),
                )
            })?;

        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        url.set_path(&path);

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::TargetAddress;
    use super::collapse_slashes;
    use super::forwarding_path;
    use super::host_port_key;
    use gk_core::ErrorKind;

    fn forward(source: &str) -> String {
        match forwarding_path(source) {
            Ok(path) => path,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn builds_forwarding_paths() {
        assert_eq!(forward("http://example.com/index.html"), "/soup/http/example.com/index.html");
        assert_eq!(forward("https://example.com"), "/soup/https/example.com/");
        assert_eq!(forward("http://example.com/"), "/soup/http/example.com/");
        assert_eq!(
            forward("http://example.com:8080//a///b?x=1&y=%20#frag"),
            "/soup/http/example.com:8080/a/b?x=1&y=%20"
        );
        assert_eq!(forward("http://example.com/?"), "/soup/http/example.com/");
    }

    #[test]
    fn query_is_appended_as_written() {
        assert_eq!(
            forward("http://example.com/a/../b?q=a b&x=\"y\"&z=%7e"),
            "/soup/http/example.com/b?q=a b&x=\"y\"&z=%7e"
        );
        assert_eq!(
            forward("http://example.com/p?a=?b#c?d"),
            "/soup/http/example.com/p?a=?b"
        );
        assert_eq!(forward("http://example.com/p#frag?not"), "/soup/http/example.com/p");
        assert_eq!(
            forward("http://example.com/p?a=\x07b c"),
            "/soup/http/example.com/p?a=%07b%20c"
        );
    }

    #[test]
    fn rejects_unusable_sources() {
        for source in ["not a url", "mailto:someone@example.com", ""] {
            let result = forwarding_path(source);
            assert!(
                result.is_err_and(|error| error.is_kind(ErrorKind::InvalidAddress)),
                "accepted `{source}`"
            );
        }
    }

    #[test]
    fn slash_collapsing_is_idempotent() {
        for path in ["//a///b//", "/", "", "a/b", "////"] {
            let once = collapse_slashes(path);
            assert_eq!(collapse_slashes(&once), once);
            assert!(!once.contains("//"));
        }
    }

    #[test]
    fn host_port_key_defaults_to_port_80() {
        assert_eq!(host_port_key("Example.COM"), ("example.com".to_owned(), "80".to_owned()));
        assert_eq!(host_port_key("example.com:8080"), ("example.com".to_owned(), "8080".to_owned()));
        assert_eq!(host_port_key("[::1]:3000"), ("[::1]".to_owned(), "3000".to_owned()));
        assert_eq!(host_port_key("[::1]"), ("[::1]".to_owned(), "80".to_owned()));
    }

    #[test]
    fn host_port_key_matches_outbound_normalization() {
        let own = host_port_key("gknot.test");
        for spelling in [
            "gknot.test:080",
            "gknot.test:",
            "gknot.test.",
            "GKNOT.TEST.:80",
            "gknot.test:00080",
        ] {
            assert_eq!(host_port_key(spelling), own, "{spelling}");
        }
        assert_ne!(host_port_key("gknot.test:8080"), own);
        assert_eq!(host_port_key("[::1]:3000"), host_port_key("[0:0::1]:3000"));
    }

    #[test]
    fn host_port_key_falls_back_on_unparseable_hosts() {
        assert_eq!(host_port_key("bad host:99"), ("bad host".to_owned(), "99".to_owned()));
    }

    #[test]
    fn request_url_encodes_query_and_path() {
        let target = TargetAddress::from_route(
            "HTTP",
            "example.com:8080",
            "a b/c?.html",
            vec![("q".to_owned(), "x y".to_owned()), ("n".to_owned(), "1&2".to_owned())],
        );
        assert_eq!(target.port.as_deref(), Some("8080"));

        let url = match target.request_url() {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(url.as_str(), "http://example.com:8080/a%20b/c%3F.html?q=x+y&n=1%262");
    }

    #[test]
    fn empty_path_and_query_give_root_url() {
        let target = TargetAddress::from_route("https", "example.com", "", Vec::new());
        let url = match target.request_url() {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn other_schemes_are_unsupported() {
        let target = TargetAddress::from_route("ftp", "example.com", "/", Vec::new());
        assert!(target
            .request_url()
            .is_err_and(|error| error.is_kind(ErrorKind::UnsupportedScheme)));
    }
}
