//! Outbound URL parsing and validation.

use gk_core::ErrorKind;
use gk_core::RelayError;
use gk_core::RelayResult;
use url::Url;

/// Schemes the relay is willing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Case-insensitive lookup; anything but http/https yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        if input.eq_ignore_ascii_case("http") {
            Some(Self::Http)
        } else if input.eq_ignore_ascii_case("https") {
            Some(Self::Https)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Canonical absolute URL the fetcher is allowed to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    parsed: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl TargetUrl {
    pub fn parse(input: &str) -> RelayResult<Self> {
        let parsed = Url::parse(input).map_err(|error| {
            RelayError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        Self::from_url(parsed)
    }

    pub fn from_url(mut parsed: Url) -> RelayResult<Self> {
        if parsed.cannot_be_a_base() {
            return Err(RelayError::new(
                "net.url.invalid_base",
                format!("URL `{parsed}` cannot be fetched"),
            ));
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(RelayError::new(
                "net.url.credentials_disallowed",
                "URL userinfo (`username:password@`) is not allowed",
            ));
        }

        let scheme = Scheme::parse(parsed.scheme()).ok_or_else(|| {
            RelayError::with_kind(
                ErrorKind::UnsupportedScheme,
                "net.url.scheme_unsupported",
                format!("unsupported scheme `{}`", parsed.scheme()),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| RelayError::new("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            RelayError::new(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        // Fragments never reach the origin server.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            scheme,
            host,
            port,
        })
    }

    /// Resolves a `Location` header value against this URL.
    pub fn join(&self, reference: &str) -> RelayResult<Self> {
        let joined = self.parsed.join(reference.trim()).map_err(|error| {
            RelayError::new(
                "net.url.join_failed",
                format!("failed to resolve `{reference}` against `{}`: {error}", self.parsed),
            )
        })?;
        Self::from_url(joined)
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.is_secure()
    }

    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }
}
