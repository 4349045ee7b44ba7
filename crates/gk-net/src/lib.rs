//! Outbound networking: URL contract, HTTP/1.1 client, response cache, and
//! the caching fetcher that ties them together.

pub mod cache;
pub mod client;
pub mod connect;
pub mod fetcher;
pub mod http;
pub mod pool;
pub mod tls;
pub mod tls_backend;
pub mod url;

use gk_core::RelayResult;
use http::HttpMethod;
use http::HttpRequest;
use tls::TlsHandshakeConfig;
use tls::TlsPolicy;
use url::TargetUrl;

pub use cache::CacheKey;
pub use cache::CacheLookup;
pub use cache::InMemoryResponseCache;
pub use cache::ResponseCache;
pub use client::Http11Client;
pub use client::RequestExecutor;
pub use fetcher::CachingFetcher;
pub use fetcher::FetchResult;
pub use fetcher::Fetcher;
pub use fetcher::FetcherConfig;
pub use http::Header;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use http::HttpVersion;
pub use tls::TlsVersion;
pub use tls::TrustStoreMode;
pub use url::Scheme;

const DEFAULT_USER_AGENT: &str = concat!("gknot/", env!("CARGO_PKG_VERSION"));
const DEFAULT_ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// Request prepared by the network layer before transport execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub request: HttpRequest,
    pub tls: Option<TlsHandshakeConfig>,
}

/// Builds outbound requests with the relay's default headers.
#[derive(Debug, Clone, Default)]
pub struct NetStack {
    pub tls_policy: TlsPolicy,
}

impl NetStack {
    pub fn new(tls_policy: TlsPolicy) -> Self {
        Self { tls_policy }
    }

    pub fn prepare_get(&self, url: &TargetUrl) -> RelayResult<PreparedRequest> {
        self.prepare_request(HttpMethod::Get, url)
    }

    pub fn prepare_request(
        &self,
        method: HttpMethod,
        url: &TargetUrl,
    ) -> RelayResult<PreparedRequest> {
        let tls = self.tls_policy.handshake_config_for(url)?;

        let request = HttpRequest::builder(method, url.clone())
            .header("User-Agent", DEFAULT_USER_AGENT)?
            .header("Accept", DEFAULT_ACCEPT_HEADER)?
            .header("Accept-Language", DEFAULT_ACCEPT_LANGUAGE)?
            .header("Accept-Encoding", DEFAULT_ACCEPT_ENCODING)?
            .build()?;

        Ok(PreparedRequest { request, tls })
    }

    pub fn http11_client(&self) -> RelayResult<Http11Client> {
        Http11Client::new(self.tls_policy.clone())
    }
}
