//! Caching fetcher: redirect following and conditional revalidation on top
//! of a `RequestExecutor` and a shared `ResponseCache`.

use crate::NetStack;
use crate::cache::CacheKey;
use crate::cache::CacheLookup;
use crate::cache::DEFAULT_CACHE_ENTRIES;
use crate::cache::InMemoryResponseCache;
use crate::cache::ResponseCache;
use crate::client::Http11Client;
use crate::client::RequestExecutor;
use crate::http::Header;
use crate::http::HttpResponse;
use crate::tls::TlsPolicy;
use crate::url::TargetUrl;
use gk_core::RelayError;
use gk_core::RelayResult;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Final response of a fetch, after redirects and cache resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub status: u16,
    /// Where the origin says the content lives; base for relative links.
    pub resolved_url: String,
    /// Empty when the origin sent no `Content-Type`.
    pub content_type: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

/// Fetches a page by absolute URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> RelayResult<FetchResult>;
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    pub cache_entries: usize,
    pub tls_policy: TlsPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            connect_timeout: Duration::from_secs(10),
            cache_entries: DEFAULT_CACHE_ENTRIES,
            tls_policy: TlsPolicy::default(),
        }
    }
}

pub struct CachingFetcher<E = Http11Client>
where
    E: RequestExecutor,
{
    executor: E,
    stack: NetStack,
    cache: Arc<dyn ResponseCache>,
    max_redirects: usize,
}

impl CachingFetcher {
    /// Real HTTP client plus a fresh in-memory cache sized from `config`.
    pub fn from_config(config: &FetcherConfig) -> RelayResult<Self> {
        let stack = NetStack::new(config.tls_policy.clone());
        let client = stack
            .http11_client()?
            .with_connect_timeout(config.connect_timeout);
        let cache = Arc::new(InMemoryResponseCache::new(config.cache_entries));

        Ok(Self::with_executor(
            client,
            stack,
            cache,
            config.max_redirects,
        ))
    }
}

impl<E> CachingFetcher<E>
where
    E: RequestExecutor,
{
    pub fn with_executor(
        executor: E,
        stack: NetStack,
        cache: Arc<dyn ResponseCache>,
        max_redirects: usize,
    ) -> Self {
        Self {
            executor,
            stack,
            cache,
            max_redirects,
        }
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    fn fetch_with_redirects(&self, start: TargetUrl) -> RelayResult<FetchResult> {
        let mut current = start;
        let mut redirects_followed = 0_usize;

        loop {
            let key = CacheKey::get(current.as_str());
            let cached = self.cache.lookup(&key);
            if let CacheLookup::Fresh(response) = cached {
                return Ok(fetch_result(&current, response));
            }

            let mut prepared = self.stack.prepare_get(&current)?;
            if let CacheLookup::Stale {
                etag,
                last_modified,
                ..
            } = &cached
            {
                add_conditional_request_headers(
                    &mut prepared.request.headers,
                    etag.as_deref(),
                    last_modified.as_deref(),
                )?;
            }

            let response = self.executor.execute(prepared)?;
            let status = response.status;
            tracing::debug!(url = current.as_str(), status = status.as_u16(), "origin responded");

            if status.as_u16() == 304 {
                if let CacheLookup::Stale { cached, .. } = cached {
                    self.cache.refresh(&key, &response);
                    return Ok(fetch_result(&current, cached));
                }
            }

            if status.is_redirect() {
                if let Some(location) = response.header("location") {
                    if redirects_followed >= self.max_redirects {
                        return Err(RelayError::fetch(
                            "net.fetch.too_many_redirects",
                            format!(
                                "more than {} redirects while fetching `{}`",
                                self.max_redirects,
                                current.as_str()
                            ),
                        ));
                    }

                    let next = current.join(location)?;
                    tracing::debug!(from = current.as_str(), to = next.as_str(), "following redirect");
                    current = next;
                    redirects_followed = redirects_followed.saturating_add(1);
                    continue;
                }
            }

            self.cache.store(key, &response);
            return Ok(fetch_result(&current, response));
        }
    }
}

impl<E> Fetcher for CachingFetcher<E>
where
    E: RequestExecutor,
{
    fn fetch(&self, url: &str) -> RelayResult<FetchResult> {
        let target = TargetUrl::parse(url)?;
        self.fetch_with_redirects(target)
    }
}

fn add_conditional_request_headers(
    headers: &mut Vec<Header>,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> RelayResult<()> {
    if let Some(value) = etag {
        headers.push(Header::new("If-None-Match", value)?);
    }
    if let Some(value) = last_modified {
        headers.push(Header::new("If-Modified-Since", value)?);
    }
    Ok(())
}

fn fetch_result(url: &TargetUrl, response: HttpResponse) -> FetchResult {
    // An explicit Content-Location names the content's own address.
    let resolved_url = response
        .header("content-location")
        .and_then(|location| url.join(location).ok())
        .map_or_else(|| url.as_str().to_owned(), |joined| joined.as_str().to_owned());
    let content_type = response
        .header("content-type")
        .unwrap_or_default()
        .to_owned();

    FetchResult {
        status: response.status.as_u16(),
        resolved_url,
        content_type,
        headers: response.headers,
        body: response.body,
    }
}
