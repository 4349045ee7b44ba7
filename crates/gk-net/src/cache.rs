//! Shared in-memory HTTP response cache with freshness and validation rules.

use crate::http::Header;
use crate::http::HttpResponse;
use crate::http::header_value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;

pub const DEFAULT_CACHE_ENTRIES: usize = 512;

/// Request identity a cached response is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn get(url: &str) -> Self {
        Self(format!("GET {url}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: HttpResponse,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub freshness: Option<Duration>,
    pub must_revalidate: bool,
    pub stored_at: Instant,
}

impl CachedResponse {
    fn is_fresh(&self) -> bool {
        if self.must_revalidate {
            return false;
        }

        let Some(freshness) = self.freshness else {
            return false;
        };

        self.stored_at.elapsed() < freshness
    }

    fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Result of consulting the cache before a request goes out.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Fresh(HttpResponse),
    Stale {
        cached: HttpResponse,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    Miss,
}

/// Process-wide response cache injected into the fetcher.
pub trait ResponseCache: Send + Sync {
    fn lookup(&self, key: &CacheKey) -> CacheLookup;
    /// Stores `response` if its headers allow it; returns whether it was kept.
    fn store(&self, key: CacheKey, response: &HttpResponse) -> bool;
    /// Applies the headers of a `304 Not Modified` to an existing entry.
    fn refresh(&self, key: &CacheKey, not_modified: &HttpResponse);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded cache evicting the oldest stored entry once full.
pub struct InMemoryResponseCache {
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CachedResponse>>,
}

impl InMemoryResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CachedResponse>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for InMemoryResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ENTRIES)
    }
}

impl ResponseCache for InMemoryResponseCache {
    fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let guard = self.entries();

        let Some(entry) = guard.get(key) else {
            return CacheLookup::Miss;
        };

        if entry.is_fresh() {
            tracing::debug!(key = key.as_str(), "cache hit");
            return CacheLookup::Fresh(entry.response.clone());
        }

        if entry.has_validators() {
            tracing::debug!(key = key.as_str(), "cache entry stale, revalidating");
            return CacheLookup::Stale {
                cached: entry.response.clone(),
                etag: entry.etag.clone(),
                last_modified: entry.last_modified.clone(),
            };
        }

        CacheLookup::Miss
    }

    fn store(&self, key: CacheKey, response: &HttpResponse) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let Some(entry) = storable_entry(response) else {
            return false;
        };

        let mut guard = self.entries();
        if !guard.contains_key(&key) && guard.len() >= self.capacity {
            let oldest = guard
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest_key) = oldest {
                guard.remove(&oldest_key);
            }
        }

        tracing::debug!(key = key.as_str(), "cache store");
        guard.insert(key, entry);
        true
    }

    fn refresh(&self, key: &CacheKey, not_modified: &HttpResponse) {
        let mut guard = self.entries();
        let cache_control = not_modified.header("cache-control").unwrap_or_default();

        if contains_cache_directive(cache_control, "no-store") {
            guard.remove(key);
            return;
        }

        let Some(entry) = guard.get_mut(key) else {
            return;
        };

        if let Some(freshness) = freshness_lifetime(&not_modified.headers) {
            entry.freshness = Some(freshness);
        }
        if let Some(etag) = not_modified.header("etag") {
            entry.etag = Some(etag.to_owned());
        }
        if let Some(last_modified) = not_modified.header("last-modified") {
            entry.last_modified = Some(last_modified.to_owned());
        }
        if !cache_control.is_empty() {
            entry.must_revalidate = contains_cache_directive(cache_control, "no-cache");
        }

        entry.stored_at = Instant::now();
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

fn storable_entry(response: &HttpResponse) -> Option<CachedResponse> {
    if !response.status.is_success() {
        return None;
    }

    let cache_control = response.header("cache-control").unwrap_or_default();
    if contains_cache_directive(cache_control, "no-store") {
        return None;
    }

    if response
        .header("vary")
        .is_some_and(|value| value.split(',').any(|token| token.trim() == "*"))
    {
        return None;
    }

    let freshness = freshness_lifetime(&response.headers);
    let etag = response.header("etag").map(ToOwned::to_owned);
    let last_modified = response.header("last-modified").map(ToOwned::to_owned);

    if freshness.is_none() && etag.is_none() && last_modified.is_none() {
        return None;
    }

    Some(CachedResponse {
        response: response.clone(),
        etag,
        last_modified,
        freshness,
        must_revalidate: contains_cache_directive(cache_control, "no-cache"),
        stored_at: Instant::now(),
    })
}

/// Freshness lifetime from `s-maxage`, `max-age`, or `Expires` minus `Date`.
pub fn freshness_lifetime(headers: &[Header]) -> Option<Duration> {
    if let Some(cache_control) = header_value(headers, "cache-control") {
        if let Some(seconds) = directive_seconds(cache_control, "s-maxage")
            .or_else(|| directive_seconds(cache_control, "max-age"))
        {
            return Some(Duration::from_secs(seconds));
        }
    }

    let expires = header_value(headers, "expires")?;
    let Ok(expires) = httpdate::parse_http_date(expires) else {
        // Unparseable dates such as `Expires: 0` mean already expired.
        return Some(Duration::ZERO);
    };

    let date = header_value(headers, "date")
        .and_then(|value| httpdate::parse_http_date(value).ok())
        .unwrap_or_else(SystemTime::now);

    Some(expires.duration_since(date).unwrap_or(Duration::ZERO))
}

fn directive_seconds(cache_control: &str, directive: &str) -> Option<u64> {
    for part in cache_control.split(',').map(str::trim) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };

        if !name.trim().eq_ignore_ascii_case(directive) {
            continue;
        }

        if let Ok(seconds) = value.trim().trim_matches('"').parse::<u64>() {
            return Some(seconds);
        }
    }

    None
}

pub fn contains_cache_directive(value: &str, directive: &str) -> bool {
    value.split(',').map(str::trim).any(|token| {
        let name = token.split_once('=').map_or(token, |(name, _)| name);
        name.trim().eq_ignore_ascii_case(directive)
    })
}
