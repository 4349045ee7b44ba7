//! The conversion pipeline: fetch, detect, decode, rewrite, serialize.

use crate::address::TargetAddress;
use crate::address::host_port_key;
use gk_core::ErrorKind;
use gk_core::RelayError;
use gk_core::RelayResult;
use gk_encoding::EncodingDetector;
use gk_net::Fetcher;
use gk_net::http::reason_phrase;
use std::sync::Arc;

/// Statuses whose bodies are converted.
const ACCEPTED_STATUSES: [u16; 3] = [200, 302, 304];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// UTF-8 HTML with absolute links and a single charset declaration.
    Document(Vec<u8>),
    /// Non-HTML content; the client should fetch it directly from here.
    Redirect(String),
}

/// Fetcher and detector shared by every conversion.
#[derive(Clone)]
pub struct Relay {
    fetcher: Arc<dyn Fetcher>,
    detector: Arc<dyn EncodingDetector>,
}

impl Relay {
    pub fn new(fetcher: Arc<dyn Fetcher>, detector: Arc<dyn EncodingDetector>) -> Self {
        Self { fetcher, detector }
    }

    /// Converts the page at `target`. `service_host` is the `host[:port]`
    /// the relay itself is reached on.
    pub fn convert(&self, service_host: &str, target: &TargetAddress) -> RelayResult<ConvertOutcome> {
        if host_port_key(&target.netloc()) == host_port_key(service_host) {
            return Err(RelayError::self_reference());
        }

        let url = target.request_url().map_err(|error| match error.kind {
            ErrorKind::UnsupportedScheme => error,
            _ => fetch_failed(&error),
        })?;

        let fetched = self
            .fetcher
            .fetch(url.as_str())
            .map_err(|error| fetch_failed(&error))?;

        if !ACCEPTED_STATUSES.contains(&fetched.status) {
            tracing::info!(url = %url, status = fetched.status, "origin status rejected");
            return Err(RelayError::fetch(
                "relay.status_rejected",
                format!(
                    "could not fetch web page, {} {}",
                    fetched.status,
                    reason_phrase(fetched.status)
                ),
            ));
        }

        if !fetched.content_type.to_ascii_lowercase().contains("html") {
            tracing::debug!(
                url = %url,
                content_type = %fetched.content_type,
                "not html, redirecting"
            );
            return Ok(ConvertOutcome::Redirect(fetched.resolved_url));
        }

        let detection = self.detector.detect(&fetched.body);
        if !detection.is_confident() {
            tracing::info!(
                url = %url,
                encoding = %detection.encoding_name,
                confidence = detection.confidence,
                "encoding detection below threshold"
            );
            return Err(RelayError::undetectable_encoding());
        }

        let text = gk_encoding::decode(&fetched.body, &detection).map_err(|error| {
            tracing::info!(url = %url, error = %error, "decode failed");
            RelayError::undetectable_encoding()
        })?;

        let document = gk_rewrite::rewrite(&text, &fetched.resolved_url).map_err(|error| {
            tracing::info!(url = %url, error = %error, "rewrite failed");
            RelayError::malformed_document("relay.document_malformed", "could not parse web page")
        })?;

        let bytes = gk_html::serialize(&document);
        tracing::debug!(
            url = %url,
            encoding = %detection.encoding_name,
            bytes = bytes.len(),
            "page converted"
        );

        Ok(ConvertOutcome::Document(bytes))
    }
}

fn fetch_failed(error: &RelayError) -> RelayError {
    tracing::info!(error = %error, "fetch failed");
    RelayError::fetch("relay.fetch_failed", "could not fetch web page, invalid URL")
}
