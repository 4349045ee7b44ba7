//! Shared primitives used across Gknot crates.

use core::fmt;

/// Result alias used across the workspace.
pub type RelayResult<T> = Result<T, RelayError>;

/// Failure classes a conversion request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Target resolves to the service's own host.
    SelfReference,
    /// Scheme other than `http`/`https`.
    UnsupportedScheme,
    /// Network failure or a status code outside the accepted set.
    Fetch,
    /// Encoding detection confidence too low, or an unknown encoding label.
    Encoding,
    /// Structural element missing from the parsed document.
    MalformedDocument,
    /// Source URL handed to the landing endpoint could not be parsed.
    InvalidAddress,
    /// Transport, protocol, or configuration fault below the request policy.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfReference => "self_reference",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::Fetch => "fetch",
            Self::Encoding => "encoding",
            Self::MalformedDocument => "malformed_document",
            Self::InvalidAddress => "invalid_address",
            Self::Internal => "internal",
        }
    }
}

/// Top-level error type: a taxonomy kind, a stable dotted code, and a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl RelayError {
    /// Internal fault; the common case for transport and protocol errors.
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, code, message)
    }

    pub fn with_kind(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn self_reference() -> Self {
        Self::with_kind(
            ErrorKind::SelfReference,
            "relay.self_reference",
            "space-time continuum interruption",
        )
    }

    pub fn unsupported_scheme() -> Self {
        Self::with_kind(
            ErrorKind::UnsupportedScheme,
            "relay.scheme_unsupported",
            "only HTTP and HTTPS are supported",
        )
    }

    pub fn fetch(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Fetch, code, message)
    }

    pub fn undetectable_encoding() -> Self {
        Self::with_kind(
            ErrorKind::Encoding,
            "relay.encoding_undetectable",
            "could not detect page encoding",
        )
    }

    pub fn malformed_document(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::MalformedDocument, code, message)
    }

    pub fn invalid_address(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidAddress, code, message)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RelayError {}
