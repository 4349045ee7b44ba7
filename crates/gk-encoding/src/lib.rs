//! Character encoding detection over raw response bytes, and decoding with
//! the detected encoding.

pub mod detector;

use encoding_rs::Encoding;
use gk_core::ErrorKind;
use gk_core::RelayError;
use gk_core::RelayResult;

pub use detector::StatisticalDetector;

/// Detections at or below this confidence are rejected.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub encoding_name: String,
    /// In `[0, 1]`.
    pub confidence: f32,
}

impl DetectionResult {
    pub fn new(encoding_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            encoding_name: encoding_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_confident(&self) -> bool {
        self.confidence > CONFIDENCE_THRESHOLD
    }
}

/// Guesses the encoding of a byte stream without consulting markup.
pub trait EncodingDetector: Send + Sync {
    fn detect(&self, bytes: &[u8]) -> DetectionResult;
}

/// Decodes `bytes` with the detected encoding. A leading byte-order mark
/// wins over the label and is stripped; malformed sequences become U+FFFD.
pub fn decode(bytes: &[u8], detection: &DetectionResult) -> RelayResult<String> {
    let encoding = Encoding::for_label(detection.encoding_name.as_bytes()).ok_or_else(|| {
        RelayError::with_kind(
            ErrorKind::Encoding,
            "encoding.label_unknown",
            format!("unknown encoding label `{}`", detection.encoding_name),
        )
    })?;

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "decoded with replacement characters");
    }

    Ok(text.into_owned())
}
