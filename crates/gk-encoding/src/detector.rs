//! Statistical detector: BOM sniffing, ASCII and UTF-8 validation, then
//! `chardetng` for legacy encodings.

use crate::DetectionResult;
use crate::EncodingDetector;
use encoding_rs::Encoding;

const MAX_CONFIDENCE: f32 = 0.99;
/// Multi-byte sequences after which valid UTF-8 gets full confidence.
const UTF8_SATURATION: i32 = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalDetector;

impl EncodingDetector for StatisticalDetector {
    fn detect(&self, bytes: &[u8]) -> DetectionResult {
        let result = detect_bytes(bytes);
        tracing::debug!(
            encoding = result.encoding_name.as_str(),
            confidence = result.confidence,
            len = bytes.len(),
            "detected encoding"
        );
        result
    }
}

fn detect_bytes(bytes: &[u8]) -> DetectionResult {
    if bytes.is_empty() {
        return DetectionResult::new("ascii", 0.0);
    }

    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return DetectionResult::new(encoding.name(), 1.0);
    }

    // ESC can start ISO-2022 sequences, which are otherwise pure ASCII.
    if bytes.iter().all(|byte| byte.is_ascii() && *byte != 0x1b) {
        return DetectionResult::new("ascii", 1.0);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        let multibyte = text.chars().filter(|ch| !ch.is_ascii()).count();
        return DetectionResult::new("utf-8", utf8_confidence(multibyte));
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let (encoding, assessed) = detector.guess_assess(None, true);
    let (text, _) = encoding.decode_without_bom_handling(bytes);

    let ceiling = if assessed {
        MAX_CONFIDENCE
    } else {
        MAX_CONFIDENCE * 0.5
    };

    DetectionResult::new(encoding.name(), ceiling * plausibility(&text))
}

fn utf8_confidence(multibyte: usize) -> f32 {
    match i32::try_from(multibyte) {
        Ok(count) if count < UTF8_SATURATION => 1.0 - MAX_CONFIDENCE * 0.5_f32.powi(count),
        _ => MAX_CONFIDENCE,
    }
}

/// Share of decoded characters that look like real text rather than
/// decoding damage or binary noise.
fn plausibility(text: &str) -> f32 {
    let mut considered = 0_usize;
    let mut suspicious = 0_usize;

    for ch in text.chars() {
        let control = is_suspicious_control(ch);
        if !ch.is_ascii() || control {
            considered += 1;
        }
        if control || ch == char::REPLACEMENT_CHARACTER {
            suspicious += 1;
        }
    }

    if considered == 0 {
        return 1.0;
    }

    let ratio = suspicious as f32 / considered as f32;
    1.0 - ratio
}

fn is_suspicious_control(ch: char) -> bool {
    match ch {
        '\t' | '\n' | '\r' | '\u{0c}' => false,
        '\u{00}'..='\u{1f}' | '\u{7f}'..='\u{9f}' => true,
        _ => false,
    }
}
