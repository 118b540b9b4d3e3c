//! Plate text normalization.
//!
//! Raw recognizer output is noisy: stray punctuation, OCR confusions, and
//! region glyphs the recognizer emits around the registration characters.
//! This module reduces a raw reading to a canonical plate identifier, or
//! rejects it. Two readings that normalize to the same string are treated as
//! the same vehicle for the rest of the pipeline.

use std::sync::OnceLock;

/// Minimum recognizer confidence, integer percent. Readings at or below this
/// are discarded before normalization.
pub const MIN_CONFIDENCE_PCT: u8 = 60;

/// Accepted plate identifier length range, in characters after cleaning.
pub const MIN_PLATE_LEN: usize = 4;
pub const MAX_PLATE_LEN: usize = 10;

/// Glyph some recognizers emit for the region prefix on Chinese plates; it is
/// a word character so the non-word strip leaves it alone.
const REGION_GLYPH: &str = "\u{7ca4}";

/// Convert a recognizer score in 0.0..=1.0 to an integer percent.
/// NaN collapses to 0 so broken scores fail the confidence gate.
pub fn confidence_percent(score: f32) -> u8 {
    if score.is_nan() {
        return 0;
    }
    (score * 100.0).clamp(0.0, 100.0) as u8
}

/// Strip non-word characters and known OCR artifacts, uppercase, and map
/// `O` to `0`. Deterministic and idempotent; applying it to its own output
/// returns the input unchanged.
pub fn clean_plate_text(raw: &str) -> String {
    static NON_WORD: OnceLock<regex::Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| regex::Regex::new(r"\W").unwrap());

    let text = re.replace_all(raw, "");
    let text = text.replace("???", "");
    let text = text.replace(REGION_GLYPH, "");
    // Uppercase before the O mapping so a lowercase `o` folds to `0` in the
    // same pass and the function stays idempotent.
    text.to_uppercase().replace('O', "0")
}

/// Normalize a raw reading into a canonical plate identifier.
///
/// Returns `None` (no candidate) when the confidence is at or below the gate,
/// when the cleaned text falls outside the accepted length range, or when it
/// contains no digit.
pub fn normalize_plate(raw: &str, confidence_pct: u8) -> Option<String> {
    if confidence_pct <= MIN_CONFIDENCE_PCT {
        return None;
    }
    let plate = clean_plate_text(raw);
    if plate.len() < MIN_PLATE_LEN || plate.len() > MAX_PLATE_LEN {
        return None;
    }
    if !plate.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(plate)
}
