//! Token estimation
//!
//! Caps and thresholds count estimated tokens, not characters. The
//! estimate is the usual 4-graphemes-per-token rule; exact counts are the
//! model's business, the tiers only need a stable budget measure.

use unicode_segmentation::UnicodeSegmentation;

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let graphemes = text.graphemes(true).count();
    (graphemes / 4).max(1)
}
