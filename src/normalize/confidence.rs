//! Deterministic confidence scoring for normalized insights.
//!
//! Scores land in `[0, 1]`:
//! - `0.0–0.3`: low-information noise (filtered at ingest)
//! - `0.3–0.6`: marginal quality
//! - `0.6–1.0`: high-value insight

use crate::models::{Frame, Insight};
use regex::Regex;
use std::sync::LazyLock;

static GENERIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^.+ is a (type of|kind of|form of) .+$",
        r"(?i)^.+ (can be|may be) .+$",
        r"(?i)^.+ (has|have) .+$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Multiplier applied for the insight's frame. Causal, constraint, and
/// pattern frames carry the most transferable information; taxonomy the
/// least.
const fn frame_weight(frame: Frame) -> f32 {
    match frame {
        Frame::Causal | Frame::Constraint | Frame::Pattern => 1.0,
        Frame::Procedure => 0.9,
        Frame::Equivalence => 0.8,
        Frame::Taxonomy => 0.6,
    }
}

/// Computes the deterministic confidence score for an insight.
///
/// Starts at 1.0 and multiplies penalty factors: very short normalized
/// text, generic phrasing, low information density (few extracted
/// subjects), and the frame weight. The result is clamped to `[0, 1]`.
#[must_use]
pub fn compute_confidence(insight: &Insight) -> f32 {
    let mut score = 1.0_f32;

    // Length: very short insights are likely generic
    let length = insight.normalized_text.chars().count();
    if length < 20 {
        score *= 0.3;
    } else if length < 40 {
        score *= 0.7;
    }

    // Generic phrase detection (first match only)
    if GENERIC_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&insight.normalized_text))
    {
        score *= 0.5;
    }

    // Information density: count extracted subjects
    let info_count =
        insight.entities.len() + insight.problems.len() + insight.resolutions.len();
    match info_count {
        0 => score *= 0.4,
        1 => score *= 0.7,
        _ => {},
    }

    score *= frame_weight(insight.frame);

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn insight_with(normalized: &str, frame: Frame, entities: usize) -> Insight {
        let mut insight = Insight::new("raw");
        insight.normalized_text = normalized.to_string();
        insight.frame = frame;
        insight.entities = (0..entities).map(|i| format!("e{i}")).collect();
        insight
    }

    #[test]
    fn test_rich_causal_insight_keeps_full_score() {
        let insight = insight_with(
            "Missing null checks in JWT parsing causes auth failures in production",
            Frame::Causal,
            2,
        );
        assert!((compute_confidence(&insight) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_very_short_text_is_penalized() {
        let insight = insight_with("X causes Y", Frame::Causal, 2);
        assert!((compute_confidence(&insight) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_medium_text_is_mildly_penalized() {
        // 20..40 chars
        let insight = insight_with("Caching causes stale config", Frame::Causal, 2);
        assert!((compute_confidence(&insight) - 0.7).abs() < 1e-6);
    }

    #[test_case("Redis is a type of key-value store used for distributed caching")]
    #[test_case("Connection pools can be exhausted under sustained request bursts")]
    #[test_case("Async runtimes have cooperative scheduling across await points here")]
    fn test_generic_phrases_are_penalized(text: &str) {
        let insight = insight_with(text, Frame::Causal, 2);
        assert!((compute_confidence(&insight) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_information_density_factors() {
        let empty = insight_with(
            "Reordering middleware before validation fixes the handshake",
            Frame::Causal,
            0,
        );
        assert!((compute_confidence(&empty) - 0.4).abs() < 1e-6);

        let single = insight_with(
            "Reordering middleware before validation fixes the handshake",
            Frame::Causal,
            1,
        );
        assert!((compute_confidence(&single) - 0.7).abs() < 1e-6);
    }

    #[test_case(Frame::Causal, 1.0)]
    #[test_case(Frame::Constraint, 1.0)]
    #[test_case(Frame::Pattern, 1.0)]
    #[test_case(Frame::Procedure, 0.9)]
    #[test_case(Frame::Equivalence, 0.8)]
    #[test_case(Frame::Taxonomy, 0.6)]
    fn test_frame_weights(frame: Frame, expected: f32) {
        let insight = insight_with(
            "Reordering middleware before body validation fixes the handshake",
            frame,
            2,
        );
        assert!((compute_confidence(&insight) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_score_is_clamped() {
        let insight = insight_with("short", Frame::Taxonomy, 0);
        let score = compute_confidence(&insight);
        assert!((0.0..=1.0).contains(&score));
    }
}
