//! Translation quality scoring
//!
//! Heuristic score in [0, 1]: 0.95 base, heavily penalised when the
//! "translation" equals the source, penalised for implausible length ratios
//! and for HTML tag mismatches, with a small bonus for a natural ratio.
//! Text containing HTML must preserve the tag structure exactly.

use regex::Regex;
use std::sync::OnceLock;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?([a-zA-Z][a-zA-Z0-9]*)").expect("valid regex"))
}

/// Multiset of HTML tag names in order-independent, count-sensitive form.
fn tag_set(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = tag_regex()
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect();
    tags.sort();
    tags
}

pub fn score(source: &str, translated: &str) -> f64 {
    let mut score: f64 = 0.95;

    if translated.trim() == source.trim() {
        score *= 0.1;
    }

    let source_len = source.chars().count().max(1) as f64;
    let translated_len = translated.chars().count() as f64;
    let ratio = translated_len / source_len;

    if !(0.5..=2.0).contains(&ratio) {
        score *= 0.7;
    }

    if tag_set(source) != tag_set(translated) {
        score *= 0.5;
    }

    if (0.7..=1.5).contains(&ratio) {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_translation_scores_high() {
        let s = score("Hello, how are you today?", "Hallo, wie geht es dir heute?");
        assert!(s >= 0.9, "expected high score, got {}", s);
    }

    #[test]
    fn test_identity_translation_penalised() {
        let s = score("Hello world", "Hello world");
        assert!(s < 0.2, "identity must be heavily penalised, got {}", s);
    }

    #[test]
    fn test_length_ratio_penalty() {
        let s = score("A fairly long source sentence for the ratio check", "ok");
        assert!(s < 0.7, "short output must be penalised, got {}", s);
    }

    #[test]
    fn test_html_tag_mismatch_penalised() {
        let ok = score("<b>Hello</b> world", "<b>Hallo</b> Welt");
        let broken = score("<b>Hello</b> world", "Hallo Welt");
        assert!(ok > broken);
        assert!(broken < 0.6);
    }

    #[test]
    fn test_tag_order_does_not_matter_for_set() {
        let s = score("<b>Hi</b> <i>there</i>", "<i>Hallo</i> <b>du</b>");
        assert!(s >= 0.9);
    }

    #[test]
    fn test_score_clamped() {
        for (source, translated) in [("a", "a"), ("hello", "bonjour"), ("<p>x</p>", "yyyyyyyyyyyyyyyy")] {
            let s = score(source, translated);
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
