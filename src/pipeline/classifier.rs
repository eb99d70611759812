//! Heuristic text classifier.
//!
//! Keyword presence drives sentiment and complexity; borderline complexity and
//! the confidence jitter come from a salted SHA-256 of the text, so the same
//! input always classifies the same way, across runs and processes.
//!
//! Pure string work, no I/O, never panics.

use sha2::{Digest, Sha256};

use crate::pipeline::types::{Analysis, Complexity, Sentiment};

/// Negative-sentiment keywords (English + Russian).
const NEGATIVE_KEYWORDS: &[&str] = &[
    "angry", "furious", "terrible", "worst", "hate", "disgusting",
    "unacceptable", "fraud", "scam", "lawsuit", "lawyer", "refund",
    "complaint", "disappointed", "horrible", "awful", "broken",
    "не работает", "ужасно", "верните деньги", "жалоба", "обман",
    "разочарован", "отвратительно", "кошмар", "безобразие",
];

/// Positive-sentiment keywords (English + Russian).
const POSITIVE_KEYWORDS: &[&str] = &[
    "thank", "thanks", "great", "excellent", "awesome", "love",
    "amazing", "wonderful", "helpful", "good", "best",
    "спасибо", "отлично", "замечательно", "прекрасно", "хорошо",
];

/// Keywords that signal a request needs more handling effort.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "integration", "api", "multiple", "enterprise", "migration",
    "compliance", "security", "breach", "urgent", "critical",
    "escalate", "manager", "legal", "contract", "sla",
    "интеграция", "миграция", "безопасность", "критично", "срочно",
    "руководство", "договор", "юридический",
];

const RESPONSE_TEMPLATES: &[((Complexity, Sentiment), &str)] = &[
    (
        (Complexity::Low, Sentiment::Positive),
        "Thank you for your kind feedback! We're glad we could help. Is there anything else we can assist you with?",
    ),
    (
        (Complexity::Low, Sentiment::Neutral),
        "Thank you for reaching out. We've reviewed your request and here's what we suggest: please check our FAQ section for quick answers, or reply to this email for further assistance.",
    ),
    (
        (Complexity::Low, Sentiment::Negative),
        "We're sorry to hear about your experience. We take your feedback seriously and would like to resolve this issue. A support agent will follow up within 24 hours.",
    ),
    (
        (Complexity::High, Sentiment::Positive),
        "Thank you for your detailed message. Due to the complexity of your request, we've assigned a specialist to review it. You'll receive a response within 48 hours.",
    ),
    (
        (Complexity::High, Sentiment::Neutral),
        "We've received your request which requires additional review from our technical team. A specialist will be assigned to your case shortly.",
    ),
    (
        (Complexity::High, Sentiment::Negative),
        "We sincerely apologize for the inconvenience. Your case has been escalated to our senior support team for immediate attention. Expect a response within 12 hours.",
    ),
];

const GENERIC_ACKNOWLEDGEMENT: &str =
    "Thank you for contacting us. Your request is being reviewed.";

const BASE_CONFIDENCE: f64 = 0.70;
const SIGNAL_WEIGHT: f64 = 0.05;
const JITTER_SPAN: f64 = 0.10;
const MIN_CONFIDENCE: f64 = 0.50;
const MAX_CONFIDENCE: f64 = 0.99;

/// Classify a message text.
pub fn analyze(text: &str) -> Analysis {
    let lower = text.to_lowercase();

    let negative = keyword_hits(&lower, NEGATIVE_KEYWORDS);
    let positive = keyword_hits(&lower, POSITIVE_KEYWORDS);
    let complex = keyword_hits(&lower, COMPLEXITY_KEYWORDS);
    let word_count = text.split_whitespace().count();

    let sentiment = if negative > positive {
        Sentiment::Negative
    } else if positive > negative {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    };

    let complexity = if complex >= 2 || word_count > 200 {
        Complexity::High
    } else if complex == 1 || word_count > 100 {
        if stable_fraction(text, "complexity") > 0.5 {
            Complexity::High
        } else {
            Complexity::Low
        }
    } else {
        Complexity::Low
    };

    let signal = negative.abs_diff(positive) + complex;
    let mut confidence = (BASE_CONFIDENCE + signal as f64 * SIGNAL_WEIGHT).min(MAX_CONFIDENCE);
    confidence += (stable_fraction(text, "confidence") - 0.5) * JITTER_SPAN;
    let confidence = round2(confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE));

    Analysis {
        complexity,
        sentiment,
        confidence,
        suggested_response: suggested_response(complexity, sentiment).to_string(),
    }
}

/// Canned reply text for a classification.
pub fn suggested_response(complexity: Complexity, sentiment: Sentiment) -> &'static str {
    RESPONSE_TEMPLATES
        .iter()
        .find(|(key, _)| *key == (complexity, sentiment))
        .map(|(_, text)| *text)
        .unwrap_or(GENERIC_ACKNOWLEDGEMENT)
}

/// Number of distinct keywords present as substrings.
fn keyword_hits(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| lower.contains(*kw)).count()
}

/// Deterministic value in `[0, 1)` derived from `text + salt`.
pub fn stable_fraction(text: &str, salt: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(prefix) / (f64::from(u32::MAX) + 1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_short_message() {
        let analysis = analyze("Thank you so much, great service!");
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.complexity, Complexity::Low);
        assert_eq!(
            analysis.suggested_response,
            suggested_response(Complexity::Low, Sentiment::Positive)
        );
    }

    #[test]
    fn negative_with_two_complexity_signals() {
        let analysis = analyze(
            "This is unacceptable. I want a refund or I will file a lawsuit. \
             This is urgent, please escalate.",
        );
        assert_eq!(analysis.sentiment, Sentiment::Negative);
        assert_eq!(analysis.complexity, Complexity::High);
    }

    #[test]
    fn long_neutral_message_is_high_complexity() {
        let text = "lorem ".repeat(250);
        let analysis = analyze(&text);
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert_eq!(analysis.complexity, Complexity::High);
    }

    #[test]
    fn empty_text() {
        let analysis = analyze("");
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert_eq!(analysis.complexity, Complexity::Low);
        // 0.70 ± 0.05 jitter
        assert!((0.65..=0.75).contains(&analysis.confidence));
    }

    #[test]
    fn ties_are_neutral() {
        let analysis = analyze("great product but the box was broken");
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn keyword_matching_is_case_insensitive_substring() {
        // "THANKS" also contains "thank": two positive hits.
        assert_eq!(keyword_hits(&"THANKS".to_lowercase(), POSITIVE_KEYWORDS), 2);
        // Substring, not word boundary: "rapid" contains "api".
        assert_eq!(keyword_hits("rapid", COMPLEXITY_KEYWORDS), 1);
    }

    #[test]
    fn russian_keywords_count() {
        let analysis = analyze("Ужасно! Ничего не работает, верните деньги");
        assert_eq!(analysis.sentiment, Sentiment::Negative);
    }

    #[test]
    fn analyze_is_deterministic() {
        let inputs = [
            "",
            "hello",
            "We need an API integration for multiple enterprise accounts",
            "Спасибо, всё отлично",
            "single api question",
        ];
        for text in inputs {
            assert_eq!(analyze(text), analyze(text), "input {text:?}");
        }
    }

    #[test]
    fn borderline_complexity_follows_the_hash() {
        // Exactly one complexity keyword, short text: decided by the hash.
        let text = "Question about the api";
        let expected = if stable_fraction(text, "complexity") > 0.5 {
            Complexity::High
        } else {
            Complexity::Low
        };
        assert_eq!(analyze(text).complexity, expected);
    }

    #[test]
    fn confidence_formula() {
        // pos=2 ("thank", "great"), neg=0, complex=0 -> 0.80 before jitter.
        let text = "Thank you so much, great service!";
        let jitter = (stable_fraction(text, "confidence") - 0.5) * 0.10;
        let expected = round2((0.80 + jitter).clamp(0.5, 0.99));
        assert_eq!(analyze(text).confidence, expected);
    }

    #[test]
    fn confidence_stays_in_range_for_strong_signals() {
        let text = "angry furious terrible worst hate disgusting unacceptable fraud scam \
                    lawsuit lawyer refund complaint urgent critical legal contract sla";
        let analysis = analyze(text);
        assert!(analysis.confidence <= 0.99);
        assert!(analysis.confidence >= 0.50);
    }

    #[test]
    fn confidence_has_two_decimals() {
        for text in ["a", "bb", "ccc", "Thanks!", "refund now"] {
            let c = analyze(text).confidence;
            assert!(((c * 100.0).round() - c * 100.0).abs() < 1e-9, "{c}");
        }
    }

    #[test]
    fn stable_fraction_is_salted() {
        let a = stable_fraction("same text", "complexity");
        let b = stable_fraction("same text", "confidence");
        assert_ne!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert!((0.0..1.0).contains(&b));
        assert_eq!(a, stable_fraction("same text", "complexity"));
    }

    #[test]
    fn every_pair_has_a_template() {
        for complexity in [Complexity::Low, Complexity::High] {
            for sentiment in [Sentiment::Negative, Sentiment::Neutral, Sentiment::Positive] {
                assert_ne!(suggested_response(complexity, sentiment), GENERIC_ACKNOWLEDGEMENT);
            }
        }
    }
}
