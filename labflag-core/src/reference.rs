//! Reference ranges printed on lab reports ("3.5 - 5.1", "<= 5.0", ...).

use serde::{Deserialize, Serialize};

use crate::catalog::OTHER_CATEGORY;
use crate::normalize::canonical_test_id;
use crate::ReferenceRange;

const QUALITATIVE: &[&str] = &[
    "negative",
    "non-reactive",
    "nonreactive",
    "non reactive",
    "not detected",
    "absent",
    "normal",
];

/// Bounds a producer reported alongside a value. Either side may be open.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportedRange {
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

impl ReportedRange {
    pub fn is_bounded(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }

    /// Range usable by the classifier, or `None` when the bounds are missing,
    /// non-finite or inverted. Open sides become infinite.
    pub fn to_reference_range(&self, test_id: &str, unit: &str) -> Option<ReferenceRange> {
        if !self.is_bounded() {
            return None;
        }
        if !self.low.into_iter().chain(self.high).all(f64::is_finite) {
            return None;
        }
        if let (Some(low), Some(high)) = (self.low, self.high) {
            if low > high {
                return None;
            }
        }

        Some(
            ReferenceRange::new(
                canonical_test_id(test_id),
                test_id.trim(),
                unit.trim(),
                self.low.unwrap_or(f64::NEG_INFINITY),
                self.high.unwrap_or(f64::INFINITY),
            )
            .in_category(OTHER_CATEGORY),
        )
    }
}

/// Parse report text into bounds. Multi-population text keeps the first
/// population; qualitative and unreadable text gives `None`.
pub fn parse_reference_range(raw: &str) -> Option<ReportedRange> {
    let mut text = raw.trim();
    if text.is_empty() || QUALITATIVE.contains(&text.to_lowercase().as_str()) {
        return None;
    }

    if let Some((first, _)) = text.split_once(';') {
        text = first.trim();
        if let Some((_, after_label)) = text.split_once(':') {
            text = after_label.trim();
        }
    }

    if let Some((low, high)) = bounded(text) {
        return Some(ReportedRange {
            low: Some(low),
            high: Some(high),
        });
    }
    if let Some(high) = after_comparator(text, &['<', '≤']) {
        return Some(ReportedRange {
            low: None,
            high: Some(high),
        });
    }
    after_comparator(text, &['>', '≥']).map(|low| ReportedRange {
        low: Some(low),
        high: None,
    })
}

/// First "low - high" pair, with `-`, `–`, `—` or `to` between the numbers.
fn bounded(text: &str) -> Option<(f64, f64)> {
    let mut previous: Option<char> = None;
    for (start, c) in text.char_indices() {
        let continues_number = previous.is_some_and(|p| p.is_ascii_digit() || p == '.');
        previous = Some(c);
        if continues_number {
            continue;
        }
        let Some((low, rest)) = leading_number(&text[start..]) else {
            continue;
        };
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix(['-', '–', '—'])
            .or_else(|| rest.strip_prefix("to"));
        if let Some((high, _)) = rest.and_then(|rest| leading_number(rest.trim_start())) {
            return Some((low, high));
        }
    }
    None
}

fn after_comparator(text: &str, comparators: &[char]) -> Option<f64> {
    let (_, rest) = text.split_once(comparators)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
    leading_number(rest).map(|(value, _)| value)
}

/// `[+-]?digits(.digits)?` at the start of `text`.
fn leading_number(text: &str) -> Option<(f64, &str)> {
    let bytes = text.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(low: Option<f64>, high: Option<f64>) -> Option<ReportedRange> {
        Some(ReportedRange { low, high })
    }

    #[test]
    fn two_sided_ranges() {
        assert_eq!(parse_reference_range("3.5 - 5.1"), range(Some(3.5), Some(5.1)));
        assert_eq!(parse_reference_range("3.5–5.1"), range(Some(3.5), Some(5.1)));
        assert_eq!(parse_reference_range("3.5—5.1 mmol/L"), range(Some(3.5), Some(5.1)));
        assert_eq!(parse_reference_range("150 to 400"), range(Some(150.0), Some(400.0)));
        assert_eq!(parse_reference_range("-2 - 2"), range(Some(-2.0), Some(2.0)));
    }

    #[test]
    fn one_sided_ranges() {
        assert_eq!(parse_reference_range("<= 5.0"), range(None, Some(5.0)));
        assert_eq!(parse_reference_range("≤5.0"), range(None, Some(5.0)));
        assert_eq!(parse_reference_range("< 0.04 ng/mL"), range(None, Some(0.04)));
        assert_eq!(parse_reference_range(">= 1.0"), range(Some(1.0), None));
        assert_eq!(parse_reference_range("> 60"), range(Some(60.0), None));
    }

    #[test]
    fn first_population_wins() {
        assert_eq!(
            parse_reference_range("Adult: 3.5-5.1; Child: 3.0-4.5"),
            range(Some(3.5), Some(5.1))
        );
    }

    #[test]
    fn qualitative_text_has_no_bounds() {
        assert_eq!(parse_reference_range("Negative"), None);
        assert_eq!(parse_reference_range("Non-reactive"), None);
        assert_eq!(parse_reference_range(" "), None);
        assert_eq!(parse_reference_range("see comment"), None);
    }

    #[test]
    fn one_sided_range_classifies_and_prints_open_side() {
        let reference = range(None, Some(5.0))
            .and_then(|reported| reported.to_reference_range("Vitamin B12 Ratio", "mg/L"))
            .unwrap();
        assert_eq!(reference.test_id, "vitamin_b12_ratio");
        assert_eq!(reference.category, OTHER_CATEGORY);
        assert_eq!(reference.range_text(), "≤ 5 mg/L");
        assert_eq!(crate::classify_value(&reference, 5.0), crate::LabStatus::Normal);
        assert_eq!(crate::classify_value(&reference, 7.5), crate::LabStatus::High);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let inverted = ReportedRange {
            low: Some(9.0),
            high: Some(2.0),
        };
        assert!(inverted.to_reference_range("x", "").is_none());
        assert!(ReportedRange::default().to_reference_range("x", "").is_none());
    }
}
