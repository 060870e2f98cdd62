//! Lab-value flagging core: reference catalog, classification engine and
//! panel aggregation shared by every lab view.

mod catalog;
mod classify;
mod normalize;
mod panel;
mod reference;
mod trend;
mod units;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use catalog::{ReferenceCatalog, OTHER_CATEGORY};
pub use classify::{classify_value, Classifier};
pub use normalize::canonical_test_id;
pub use panel::{dedup_observations, sort_for_triage, summarize};
pub use reference::{parse_reference_range, ReportedRange};
pub use trend::{severity_score, sort_by_severity};
pub use units::{convert_for_test, convert_value, normalize_unit};

/// Tunables for trend detection and severity ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabConfig {
    /// Direction reversals in a series before it is called fluctuating.
    pub fluctuation_reversals: u32,
    /// Upper bound on the percentage change fed into the severity score.
    pub pct_change_cap: f64,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            fluctuation_reversals: 2,
            pct_change_cap: 200.0,
        }
    }
}

/// Severity classification of a single lab value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    Normal,
    Low,
    High,
    CriticalLow,
    CriticalHigh,
    Unknown,
}

impl LabStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Low => "low",
            Self::High => "high",
            Self::CriticalLow => "critical_low",
            Self::CriticalHigh => "critical_high",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_critical(self) -> bool {
        matches!(self, Self::CriticalLow | Self::CriticalHigh)
    }

    /// Plain low/high only; critical and unknown are counted separately.
    pub fn is_abnormal(self) -> bool {
        matches!(self, Self::Low | Self::High)
    }

    /// Which bound the value violated, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Self::Low | Self::CriticalLow => Some(Side::Low),
            Self::High | Self::CriticalHigh => Some(Side::High),
            Self::Normal | Self::Unknown => None,
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Low,
    High,
}

/// A raw result as entered or reported: a number or free text such as "trace".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LabValue {
    Numeric(f64),
    Text(String),
}

impl LabValue {
    /// Numeric reading, if the value is a finite number or a numeric string.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => value.is_finite().then_some(*value),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
            }
        }
    }

    /// The value as the user or the lab reported it.
    pub fn display_text(&self) -> String {
        match self {
            Self::Numeric(value) => format_number(*value),
            Self::Text(text) => text.clone(),
        }
    }
}

impl From<f64> for LabValue {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for LabValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LabValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Expected clinical range for one test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    pub test_id: String,
    pub display_name: String,
    #[serde(default)]
    pub unit: String,
    pub normal_low: f64,
    pub normal_high: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_high: Option<f64>,
    #[serde(default)]
    pub category: String,
}

impl ReferenceRange {
    pub fn new(
        test_id: impl Into<String>,
        display_name: impl Into<String>,
        unit: impl Into<String>,
        normal_low: f64,
        normal_high: f64,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            display_name: display_name.into(),
            unit: unit.into(),
            normal_low,
            normal_high,
            critical_low: None,
            critical_high: None,
            category: String::new(),
        }
    }

    pub fn with_critical(mut self, low: Option<f64>, high: Option<f64>) -> Self {
        self.critical_low = low;
        self.critical_high = high;
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// "136–145 mmol/L", or "0.8–1.2" for dimensionless tests.
    /// Open sides (report ranges such as "< 5") print as "≤ 5".
    pub fn range_text(&self) -> String {
        let bounds = match (self.normal_low.is_finite(), self.normal_high.is_finite()) {
            (true, true) => format!(
                "{}–{}",
                format_number(self.normal_low),
                format_number(self.normal_high)
            ),
            (false, true) => format!("≤ {}", format_number(self.normal_high)),
            (true, false) => format!("≥ {}", format_number(self.normal_low)),
            (false, false) => return String::new(),
        };
        with_unit(bounds, &self.unit)
    }

    pub fn format_value(&self, value: f64) -> String {
        with_unit(format_number(value), &self.unit)
    }
}

/// One observed value for one test on one patient at one time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub test_id: String,
    pub value: LabValue,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub previous_value: Option<LabValue>,
    /// Unit as reported by the producer; `None` means the catalog unit.
    /// `previous_value` is in the same unit.
    #[serde(default)]
    pub unit: Option<String>,
    /// Range printed on the report, used when the catalog has no entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<ReportedRange>,
}

impl Measurement {
    pub fn new(test_id: impl Into<String>, value: impl Into<LabValue>) -> Self {
        Self {
            test_id: test_id.into(),
            value: value.into(),
            observed_at: None,
            previous_value: None,
            unit: None,
            reference_range: None,
        }
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    pub fn with_previous(mut self, previous: impl Into<LabValue>) -> Self {
        self.previous_value = Some(previous.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_reported_range(mut self, range: ReportedRange) -> Self {
        self.reference_range = Some(range);
        self
    }
}

/// Engine output for one measurement, ready to render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub test_id: String,
    pub display_name: String,
    pub category: String,
    pub status: LabStatus,
    pub value: Option<f64>,
    pub formatted_value: String,
    pub reference_range_text: String,
    pub delta: Option<f64>,
    pub is_improving: bool,
    pub is_worsening: bool,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Status counts for a panel, patient or ward.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelSummary {
    pub normal_count: usize,
    pub abnormal_count: usize,
    pub critical_count: usize,
    #[serde(default)]
    pub unknown_count: usize,
    #[serde(default)]
    pub latest_observed_at: Option<DateTime<Utc>>,
}

/// Tests that share a display section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryGroup {
    pub category: String,
    pub test_ids: Vec<String>,
}

/// Direction of a series relative to the violated bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
    Fluctuating,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub observed_at: Option<DateTime<Utc>>,
    pub value: f64,
}

/// Trend for one test across its numeric observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabTrend {
    pub test_id: String,
    pub display_name: String,
    pub direction: TrendDirection,
    pub pct_change: f64,
    pub latest_value: f64,
    pub latest_status: LabStatus,
    pub severity_score: f64,
    pub points: Vec<TrendPoint>,
}

/// Everything a lab view needs for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabSnapshot {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ClassificationResult>,
    pub summary: PanelSummary,
    pub groups: Vec<CategoryGroup>,
    pub trends: Vec<LabTrend>,
}

impl LabSnapshot {
    pub fn new(
        results: Vec<ClassificationResult>,
        groups: Vec<CategoryGroup>,
        mut trends: Vec<LabTrend>,
    ) -> Self {
        sort_by_severity(&mut trends);
        Self {
            generated_at: Utc::now(),
            summary: summarize(&results),
            results,
            groups,
            trends,
        }
    }

    /// Results whose status is critical, in original order.
    pub fn critical_results(&self) -> impl Iterator<Item = &ClassificationResult> {
        self.results.iter().filter(|result| result.status.is_critical())
    }
}

/// A reference table entry whose bounds contradict each other.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogIntegrityError {
    #[error("catalog entry has an empty test id")]
    EmptyTestId,
    #[error("test id `{0}` appears more than once")]
    DuplicateTestId(String),
    #[error("`{test_id}` has a non-finite bound")]
    NonFiniteBound { test_id: String },
    #[error("`{test_id}`: normal_low {low} is above normal_high {high}")]
    InvertedNormalRange { test_id: String, low: f64, high: f64 },
    #[error("`{test_id}`: critical_low {critical} is above normal_low {normal}")]
    CriticalLowAboveNormal {
        test_id: String,
        critical: f64,
        normal: f64,
    },
    #[error("`{test_id}`: critical_high {critical} is below normal_high {normal}")]
    CriticalHighBelowNormal {
        test_id: String,
        critical: f64,
        normal: f64,
    },
}

/// Errors surfaced while loading catalogs or reading producer input.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("input is missing required data")]
    MissingData,
    #[error("could not parse input: {0}")]
    Parse(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog integrity check failed: {0}")]
    Integrity(#[from] CatalogIntegrityError),
}

pub(crate) fn format_number(value: f64) -> String {
    format!("{value}")
}

fn with_unit(text: String, unit: &str) -> String {
    let unit = unit.trim();
    if unit.is_empty() {
        text
    } else {
        format!("{text} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_value_parses_numeric_strings() {
        assert_eq!(LabValue::from(" 4.2 ").as_number(), Some(4.2));
        assert_eq!(LabValue::from("-3").as_number(), Some(-3.0));
        assert_eq!(LabValue::from(7.0).as_number(), Some(7.0));
    }

    #[test]
    fn lab_value_rejects_text_and_non_finite() {
        assert_eq!(LabValue::from("trace").as_number(), None);
        assert_eq!(LabValue::from("").as_number(), None);
        assert_eq!(LabValue::from("   ").as_number(), None);
        assert_eq!(LabValue::from("NaN").as_number(), None);
        assert_eq!(LabValue::from("inf").as_number(), None);
        assert_eq!(LabValue::from(f64::NAN).as_number(), None);
    }

    #[test]
    fn lab_value_deserializes_numbers_and_strings() {
        let values: Vec<LabValue> = serde_json::from_str(r#"[5.5, "none seen"]"#).unwrap();
        assert_eq!(values[0], LabValue::Numeric(5.5));
        assert_eq!(values[1], LabValue::Text("none seen".to_string()));
    }

    #[test]
    fn range_text_omits_empty_unit() {
        let inr = ReferenceRange::new("inr", "INR", "", 0.8, 1.2);
        assert_eq!(inr.range_text(), "0.8–1.2");

        let sodium = ReferenceRange::new("sodium", "Sodium", "mmol/L", 136.0, 145.0);
        assert_eq!(sodium.range_text(), "136–145 mmol/L");
        assert_eq!(sodium.format_value(115.0), "115 mmol/L");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&LabStatus::CriticalLow).unwrap();
        assert_eq!(json, "\"critical_low\"");
        assert_eq!(LabStatus::CriticalHigh.to_string(), "critical_high");
    }

    #[test]
    fn status_sides() {
        assert_eq!(LabStatus::CriticalLow.side(), Some(Side::Low));
        assert_eq!(LabStatus::High.side(), Some(Side::High));
        assert_eq!(LabStatus::Unknown.side(), None);
        assert!(!LabStatus::CriticalHigh.is_abnormal());
        assert!(LabStatus::CriticalHigh.is_critical());
    }

    #[test]
    fn config_fills_missing_fields_from_default() {
        let config: LabConfig = serde_json::from_str(r#"{"pct_change_cap": 50.0}"#).unwrap();
        assert_eq!(config.pct_change_cap, 50.0);
        assert_eq!(config.fluctuation_reversals, 2);
    }
}
