//! Classification engine: raw value + reference range -> display-ready result.

use std::borrow::Cow;

use chrono::{DateTime, Utc};

use crate::catalog::{ReferenceCatalog, OTHER_CATEGORY};
use crate::normalize::canonical_test_id;
use crate::units::convert_for_test;
use crate::{
    format_number, CatalogIntegrityError, ClassificationResult, LabConfig, LabStatus, LabValue,
    Measurement, ReferenceRange, ReportedRange, Side,
};

/// Decimal places kept on deltas and converted values.
const PRECISION: f64 = 1_000_000.0;

/// Threshold check for one numeric value.
///
/// Critical bounds trigger inclusively and win over plain low/high; normal
/// bounds are inclusive on the normal side. Non-finite input is `Unknown`.
pub fn classify_value(range: &ReferenceRange, value: f64) -> LabStatus {
    if !value.is_finite() {
        return LabStatus::Unknown;
    }
    if range.critical_low.is_some_and(|bound| value <= bound) {
        return LabStatus::CriticalLow;
    }
    if range.critical_high.is_some_and(|bound| value >= bound) {
        return LabStatus::CriticalHigh;
    }
    if value < range.normal_low {
        LabStatus::Low
    } else if value > range.normal_high {
        LabStatus::High
    } else {
        LabStatus::Normal
    }
}

/// Pure classifier over a read-only catalog. Cheap to share across threads.
#[derive(Debug, Clone)]
pub struct Classifier {
    catalog: ReferenceCatalog,
    config: LabConfig,
}

impl Classifier {
    pub fn new(catalog: ReferenceCatalog) -> Self {
        Self::with_config(catalog, LabConfig::default())
    }

    pub fn with_config(catalog: ReferenceCatalog, config: LabConfig) -> Self {
        Self { catalog, config }
    }

    /// Classifier over the built-in adult catalog.
    pub fn standard() -> Result<Self, CatalogIntegrityError> {
        Ok(Self::new(ReferenceCatalog::standard()?))
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Classify a value in the catalog unit. Never fails: anything that cannot
    /// be compared against a range comes back as `Unknown`.
    pub fn classify(
        &self,
        test_id: &str,
        raw: &LabValue,
        previous: Option<&LabValue>,
    ) -> ClassificationResult {
        self.classify_parts(test_id, raw, previous, None, None, None)
    }

    pub fn classify_measurement(&self, measurement: &Measurement) -> ClassificationResult {
        self.classify_parts(
            &measurement.test_id,
            &measurement.value,
            measurement.previous_value.as_ref(),
            measurement.unit.as_deref(),
            measurement.reference_range.as_ref(),
            measurement.observed_at,
        )
    }

    pub fn classify_panel(&self, measurements: &[Measurement]) -> Vec<ClassificationResult> {
        measurements
            .iter()
            .map(|measurement| self.classify_measurement(measurement))
            .collect()
    }

    fn classify_parts(
        &self,
        test_id: &str,
        raw: &LabValue,
        previous: Option<&LabValue>,
        reported_unit: Option<&str>,
        reported_range: Option<&ReportedRange>,
        observed_at: Option<DateTime<Utc>>,
    ) -> ClassificationResult {
        let reported_unit = reported_unit.map(str::trim).filter(|unit| !unit.is_empty());
        let range = self.range_for(test_id, reported_range, reported_unit);
        let range = range.as_deref();

        let Some(reading) = raw.as_number() else {
            return unknown_result(test_id, range, raw.display_text(), None, observed_at);
        };

        let Some(range) = range else {
            let formatted = match reported_unit {
                Some(unit) => format!("{} {unit}", format_number(reading)),
                None => format_number(reading),
            };
            return unknown_result(test_id, None, formatted, Some(reading), observed_at);
        };

        let Some(value) = to_catalog_unit(reading, reported_unit, range) else {
            tracing::debug!(
                test_id = %range.test_id,
                reported = reported_unit.unwrap_or_default(),
                expected = %range.unit,
                "no conversion between units, leaving result unclassified"
            );
            let formatted = format!(
                "{} {}",
                format_number(reading),
                reported_unit.unwrap_or_default()
            );
            return unknown_result(test_id, Some(range), formatted, None, observed_at);
        };

        let status = classify_value(range, value);
        let delta = previous
            .and_then(LabValue::as_number)
            .and_then(|prior| to_catalog_unit(prior, reported_unit, range))
            .map(|prior| round(value - prior));
        let (is_improving, is_worsening) = direction_flags(status, delta);

        ClassificationResult {
            test_id: range.test_id.clone(),
            display_name: range.display_name.clone(),
            category: range.category.clone(),
            status,
            value: Some(value),
            formatted_value: range.format_value(value),
            reference_range_text: range.range_text(),
            delta,
            is_improving,
            is_worsening,
            observed_at,
        }
    }
}

impl Classifier {
    /// Catalog entry for the test, or the producer's own range when the
    /// catalog has none.
    pub(crate) fn range_for(
        &self,
        test_id: &str,
        reported_range: Option<&ReportedRange>,
        reported_unit: Option<&str>,
    ) -> Option<Cow<'_, ReferenceRange>> {
        if let Some(range) = self.catalog.lookup(test_id) {
            return Some(Cow::Borrowed(range));
        }
        let reported = reported_range?;
        let range = reported.to_reference_range(test_id, reported_unit.unwrap_or_default());
        if range.is_none() {
            tracing::debug!(test_id, ?reported, "ignoring unusable reported range");
        }
        range.map(Cow::Owned)
    }
}

/// Bring a reading into the range's unit. Dimensionless entries accept
/// whatever label the producer attached.
pub(crate) fn to_catalog_unit(
    value: f64,
    reported_unit: Option<&str>,
    range: &ReferenceRange,
) -> Option<f64> {
    match reported_unit {
        Some(unit) if !range.unit.is_empty() => {
            convert_for_test(&range.test_id, value, unit, &range.unit)
                .filter(|converted| converted.is_finite())
                .map(round)
        }
        _ => Some(value),
    }
}

/// Inverse of [`to_catalog_unit`].
pub(crate) fn from_catalog_unit(
    value: f64,
    reported_unit: Option<&str>,
    range: &ReferenceRange,
) -> Option<f64> {
    match reported_unit {
        Some(unit) if !range.unit.is_empty() => {
            convert_for_test(&range.test_id, value, &range.unit, unit)
                .filter(|converted| converted.is_finite())
                .map(round)
        }
        _ => Some(value),
    }
}

fn direction_flags(status: LabStatus, delta: Option<f64>) -> (bool, bool) {
    let (Some(side), Some(delta)) = (status.side(), delta) else {
        return (false, false);
    };
    match side {
        Side::High => (delta < 0.0, delta > 0.0),
        Side::Low => (delta > 0.0, delta < 0.0),
    }
}

fn unknown_result(
    test_id: &str,
    range: Option<&ReferenceRange>,
    formatted_value: String,
    value: Option<f64>,
    observed_at: Option<DateTime<Utc>>,
) -> ClassificationResult {
    let (test_id, display_name, category) = match range {
        Some(range) => (
            range.test_id.clone(),
            range.display_name.clone(),
            range.category.clone(),
        ),
        None => (
            canonical_test_id(test_id),
            test_id.trim().to_string(),
            OTHER_CATEGORY.to_string(),
        ),
    };
    ClassificationResult {
        test_id,
        display_name,
        category,
        status: LabStatus::Unknown,
        value,
        formatted_value,
        reference_range_text: String::new(),
        delta: None,
        is_improving: false,
        is_worsening: false,
        observed_at,
    }
}

fn round(value: f64) -> f64 {
    let scaled = value * PRECISION;
    if scaled.is_finite() {
        scaled.round() / PRECISION
    } else {
        value
    }
}
