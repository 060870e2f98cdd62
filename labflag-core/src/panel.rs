//! Panel-level aggregation and triage ordering.

use std::cmp::Ordering;
use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Utc};

use crate::classify::{from_catalog_unit, to_catalog_unit};
use crate::normalize::canonical_test_id;
use crate::units::normalize_unit;
use crate::{ClassificationResult, Classifier, LabStatus, LabValue, Measurement, PanelSummary};

/// Count statuses across one panel (or any slice of results).
pub fn summarize(results: &[ClassificationResult]) -> PanelSummary {
    let mut summary = PanelSummary::default();
    for result in results {
        match result.status {
            LabStatus::Normal => summary.normal_count += 1,
            LabStatus::Low | LabStatus::High => summary.abnormal_count += 1,
            LabStatus::CriticalLow | LabStatus::CriticalHigh => summary.critical_count += 1,
            LabStatus::Unknown => summary.unknown_count += 1,
        }
        summary.latest_observed_at = latest(summary.latest_observed_at, result.observed_at);
    }
    summary
}

impl PanelSummary {
    /// Fold another panel into this one (patient or ward totals).
    pub fn merge(&mut self, other: &PanelSummary) {
        self.normal_count += other.normal_count;
        self.abnormal_count += other.abnormal_count;
        self.critical_count += other.critical_count;
        self.unknown_count += other.unknown_count;
        self.latest_observed_at = latest(self.latest_observed_at, other.latest_observed_at);
    }

    pub fn has_critical(&self) -> bool {
        self.critical_count > 0
    }

    /// Triage order: anything critical first, then more abnormal results,
    /// then the most recent observation. Undated panels go last.
    pub fn triage_cmp(&self, other: &PanelSummary) -> Ordering {
        other
            .has_critical()
            .cmp(&self.has_critical())
            .then_with(|| other.abnormal_count.cmp(&self.abnormal_count))
            .then_with(|| match (self.latest_observed_at, other.latest_observed_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    }
}

/// Stable sort of panels, patients or beds by their summary.
pub fn sort_for_triage<T, F>(items: &mut [T], summary_of: F)
where
    F: Fn(&T) -> &PanelSummary,
{
    items.sort_by(|a, b| summary_of(a).triage_cmp(summary_of(b)));
}

/// Drop repeated rows: same test, same time, same value and unit. The last
/// copy wins and takes the first copy's place. Undated rows are never merged.
pub fn dedup_observations<T, F>(items: Vec<T>, measurement_of: F) -> Vec<T>
where
    F: Fn(&T) -> &Measurement,
{
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    let mut seen: HashMap<ObservationKey, usize> = HashMap::new();

    for item in items {
        let Some(key) = ObservationKey::of(measurement_of(&item)) else {
            kept.push(item);
            continue;
        };
        match seen.entry(key) {
            Entry::Occupied(slot) => {
                tracing::debug!(test_id = %slot.key().test_id, "dropping duplicate observation");
                kept[*slot.get()] = item;
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(item);
            }
        }
    }

    kept
}

#[derive(PartialEq, Eq, Hash)]
struct ObservationKey {
    test_id: String,
    observed_at: DateTime<Utc>,
    unit: String,
    value: ValueKey,
}

#[derive(PartialEq, Eq, Hash)]
enum ValueKey {
    Number(u64),
    Text(String),
}

impl ObservationKey {
    fn of(measurement: &Measurement) -> Option<Self> {
        let value = match measurement.value.as_number() {
            // -0.0 and 0.0 are the same reading
            Some(number) => ValueKey::Number((number + 0.0).to_bits()),
            None => ValueKey::Text(measurement.value.display_text().trim().to_lowercase()),
        };
        Some(Self {
            test_id: canonical_test_id(&measurement.test_id),
            observed_at: measurement.observed_at?,
            unit: measurement
                .unit
                .as_deref()
                .map(normalize_unit)
                .unwrap_or_default(),
            value,
        })
    }
}

impl Classifier {
    /// Fill in `previous_value` from each test's prior numeric result,
    /// expressed in the later measurement's unit.
    ///
    /// Returns new measurements in the input order; an explicit
    /// `previous_value` on the input is kept as is. Readings with no usable
    /// range or no conversion into its unit never become a previous value.
    pub fn link_previous_values(&self, measurements: &[Measurement]) -> Vec<Measurement> {
        let mut order: Vec<usize> = (0..measurements.len()).collect();
        order.sort_by_key(|&position| measurements[position].observed_at);

        let mut linked = measurements.to_vec();
        // Last numeric value per test, in the range's unit.
        let mut last_value: HashMap<String, f64> = HashMap::new();

        for position in order {
            let measurement = &mut linked[position];
            let unit = measurement
                .unit
                .as_deref()
                .map(str::trim)
                .filter(|unit| !unit.is_empty());
            let Some(range) =
                self.range_for(&measurement.test_id, measurement.reference_range.as_ref(), unit)
            else {
                continue;
            };

            if measurement.previous_value.is_none() {
                measurement.previous_value = last_value
                    .get(&range.test_id)
                    .and_then(|&prior| from_catalog_unit(prior, unit, &range))
                    .map(LabValue::Numeric);
            }
            if let Some(value) = measurement
                .value
                .as_number()
                .and_then(|value| to_catalog_unit(value, unit, &range))
            {
                last_value.insert(range.test_id.clone(), value);
            }
        }

        linked
    }
}

fn latest(
    current: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReportedRange;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
    }

    fn summary(critical: usize, abnormal: usize, hour: Option<u32>) -> PanelSummary {
        PanelSummary {
            critical_count: critical,
            abnormal_count: abnormal,
            latest_observed_at: hour.map(at),
            ..PanelSummary::default()
        }
    }

    #[test]
    fn counts_follow_status_buckets() {
        let classifier = Classifier::standard().unwrap();
        let results = classifier.classify_panel(&[
            Measurement::new("sodium", 140.0).at(at(6)),
            Measurement::new("potassium", 5.6).at(at(8)),
            Measurement::new("sodium", 118.0).at(at(7)),
            Measurement::new("urine_colour", "straw"),
        ]);
        let summary = summarize(&results);
        assert_eq!(summary.normal_count, 1);
        assert_eq!(summary.abnormal_count, 1);
        assert_eq!(summary.critical_count, 1);
        assert_eq!(summary.unknown_count, 1);
        assert_eq!(summary.latest_observed_at, Some(at(8)));
    }

    #[test]
    fn empty_panel_is_all_zero() {
        assert_eq!(summarize(&[]), PanelSummary::default());
    }

    #[test]
    fn merge_adds_counts_and_keeps_latest_time() {
        let mut ward = summary(1, 2, Some(4));
        ward.merge(&summary(0, 3, Some(9)));
        ward.merge(&summary(2, 0, None));
        assert_eq!(ward.critical_count, 3);
        assert_eq!(ward.abnormal_count, 5);
        assert_eq!(ward.latest_observed_at, Some(at(9)));
    }

    #[test]
    fn triage_puts_critical_first_then_abnormal_then_recent() {
        let mut beds = vec![
            ("bed-1", summary(0, 4, Some(10))),
            ("bed-2", summary(1, 0, Some(3))),
            ("bed-3", summary(0, 4, Some(12))),
            ("bed-4", summary(0, 1, Some(23))),
            ("bed-5", summary(3, 0, Some(5))),
            ("bed-6", summary(0, 4, None)),
        ];
        sort_for_triage(&mut beds, |(_, summary)| summary);
        let order: Vec<&str> = beds.iter().map(|(bed, _)| *bed).collect();
        assert_eq!(
            order,
            vec!["bed-5", "bed-2", "bed-3", "bed-1", "bed-6", "bed-4"]
        );
    }

    #[test]
    fn previous_values_follow_observation_time() {
        let series = vec![
            Measurement::new("K", 5.9).at(at(12)),
            Measurement::new("potassium", 6.4).at(at(6)),
            Measurement::new("sodium", 139.0).at(at(7)),
            Measurement::new("potassium", "hemolysed").at(at(9)),
            Measurement::new("potassium", 5.2).at(at(15)).with_previous(4.0),
        ];
        let linked = Classifier::standard().unwrap().link_previous_values(&series);

        assert_eq!(linked[0].previous_value, Some(LabValue::Numeric(6.4)));
        assert_eq!(linked[1].previous_value, None);
        assert_eq!(linked[2].previous_value, None);
        assert_eq!(linked[3].previous_value, Some(LabValue::Numeric(6.4)));
        assert_eq!(linked[4].previous_value, Some(LabValue::Numeric(4.0)));
        assert_eq!(series[0].previous_value, None);
    }

    #[test]
    fn previous_values_are_converted_between_units() {
        let classifier = Classifier::standard().unwrap();
        let series = vec![
            Measurement::new("hemoglobin", 100.0).with_unit("g/L").at(at(6)),
            Measurement::new("hemoglobin", 11.0).with_unit("g/dL").at(at(18)),
        ];
        let linked = classifier.link_previous_values(&series);
        assert_eq!(linked[1].previous_value, Some(LabValue::Numeric(10.0)));

        let result = classifier.classify_measurement(&linked[1]);
        assert_eq!(result.status, LabStatus::Low);
        assert_eq!(result.delta, Some(1.0));
        assert!(result.is_improving);
        assert!(!result.is_worsening);

        let back = classifier.link_previous_values(&[
            Measurement::new("hemoglobin", 10.0).at(at(6)),
            Measurement::new("hemoglobin", 95.0).with_unit("g/L").at(at(9)),
        ]);
        assert_eq!(back[1].previous_value, Some(LabValue::Numeric(100.0)));
    }

    #[test]
    fn unconvertible_readings_are_not_linked() {
        let classifier = Classifier::standard().unwrap();
        let linked = classifier.link_previous_values(&[
            Measurement::new("creatinine", 88.0).with_unit("umol/L").at(at(6)),
            Measurement::new("creatinine", 1.4).with_unit("mg/dL").at(at(9)),
            Measurement::new("vitamin_d", 30.0).at(at(6)),
            Measurement::new("vitamin_d", 25.0).at(at(9)),
        ]);
        assert_eq!(linked[1].previous_value, None);
        assert_eq!(linked[3].previous_value, None);
    }

    #[test]
    fn reported_ranges_link_uncatalogued_tests() {
        let classifier = Classifier::standard().unwrap();
        let range = ReportedRange {
            low: Some(30.0),
            high: Some(100.0),
        };
        let linked = classifier.link_previous_values(&[
            Measurement::new("Vitamin D", 24.0).at(at(6)).with_reported_range(range),
            Measurement::new("vitamin d", 28.0).at(at(9)).with_reported_range(range),
        ]);
        let result = classifier.classify_measurement(&linked[1]);
        assert_eq!(result.status, LabStatus::Low);
        assert_eq!(result.delta, Some(4.0));
        assert!(result.is_improving);
    }

    #[test]
    fn exact_duplicates_collapse_to_the_last_copy() {
        let rows = vec![
            ("first", Measurement::new("sodium", 131.0).at(at(6))),
            ("other", Measurement::new("potassium", 4.0).at(at(6))),
            ("repeat", Measurement::new("Na", 131.0).at(at(6))),
            ("later", Measurement::new("sodium", 131.0).at(at(9))),
            ("undated", Measurement::new("sodium", 131.0)),
            ("undated-again", Measurement::new("sodium", 131.0)),
        ];
        let kept = dedup_observations(rows, |(_, measurement)| measurement);
        let labels: Vec<&str> = kept.iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, vec!["repeat", "other", "later", "undated", "undated-again"]);
    }
}
