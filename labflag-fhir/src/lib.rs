//! FHIR JSON bundle to classified `LabSnapshot` converter.

use chrono::{DateTime, Utc};
use serde_json::Value;
use labflag_core::{
    canonical_test_id, dedup_observations, parse_reference_range, Classifier, LabError,
    LabSnapshot, LabStatus, LabValue, Measurement, ReportedRange,
};

/// Read typed measurements from a bundle JSON string.
pub fn measurements_from_bundle_str(bundle_json: &str) -> Result<Vec<Measurement>, LabError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| LabError::Parse(err.to_string()))?;
    measurements_from_bundle_value(&value)
}

/// Read typed measurements from a `serde_json::Value` bundle.
pub fn measurements_from_bundle_value(bundle: &Value) -> Result<Vec<Measurement>, LabError> {
    Ok(collect_observations(bundle)?
        .into_iter()
        .map(|record| record.measurement)
        .collect())
}

/// Classify every lab observation in a bundle JSON string.
pub fn summarize_bundle_str(
    bundle_json: &str,
    classifier: &Classifier,
) -> Result<LabSnapshot, LabError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| LabError::Parse(err.to_string()))?;
    summarize_bundle_value(&value, classifier)
}

/// Classify every lab observation in a `serde_json::Value` bundle.
pub fn summarize_bundle_value(
    bundle: &Value,
    classifier: &Classifier,
) -> Result<LabSnapshot, LabError> {
    let records = collect_observations(bundle)?;
    let measurements: Vec<Measurement> = records
        .iter()
        .map(|record| record.measurement.clone())
        .collect();
    let linked = classifier.link_previous_values(&measurements);
    let results = classifier.classify_panel(&linked);

    for (record, result) in records.iter().zip(&results) {
        let Some(reported) = record.interpretation else {
            continue;
        };
        if result.status != LabStatus::Unknown && reported != result.status {
            tracing::info!(
                observation = %record.resource_id,
                test_id = %result.test_id,
                reported = %reported,
                computed = %result.status,
                value = ?result.value,
                "flag discrepancy, keeping computed status"
            );
        }
    }

    let mut test_ids: Vec<&str> = Vec::new();
    for result in &results {
        if !test_ids.contains(&result.test_id.as_str()) {
            test_ids.push(&result.test_id);
        }
    }
    let groups = classifier.catalog().categories_of(&test_ids);
    let trends = classifier.trends(&linked);

    Ok(LabSnapshot::new(results, groups, trends))
}

struct ObservationRecord {
    resource_id: String,
    measurement: Measurement,
    interpretation: Option<LabStatus>,
}

fn collect_observations(bundle: &Value) -> Result<Vec<ObservationRecord>, LabError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(LabError::MissingData)?;

    if bundle_type != "Bundle" {
        return Err(LabError::Parse(format!(
            "Expected resourceType Bundle, received {bundle_type}"
        )));
    }

    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .ok_or(LabError::MissingData)?;

    let mut records = Vec::new();
    for entry in entries {
        let Some(resource) = entry.get("resource") else {
            continue;
        };
        if resource.get("resourceType").and_then(Value::as_str) != Some("Observation") {
            continue;
        }
        match observation_record(resource) {
            Some(record) => records.push(record),
            None => tracing::debug!(
                observation = %resource_id(resource),
                "skipping observation without a code or value"
            ),
        }
    }

    let read = records.len();
    let records = dedup_observations(records, |record| &record.measurement);
    tracing::debug!(
        entries = entries.len(),
        observations = records.len(),
        duplicates = read - records.len(),
        "bundle read"
    );
    Ok(records)
}

fn observation_record(resource: &Value) -> Option<ObservationRecord> {
    if matches!(
        resource.get("status").and_then(Value::as_str),
        Some("entered-in-error" | "cancelled")
    ) {
        return None;
    }

    let test_id = observation_test_id(resource.get("code")?)?;
    let (value, unit) = observation_value(resource)?;

    Some(ObservationRecord {
        resource_id: resource_id(resource),
        measurement: Measurement {
            test_id,
            value,
            observed_at: extract_observation_timestamp(resource),
            previous_value: None,
            unit,
            reference_range: reported_range(resource),
        },
        interpretation: interpretation_status(resource),
    })
}

/// LOINC code first, then the human-readable name.
fn observation_test_id(code: &Value) -> Option<String> {
    if let Some(codings) = code.get("coding").and_then(Value::as_array) {
        for coding in codings {
            if let Some(test_id) = coding
                .get("code")
                .and_then(Value::as_str)
                .and_then(loinc_test_id)
            {
                return Some(test_id.to_string());
            }
        }
    }

    extract_codeable_text(code).map(|name| canonical_test_id(&name))
}

fn observation_value(resource: &Value) -> Option<(LabValue, Option<String>)> {
    if let Some(quantity) = resource.get("valueQuantity") {
        let magnitude = quantity.get("value").and_then(Value::as_f64)?;
        let unit = quantity
            .get("unit")
            .or_else(|| quantity.get("code"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|unit| !unit.is_empty())
            .map(str::to_string);
        return Some((LabValue::Numeric(magnitude), unit));
    }

    if let Some(number) = resource.get("valueInteger").and_then(Value::as_f64) {
        return Some((LabValue::Numeric(number), None));
    }

    if let Some(text) = resource.get("valueString").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some((LabValue::Text(text.to_string()), None));
        }
    }

    resource
        .get("valueCodeableConcept")
        .and_then(extract_codeable_text)
        .map(|text| (LabValue::Text(text), None))
}

/// First `referenceRange` with a numeric bound, from `low`/`high` quantities
/// or, failing that, its text.
fn reported_range(resource: &Value) -> Option<ReportedRange> {
    let ranges = resource.get("referenceRange")?.as_array()?;
    ranges.iter().find_map(|range| {
        let bound = |side: &str| {
            range
                .get(side)
                .and_then(|quantity| quantity.get("value"))
                .and_then(Value::as_f64)
        };
        let quantities = ReportedRange {
            low: bound("low"),
            high: bound("high"),
        };
        if quantities.is_bounded() {
            return Some(quantities);
        }
        range
            .get("text")
            .and_then(Value::as_str)
            .and_then(parse_reference_range)
    })
}

fn interpretation_status(resource: &Value) -> Option<LabStatus> {
    let interpretation = resource.get("interpretation")?.as_array()?;
    for entry in interpretation {
        let codes = entry
            .get("coding")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|coding| coding.get("code").and_then(Value::as_str))
            .map(str::to_string)
            .chain(entry.get("text").and_then(Value::as_str).map(str::to_string));

        for code in codes {
            let status = match code.trim().to_lowercase().as_str() {
                "hh" | "critical high" | "critically high" => Some(LabStatus::CriticalHigh),
                "ll" | "critical low" | "critically low" => Some(LabStatus::CriticalLow),
                "h" | "high" => Some(LabStatus::High),
                "l" | "low" => Some(LabStatus::Low),
                "n" | "normal" => Some(LabStatus::Normal),
                _ => None,
            };
            if status.is_some() {
                return status;
            }
        }
    }
    None
}

fn loinc_test_id(code: &str) -> Option<&'static str> {
    LOINC_CODES
        .iter()
        .find(|(loinc, _)| *loinc == code.trim())
        .map(|(_, test_id)| *test_id)
}

const LOINC_CODES: &[(&str, &str)] = &[
    ("2951-2", "sodium"),
    ("2823-3", "potassium"),
    ("2075-0", "chloride"),
    ("1963-8", "bicarbonate"),
    ("2028-9", "bicarbonate"),
    ("17861-6", "calcium"),
    ("19123-9", "magnesium"),
    ("2777-1", "phosphate"),
    ("3094-0", "bun"),
    ("2160-0", "creatinine"),
    ("33914-3", "egfr"),
    ("62238-1", "egfr"),
    ("2345-7", "glucose"),
    ("6690-2", "white_blood_cells"),
    ("789-8", "red_blood_cells"),
    ("718-7", "hemoglobin"),
    ("4544-3", "hematocrit"),
    ("777-3", "platelets"),
    ("787-2", "mcv"),
    ("751-8", "neutrophils"),
    ("2276-4", "ferritin"),
    ("5902-2", "pt"),
    ("6301-6", "inr"),
    ("3173-2", "aptt"),
    ("14979-9", "aptt"),
    ("3255-7", "fibrinogen"),
    ("1742-6", "alt"),
    ("1920-8", "ast"),
    ("6768-6", "alp"),
    ("2324-2", "ggt"),
    ("1975-2", "total_bilirubin"),
    ("1968-7", "direct_bilirubin"),
    ("1751-7", "albumin"),
    ("2885-2", "total_protein"),
    ("10839-9", "troponin_i"),
    ("6598-7", "troponin_t"),
    ("30934-4", "bnp"),
    ("33762-6", "nt_probnp"),
    ("2157-6", "ck"),
    ("13969-1", "ck_mb"),
    ("2532-0", "ldh"),
    ("1988-5", "crp"),
    ("4537-7", "esr"),
    ("30341-2", "esr"),
    ("33959-8", "procalcitonin"),
    ("4548-4", "hba1c"),
    ("2093-3", "total_cholesterol"),
    ("13457-7", "ldl"),
    ("2085-9", "hdl"),
    ("2571-8", "triglycerides"),
    ("3016-3", "tsh"),
    ("3024-7", "free_t4"),
    ("3051-0", "free_t3"),
    ("2744-1", "ph"),
    ("11558-4", "ph"),
    ("2019-8", "pco2"),
    ("2703-7", "po2"),
    ("2708-6", "sao2"),
    ("1925-7", "base_excess"),
    ("2524-7", "lactate"),
    ("32693-4", "lactate"),
];

fn extract_codeable_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }

    if let Some(codings) = value.get("coding").and_then(Value::as_array) {
        for coding in codings {
            if let Some(display) = coding.get("display").and_then(Value::as_str) {
                if !display.trim().is_empty() {
                    return Some(display.trim().to_string());
                }
            }
            if let Some(code) = coding.get("code").and_then(Value::as_str) {
                if !code.trim().is_empty() {
                    return Some(code.trim().to_string());
                }
            }
        }
    }

    None
}

fn resource_id(resource: &Value) -> String {
    resource
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "observation-unknown".to_string())
}

fn extract_observation_timestamp(resource: &Value) -> Option<DateTime<Utc>> {
    extract_datetime(
        resource,
        &[
            "effectiveDateTime",
            "effectiveInstant",
            "effectivePeriod",
            "issued",
        ],
    )
}

fn extract_datetime(resource: &Value, fields: &[&str]) -> Option<DateTime<Utc>> {
    for field in fields {
        let Some(value) = resource.get(*field) else {
            continue;
        };

        if let Some(text) = value.as_str() {
            if let Some(dt) = parse_datetime(text) {
                return Some(dt);
            }
        }

        if let Some(obj) = value.as_object() {
            if let Some(end) = obj.get("end").and_then(Value::as_str) {
                if let Some(dt) = parse_datetime(end) {
                    return Some(dt);
                }
            }
            if let Some(start) = obj.get("start").and_then(Value::as_str) {
                if let Some(dt) = parse_datetime(start) {
                    return Some(dt);
                }
            }
        }
    }
    None
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(code: Value, value: Value) -> Value {
        let mut resource = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "status": "final",
            "code": code,
            "effectiveDateTime": "2024-06-01T07:15:00Z"
        });
        if let (Some(target), Some(extra)) = (resource.as_object_mut(), value.as_object()) {
            target.extend(extra.clone());
        }
        resource
    }

    #[test]
    fn loinc_code_wins_over_display_text() {
        let code = json!({
            "coding": [{"system": "http://loinc.org", "code": "2951-2", "display": "Sodium [Moles/volume] in Serum or Plasma"}]
        });
        assert_eq!(observation_test_id(&code), Some("sodium".to_string()));
    }

    #[test]
    fn unmapped_code_falls_back_to_text() {
        let code = json!({"text": "Hgb", "coding": [{"code": "local-17"}]});
        assert_eq!(observation_test_id(&code), Some("hemoglobin".to_string()));
    }

    #[test]
    fn quantity_value_keeps_unit() {
        let resource = observation(
            json!({"text": "Potassium"}),
            json!({"valueQuantity": {"value": 5.9, "unit": "mmol/L"}}),
        );
        let record = observation_record(&resource).unwrap();
        assert_eq!(record.measurement.test_id, "potassium");
        assert_eq!(record.measurement.value, LabValue::Numeric(5.9));
        assert_eq!(record.measurement.unit.as_deref(), Some("mmol/L"));
        assert!(record.measurement.observed_at.is_some());
    }

    #[test]
    fn string_and_concept_values_become_text() {
        let resource = observation(
            json!({"text": "Urine blood"}),
            json!({"valueCodeableConcept": {"text": "trace"}}),
        );
        let record = observation_record(&resource).unwrap();
        assert_eq!(record.measurement.value, LabValue::Text("trace".to_string()));

        let resource = observation(
            json!({"text": "Culture"}),
            json!({"valueString": "none seen"}),
        );
        let record = observation_record(&resource).unwrap();
        assert_eq!(record.measurement.value, LabValue::Text("none seen".to_string()));
    }

    #[test]
    fn observation_without_value_is_skipped() {
        let resource = observation(json!({"text": "Sodium"}), json!({}));
        assert!(observation_record(&resource).is_none());
    }

    #[test]
    fn entered_in_error_is_skipped() {
        let mut resource = observation(
            json!({"text": "Sodium"}),
            json!({"valueQuantity": {"value": 99.0}}),
        );
        resource["status"] = json!("entered-in-error");
        assert!(observation_record(&resource).is_none());
    }

    #[test]
    fn interpretation_codes_map_to_status() {
        let resource = json!({
            "interpretation": [{"coding": [{"system": "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation", "code": "HH"}]}]
        });
        assert_eq!(interpretation_status(&resource), Some(LabStatus::CriticalHigh));

        let resource = json!({"interpretation": [{"text": "Low"}]});
        assert_eq!(interpretation_status(&resource), Some(LabStatus::Low));

        let resource = json!({"interpretation": [{"coding": [{"code": "A"}]}]});
        assert_eq!(interpretation_status(&resource), None);
    }

    #[test]
    fn reference_range_from_quantities_or_text() {
        let resource = json!({
            "referenceRange": [{"low": {"value": 30, "unit": "ng/mL"}, "high": {"value": 100, "unit": "ng/mL"}}]
        });
        assert_eq!(
            reported_range(&resource),
            Some(ReportedRange { low: Some(30.0), high: Some(100.0) })
        );

        let resource = json!({"referenceRange": [{"text": "Negative"}, {"text": "< 0.5"}]});
        assert_eq!(
            reported_range(&resource),
            Some(ReportedRange { low: None, high: Some(0.5) })
        );

        let resource = json!({"referenceRange": [{"high": {"value": 200}}]});
        assert_eq!(
            reported_range(&resource),
            Some(ReportedRange { low: None, high: Some(200.0) })
        );

        assert_eq!(reported_range(&json!({})), None);
    }

    #[test]
    fn period_end_is_preferred() {
        let resource = json!({
            "effectivePeriod": {"start": "2024-06-01T06:00:00Z", "end": "2024-06-01T06:45:00+01:00"}
        });
        let at = extract_observation_timestamp(&resource).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-06-01T05:45:00+00:00");
    }

    #[test]
    fn rejects_non_bundle() {
        let err = measurements_from_bundle_str(r#"{"resourceType": "Patient"}"#).unwrap_err();
        assert!(matches!(err, LabError::Parse(_)));

        let err = measurements_from_bundle_str(r#"{"entry": []}"#).unwrap_err();
        assert!(matches!(err, LabError::MissingData));

        let err = measurements_from_bundle_str(r#"{"resourceType": "Bundle"}"#).unwrap_err();
        assert!(matches!(err, LabError::MissingData));

        assert!(matches!(
            measurements_from_bundle_str("{"),
            Err(LabError::Parse(_))
        ));
    }
}
