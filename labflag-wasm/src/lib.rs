//! Framework-neutral WASM <-> JavaScript bridge.

use std::sync::OnceLock;

use labflag_core::{
    sort_for_triage, summarize as summarize_results, ClassificationResult, Classifier, LabConfig,
    LabError, LabValue, Measurement, PanelSummary, ReferenceCatalog,
};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

static CLASSIFIER: OnceLock<Result<Classifier, String>> = OnceLock::new();

#[derive(Deserialize)]
struct JsLabConfig {
    #[serde(default)]
    fluctuation_reversals: Option<u32>,
    #[serde(default)]
    pct_change_cap: Option<f64>,
}

impl From<JsLabConfig> for LabConfig {
    fn from(cfg: JsLabConfig) -> Self {
        let mut base = LabConfig::default();
        if let Some(reversals) = cfg.fluctuation_reversals {
            base.fluctuation_reversals = reversals;
        }
        if let Some(cap) = cfg.pct_change_cap {
            base.pct_change_cap = cap;
        }
        base
    }
}

/// One bed, patient or panel as the host app tracks it.
#[derive(Serialize, Deserialize)]
struct JsPanel {
    id: String,
    summary: PanelSummary,
}

fn standard_classifier() -> Result<&'static Classifier, JsValue> {
    CLASSIFIER
        .get_or_init(|| Classifier::standard().map_err(|err| err.to_string()))
        .as_ref()
        .map_err(|err| JsValue::from_str(&format!("Reference catalog rejected: {err}")))
}

/// Classify one value against the built-in catalog. Inputs that are neither a
/// number nor a string come back as an unknown result with empty text.
#[wasm_bindgen]
pub fn classify(
    test_id: &str,
    raw: JsValue,
    previous: Option<JsValue>,
    unit: Option<String>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let classifier = standard_classifier()?;
    let mut measurement = Measurement::new(test_id, lab_value(raw));
    measurement.previous_value = previous.map(lab_value);
    measurement.unit = unit;

    to_value(&classifier.classify_measurement(&measurement))
        .map_err(|err| JsValue::from_str(&format!("Could not serialize result: {err}")))
}

#[wasm_bindgen]
pub fn summarize(results: JsValue) -> Result<JsValue, JsValue> {
    let results: Vec<ClassificationResult> = from_value(results)
        .map_err(|err| JsValue::from_str(&format!("Could not read results: {err}")))?;

    to_value(&summarize_results(&results))
        .map_err(|err| JsValue::from_str(&format!("Could not serialize summary: {err}")))
}

/// Sort `[{ id, summary }]` into triage order.
#[wasm_bindgen]
pub fn triage(panels: JsValue) -> Result<JsValue, JsValue> {
    let mut panels: Vec<JsPanel> = from_value(panels)
        .map_err(|err| JsValue::from_str(&format!("Could not read panels: {err}")))?;
    sort_for_triage(&mut panels, |panel| &panel.summary);

    to_value(&panels)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize panels: {err}")))
}

#[wasm_bindgen]
pub fn summarize_bundle(
    input_bundle: JsValue,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let bundle_value = from_value::<serde_json::Value>(input_bundle)
        .map_err(|err| JsValue::from_str(&format!("Could not read JSON bundle: {err}")))?;

    let snapshot = match config {
        Some(js_cfg) => {
            let cfg: JsLabConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Could not read config: {err}")))?;
            let catalog = ReferenceCatalog::standard()
                .map_err(|err| JsValue::from_str(&format_lab_error(err.into())))?;
            let classifier = Classifier::with_config(catalog, LabConfig::from(cfg));
            labflag_fhir::summarize_bundle_value(&bundle_value, &classifier)
        }
        None => labflag_fhir::summarize_bundle_value(&bundle_value, standard_classifier()?),
    }
    .map_err(|err| JsValue::from_str(&format_lab_error(err)))?;

    to_value(&snapshot)
        .map_err(|err| JsValue::from_str(&format!("Could not serialize snapshot: {err}")))
}

fn lab_value(raw: JsValue) -> LabValue {
    from_value(raw).unwrap_or_else(|_| LabValue::Text(String::new()))
}

fn format_lab_error(err: LabError) -> String {
    format!("Lab error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: JsLabConfig = serde_json::from_str(r#"{"pct_change_cap": 50.0}"#).unwrap();
        let config = LabConfig::from(cfg);
        assert_eq!(config.pct_change_cap, 50.0);
        assert_eq!(
            config.fluctuation_reversals,
            LabConfig::default().fluctuation_reversals
        );
    }

    #[test]
    fn empty_config_is_default() {
        let cfg: JsLabConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(LabConfig::from(cfg), LabConfig::default());
    }
}
