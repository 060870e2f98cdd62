//! Canonical test identifiers.
//!
//! Every lookup goes through [`canonical_test_id`], so `Creatinine`, `CREAT`
//! and `cr` all address the same catalog entry.

const ALIASES: &[(&str, &str)] = &[
    // Electrolytes
    ("na", "sodium"),
    ("na+", "sodium"),
    ("sod", "sodium"),
    ("sod.", "sodium"),
    ("sodium", "sodium"),
    ("k", "potassium"),
    ("k+", "potassium"),
    ("pot", "potassium"),
    ("potassium", "potassium"),
    ("cl", "chloride"),
    ("cl-", "chloride"),
    ("chloride", "chloride"),
    ("co2", "bicarbonate"),
    ("hco3", "bicarbonate"),
    ("hco3-", "bicarbonate"),
    ("tco2", "bicarbonate"),
    ("bicarb", "bicarbonate"),
    ("bicarbonate", "bicarbonate"),
    ("ca", "calcium"),
    ("ca++", "calcium"),
    ("ca total", "calcium"),
    ("calcium", "calcium"),
    ("mg", "magnesium"),
    ("mg++", "magnesium"),
    ("magnesium", "magnesium"),
    ("phos", "phosphate"),
    ("po4", "phosphate"),
    ("phosphorus", "phosphate"),
    ("phosphate", "phosphate"),
    // Renal
    ("bun", "bun"),
    ("urea", "bun"),
    ("urea nitrogen", "bun"),
    ("cr", "creatinine"),
    ("crea", "creatinine"),
    ("creat", "creatinine"),
    ("creatinine", "creatinine"),
    ("egfr", "egfr"),
    ("gfr", "egfr"),
    // Glucose
    ("glu", "glucose"),
    ("gluc", "glucose"),
    ("glucose", "glucose"),
    ("blood sugar", "glucose"),
    ("bs", "glucose"),
    // Blood count
    ("wbc", "white_blood_cells"),
    ("white blood cells", "white_blood_cells"),
    ("white blood cell count", "white_blood_cells"),
    ("rbc", "red_blood_cells"),
    ("red blood cells", "red_blood_cells"),
    ("hgb", "hemoglobin"),
    ("hb", "hemoglobin"),
    ("hemoglobin", "hemoglobin"),
    ("haemoglobin", "hemoglobin"),
    ("hct", "hematocrit"),
    ("hematocrit", "hematocrit"),
    ("haematocrit", "hematocrit"),
    ("plt", "platelets"),
    ("platelets", "platelets"),
    ("platelet count", "platelets"),
    ("mcv", "mcv"),
    ("neut", "neutrophils"),
    ("neutrophil", "neutrophils"),
    ("neutrophils", "neutrophils"),
    ("anc", "neutrophils"),
    ("ferritin", "ferritin"),
    // Liver
    ("alt", "alt"),
    ("sgpt", "alt"),
    ("ast", "ast"),
    ("sgot", "ast"),
    ("alp", "alp"),
    ("alkaline phosphatase", "alp"),
    ("alk phos", "alp"),
    ("ggt", "ggt"),
    ("gamma gt", "ggt"),
    ("tbil", "total_bilirubin"),
    ("total bilirubin", "total_bilirubin"),
    ("t. bilirubin", "total_bilirubin"),
    ("bilirubin total", "total_bilirubin"),
    ("dbil", "direct_bilirubin"),
    ("direct bilirubin", "direct_bilirubin"),
    ("d. bilirubin", "direct_bilirubin"),
    ("alb", "albumin"),
    ("albumin", "albumin"),
    ("tp", "total_protein"),
    ("total protein", "total_protein"),
    // Coagulation
    ("pt", "pt"),
    ("prothrombin time", "pt"),
    ("inr", "inr"),
    ("aptt", "aptt"),
    ("ptt", "aptt"),
    ("fib", "fibrinogen"),
    ("fibrinogen", "fibrinogen"),
    // Cardiac
    ("troponin", "troponin_i"),
    ("troponin i", "troponin_i"),
    ("tni", "troponin_i"),
    ("hs-tni", "troponin_i"),
    ("troponin t", "troponin_t"),
    ("tnt", "troponin_t"),
    ("hs-tnt", "troponin_t"),
    ("bnp", "bnp"),
    ("nt-probnp", "nt_probnp"),
    ("pro-bnp", "nt_probnp"),
    ("ck", "ck"),
    ("cpk", "ck"),
    ("ck-mb", "ck_mb"),
    ("ldh", "ldh"),
    // Inflammatory
    ("crp", "crp"),
    ("c-reactive protein", "crp"),
    ("esr", "esr"),
    ("sed rate", "esr"),
    ("pct", "procalcitonin"),
    ("procalcitonin", "procalcitonin"),
    // Metabolic
    ("hba1c", "hba1c"),
    ("a1c", "hba1c"),
    ("glycated hemoglobin", "hba1c"),
    ("chol", "total_cholesterol"),
    ("total cholesterol", "total_cholesterol"),
    ("ldl", "ldl"),
    ("ldl-c", "ldl"),
    ("hdl", "hdl"),
    ("hdl-c", "hdl"),
    ("tg", "triglycerides"),
    ("trig", "triglycerides"),
    ("triglycerides", "triglycerides"),
    // Thyroid
    ("tsh", "tsh"),
    ("ft4", "free_t4"),
    ("free t4", "free_t4"),
    ("ft3", "free_t3"),
    ("free t3", "free_t3"),
    // Blood gas
    ("ph", "ph"),
    ("pco2", "pco2"),
    ("paco2", "pco2"),
    ("po2", "po2"),
    ("pao2", "po2"),
    ("sao2", "sao2"),
    ("be", "base_excess"),
    ("base excess", "base_excess"),
    ("lactate", "lactate"),
    ("lac", "lactate"),
];

/// Map a raw test name or key to its canonical snake_case identifier.
pub fn canonical_test_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || c.is_whitespace() || matches!(*c, '.' | '+' | '-' | '_')
        })
        .collect();
    let cleaned = cleaned.trim();

    if let Some(key) = alias(cleaned) {
        return key.to_string();
    }

    let stripped = cleaned.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if let Some(key) = alias(stripped) {
        return key.to_string();
    }

    stripped.split_whitespace().collect::<Vec<_>>().join("_")
}

fn alias(cleaned: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(name, _)| *name == cleaned)
        .map(|(_, key)| *key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_variants_share_one_key() {
        assert_eq!(canonical_test_id("Creatinine"), "creatinine");
        assert_eq!(canonical_test_id("creatinine"), "creatinine");
        assert_eq!(canonical_test_id("CREAT"), "creatinine");
        assert_eq!(canonical_test_id(" Cr "), "creatinine");
    }

    #[test]
    fn abbreviations_resolve() {
        assert_eq!(canonical_test_id("Na+"), "sodium");
        assert_eq!(canonical_test_id("K"), "potassium");
        assert_eq!(canonical_test_id("hs-TnI"), "troponin_i");
        assert_eq!(canonical_test_id("WBC"), "white_blood_cells");
        assert_eq!(canonical_test_id("PTT"), "aptt");
    }

    #[test]
    fn trailing_punctuation_is_ignored() {
        assert_eq!(canonical_test_id("Gluc."), "glucose");
        assert_eq!(canonical_test_id("Sod."), "sodium");
    }

    #[test]
    fn unknown_names_become_snake_case() {
        assert_eq!(canonical_test_id("Vitamin  D"), "vitamin_d");
        assert_eq!(canonical_test_id("free_t4"), "free_t4");
        assert_eq!(canonical_test_id("Troponin I"), "troponin_i");
        assert_eq!(canonical_test_id("Lipase (serum)"), "lipase_serum");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(canonical_test_id(""), "");
        assert_eq!(canonical_test_id("  "), "");
    }
}
