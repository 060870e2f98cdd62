//! Unit spelling normalization and unit conversion. Mass and count factors
//! hold for any analyte; equivalents depend on the ion's charge.

const UNIT_ALIASES: &[(&str, &str)] = &[
    ("ml", "mL"),
    ("dl", "dL"),
    ("l", "L"),
    ("mmol/l", "mmol/L"),
    ("umol/l", "umol/L"),
    ("µmol/l", "umol/L"),
    ("μmol/l", "umol/L"),
    ("nmol/l", "nmol/L"),
    ("meq/l", "mEq/L"),
    ("mg/dl", "mg/dL"),
    ("mg/l", "mg/L"),
    ("g/dl", "g/dL"),
    ("g/l", "g/L"),
    ("ng/ml", "ng/mL"),
    ("ng/dl", "ng/dL"),
    ("ng/l", "ng/L"),
    ("pg/ml", "pg/mL"),
    ("ug/ml", "ug/mL"),
    ("µg/ml", "ug/mL"),
    ("ug/l", "ug/L"),
    ("µg/l", "ug/L"),
    ("iu/l", "IU/L"),
    ("u/l", "U/L"),
    ("iu/ml", "IU/mL"),
    ("miu/l", "mIU/L"),
    ("uiu/ml", "uIU/mL"),
    ("µiu/ml", "uIU/mL"),
    ("x10^9/l", "x10^9/L"),
    ("x10^12/l", "x10^12/L"),
    ("x10e9/l", "x10^9/L"),
    ("x10e12/l", "x10^12/L"),
    ("10^9/l", "x10^9/L"),
    ("10^12/l", "x10^12/L"),
    ("10*9/l", "x10^9/L"),
    ("10*3/ul", "x10^3/uL"),
    ("thou/ul", "x10^3/uL"),
    ("k/ul", "x10^3/uL"),
    ("x10^3/ul", "x10^3/uL"),
    ("mil/ul", "x10^6/uL"),
    ("%", "%"),
    ("percent", "%"),
    ("sec", "s"),
    ("seconds", "s"),
    ("s", "s"),
    ("fl", "fL"),
    ("pg", "pg"),
    ("mm/hr", "mm/hr"),
    ("mm/h", "mm/hr"),
    ("mmhg", "mmHg"),
    ("mm[hg]", "mmHg"),
    ("ratio", "ratio"),
];

const CONVERSIONS: &[((&str, &str), f64)] = &[
    (("g/dL", "g/L"), 10.0),
    (("g/L", "g/dL"), 0.1),
    (("mg/dL", "mg/L"), 10.0),
    (("mg/L", "mg/dL"), 0.1),
    (("ng/mL", "ug/L"), 1.0),
    (("ug/L", "ng/mL"), 1.0),
    (("ng/L", "ng/mL"), 0.001),
    (("ng/mL", "ng/L"), 1000.0),
    (("x10^9/L", "x10^3/uL"), 1.0),
    (("x10^3/uL", "x10^9/L"), 1.0),
    (("uIU/mL", "mIU/L"), 1.0),
    (("mIU/L", "uIU/mL"), 1.0),
];

/// Canonical spelling for a unit; unknown units come back trimmed.
pub fn normalize_unit(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    UNIT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Charge of the ions whose equivalents convert to moles.
const VALENCES: &[(&str, f64)] = &[
    ("sodium", 1.0),
    ("potassium", 1.0),
    ("chloride", 1.0),
    ("bicarbonate", 1.0),
    ("calcium", 2.0),
    ("ionized_calcium", 2.0),
    ("magnesium", 2.0),
];

/// Convert a reading of `test_id` between units. mEq/L and mmol/L only
/// convert for ions with a known charge; everything else goes through
/// [`convert_value`].
pub fn convert_for_test(test_id: &str, value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    let from = normalize_unit(from_unit);
    let to = normalize_unit(to_unit);
    let valence = || {
        VALENCES
            .iter()
            .find(|(ion, _)| *ion == test_id)
            .map(|(_, charge)| *charge)
    };
    match (from.as_str(), to.as_str()) {
        ("mEq/L", "mmol/L") => valence().map(|charge| value / charge),
        ("mmol/L", "mEq/L") => valence().map(|charge| value * charge),
        _ => convert_value(value, &from, &to),
    }
}

/// Convert `value` between units, or `None` when no analyte-independent
/// factor is known.
pub fn convert_value(value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    let from = normalize_unit(from_unit);
    let to = normalize_unit(to_unit);
    if from == to {
        return Some(value);
    }
    CONVERSIONS
        .iter()
        .find(|((f, t), _)| *f == from && *t == to)
        .map(|(_, factor)| value * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_collapse_case_and_spacing() {
        assert_eq!(normalize_unit("MMOL/L"), "mmol/L");
        assert_eq!(normalize_unit(" mg / dl "), "mg/dL");
        assert_eq!(normalize_unit("µmol/L"), "umol/L");
        assert_eq!(normalize_unit("x10E9/L"), "x10^9/L");
        assert_eq!(normalize_unit("K/uL"), "x10^3/uL");
        assert_eq!(normalize_unit("sec"), "s");
    }

    #[test]
    fn unknown_unit_is_trimmed_not_rewritten() {
        assert_eq!(normalize_unit("  mL/min/1.73m2 "), "mL/min/1.73m2");
    }

    #[test]
    fn same_unit_converts_to_itself() {
        assert_eq!(convert_value(4.2, "mmol/l", "mmol/L"), Some(4.2));
        assert_eq!(convert_value(1.1, "", ""), Some(1.1));
    }

    #[test]
    fn known_factors_apply() {
        let hemoglobin = convert_value(140.0, "g/L", "g/dL").unwrap();
        assert!((hemoglobin - 14.0).abs() < 1e-9);
        assert_eq!(convert_value(13.5, "g/dl", "g/L"), Some(135.0));
        assert_eq!(convert_value(250.0, "K/uL", "x10^9/L"), Some(250.0));
    }

    #[test]
    fn unknown_pairs_do_not_convert() {
        assert_eq!(convert_value(88.0, "umol/L", "mg/dL"), None);
        assert_eq!(convert_value(5.0, "mmol/L", "mg/dL"), None);
        assert_eq!(convert_value(140.0, "mEq/L", "mmol/L"), None);
    }

    #[test]
    fn equivalents_follow_ion_charge() {
        assert_eq!(convert_for_test("sodium", 140.0, "mEq/L", "mmol/L"), Some(140.0));
        assert_eq!(convert_for_test("calcium", 4.6, "meq/l", "mmol/L"), Some(2.3));
        assert_eq!(convert_for_test("magnesium", 0.9, "mmol/L", "mEq/L"), Some(1.8));
        assert_eq!(convert_for_test("phosphate", 2.0, "mEq/L", "mmol/L"), None);
    }

    #[test]
    fn other_units_ignore_the_analyte() {
        assert_eq!(convert_for_test("calcium", 9.0, "mg/dl", "mg/L"), Some(90.0));
        assert_eq!(convert_for_test("albumin", 3.5, "g/dL", "g/dL"), Some(3.5));
    }
}
