//! Reference catalog: validated, immutable table of clinical ranges.

use std::collections::{hash_map::Entry, HashMap};
use std::path::Path;

use crate::normalize::canonical_test_id;
use crate::{CatalogIntegrityError, CategoryGroup, LabError, ReferenceRange};

/// Bucket for tests without a known category.
pub const OTHER_CATEGORY: &str = "Other";

/// (test id, display name, unit, normal low, normal high, critical low, critical high)
type StandardRange = (
    &'static str,
    &'static str,
    &'static str,
    f64,
    f64,
    Option<f64>,
    Option<f64>,
);

/// Adult reference values, grouped by display section.
const STANDARD_PANELS: &[(&str, &[StandardRange])] = &[
    (
        "Electrolytes",
        &[
            ("sodium", "Sodium", "mmol/L", 136.0, 145.0, Some(120.0), Some(160.0)),
            ("potassium", "Potassium", "mmol/L", 3.5, 5.0, Some(2.5), Some(6.5)),
            ("chloride", "Chloride", "mmol/L", 98.0, 107.0, Some(80.0), Some(120.0)),
            ("bicarbonate", "Bicarbonate", "mmol/L", 22.0, 29.0, Some(10.0), Some(40.0)),
            ("calcium", "Calcium", "mg/dL", 8.5, 10.5, Some(6.0), Some(13.0)),
            ("magnesium", "Magnesium", "mg/dL", 1.7, 2.2, Some(1.0), Some(4.0)),
            ("phosphate", "Phosphate", "mg/dL", 2.5, 4.5, Some(1.0), None),
        ],
    ),
    (
        "Renal",
        &[
            ("bun", "Blood Urea Nitrogen", "mg/dL", 7.0, 20.0, None, Some(100.0)),
            ("creatinine", "Creatinine", "mg/dL", 0.6, 1.2, None, Some(10.0)),
            ("egfr", "eGFR", "mL/min/1.73m2", 60.0, 120.0, Some(15.0), None),
        ],
    ),
    (
        "Hematology",
        &[
            ("white_blood_cells", "White Blood Cells", "x10^9/L", 4.0, 11.0, Some(2.0), Some(30.0)),
            ("red_blood_cells", "Red Blood Cells", "x10^12/L", 4.2, 5.9, None, None),
            ("hemoglobin", "Hemoglobin", "g/dL", 12.0, 17.5, Some(7.0), Some(20.0)),
            ("hematocrit", "Hematocrit", "%", 36.0, 52.0, Some(20.0), Some(60.0)),
            ("platelets", "Platelets", "x10^9/L", 150.0, 400.0, Some(50.0), Some(1000.0)),
            ("mcv", "MCV", "fL", 80.0, 100.0, None, None),
            ("neutrophils", "Neutrophils", "x10^9/L", 2.0, 7.5, Some(0.5), None),
            ("ferritin", "Ferritin", "ng/mL", 30.0, 400.0, None, None),
        ],
    ),
    (
        "Coagulation",
        &[
            ("pt", "Prothrombin Time", "s", 11.0, 13.5, None, Some(30.0)),
            ("inr", "INR", "", 0.8, 1.2, None, Some(5.0)),
            ("aptt", "aPTT", "s", 25.0, 35.0, None, Some(100.0)),
            ("fibrinogen", "Fibrinogen", "g/L", 2.0, 4.0, Some(1.0), None),
        ],
    ),
    (
        "Liver",
        &[
            ("alt", "ALT", "U/L", 7.0, 56.0, None, Some(1000.0)),
            ("ast", "AST", "U/L", 10.0, 40.0, None, Some(1000.0)),
            ("alp", "Alkaline Phosphatase", "U/L", 44.0, 147.0, None, None),
            ("ggt", "GGT", "U/L", 9.0, 48.0, None, None),
            ("total_bilirubin", "Total Bilirubin", "mg/dL", 0.1, 1.2, None, Some(15.0)),
            ("direct_bilirubin", "Direct Bilirubin", "mg/dL", 0.0, 0.3, None, None),
            ("albumin", "Albumin", "g/dL", 3.5, 5.0, Some(1.5), None),
            ("total_protein", "Total Protein", "g/dL", 6.0, 8.3, None, None),
        ],
    ),
    (
        "Cardiac",
        &[
            ("troponin_i", "Troponin I", "ng/mL", 0.0, 0.04, None, Some(0.4)),
            ("troponin_t", "Troponin T", "ng/mL", 0.0, 0.01, None, Some(0.1)),
            ("bnp", "BNP", "pg/mL", 0.0, 100.0, None, None),
            ("nt_probnp", "NT-proBNP", "pg/mL", 0.0, 125.0, None, None),
            ("ck", "Creatine Kinase", "U/L", 30.0, 200.0, None, Some(5000.0)),
            ("ck_mb", "CK-MB", "ng/mL", 0.0, 5.0, None, None),
            ("ldh", "LDH", "U/L", 140.0, 280.0, None, None),
        ],
    ),
    (
        "Inflammatory",
        &[
            ("crp", "C-Reactive Protein", "mg/L", 0.0, 10.0, None, None),
            ("esr", "ESR", "mm/hr", 0.0, 20.0, None, None),
            ("procalcitonin", "Procalcitonin", "ng/mL", 0.0, 0.5, None, Some(10.0)),
        ],
    ),
    (
        "Metabolic",
        &[
            ("glucose", "Glucose", "mg/dL", 70.0, 100.0, Some(40.0), Some(500.0)),
            ("hba1c", "HbA1c", "%", 4.0, 5.6, None, None),
            ("total_cholesterol", "Total Cholesterol", "mg/dL", 0.0, 200.0, None, None),
            ("ldl", "LDL Cholesterol", "mg/dL", 0.0, 100.0, None, None),
            ("hdl", "HDL Cholesterol", "mg/dL", 40.0, 60.0, None, None),
            ("triglycerides", "Triglycerides", "mg/dL", 0.0, 150.0, None, Some(1000.0)),
        ],
    ),
    (
        "Thyroid",
        &[
            ("tsh", "TSH", "mIU/L", 0.4, 4.0, None, None),
            ("free_t4", "Free T4", "ng/dL", 0.8, 1.8, None, None),
            ("free_t3", "Free T3", "pg/mL", 2.3, 4.2, None, None),
        ],
    ),
    (
        "Arterial Blood Gas",
        &[
            ("ph", "pH", "", 7.35, 7.45, Some(7.2), Some(7.6)),
            ("pco2", "pCO2", "mmHg", 35.0, 45.0, Some(20.0), Some(70.0)),
            ("po2", "pO2", "mmHg", 80.0, 100.0, Some(40.0), None),
            ("sao2", "SaO2", "%", 95.0, 100.0, Some(85.0), None),
            ("base_excess", "Base Excess", "mmol/L", -2.0, 2.0, Some(-10.0), Some(10.0)),
            ("lactate", "Lactate", "mmol/L", 0.5, 2.2, None, Some(4.0)),
        ],
    ),
];

/// Immutable lookup table from canonical test id to reference range.
///
/// Built and validated once; every bound is checked at construction so the
/// classifier never has to second-guess the data.
#[derive(Debug, Clone)]
pub struct ReferenceCatalog {
    entries: Vec<ReferenceRange>,
    index: HashMap<String, usize>,
    categories: Vec<String>,
}

impl ReferenceCatalog {
    /// Validate `entries` and build the catalog.
    pub fn new(entries: Vec<ReferenceRange>) -> Result<Self, CatalogIntegrityError> {
        let mut index = HashMap::with_capacity(entries.len());
        let mut categories: Vec<String> = Vec::new();
        let mut accepted = Vec::with_capacity(entries.len());

        for mut entry in entries {
            entry.test_id = canonical_test_id(&entry.test_id);
            if entry.category.trim().is_empty() {
                entry.category = OTHER_CATEGORY.to_string();
            }

            if let Err(err) = validate_entry(&entry) {
                tracing::error!(test_id = %entry.test_id, %err, "rejecting reference catalog");
                return Err(err);
            }

            match index.entry(entry.test_id.clone()) {
                Entry::Occupied(_) => {
                    return Err(CatalogIntegrityError::DuplicateTestId(entry.test_id));
                }
                Entry::Vacant(slot) => {
                    slot.insert(accepted.len());
                }
            }

            if !categories.contains(&entry.category) {
                categories.push(entry.category.clone());
            }
            accepted.push(entry);
        }

        tracing::debug!(
            entries = accepted.len(),
            categories = categories.len(),
            "reference catalog built"
        );

        Ok(Self {
            entries: accepted,
            index,
            categories,
        })
    }

    /// The built-in adult catalog.
    pub fn standard() -> Result<Self, CatalogIntegrityError> {
        let entries = STANDARD_PANELS
            .iter()
            .flat_map(|(category, ranges)| {
                ranges.iter().map(move |&(id, name, unit, low, high, crit_low, crit_high)| {
                    ReferenceRange::new(id, name, unit, low, high)
                        .with_critical(crit_low, crit_high)
                        .in_category(*category)
                })
            })
            .collect();
        Self::new(entries)
    }

    /// Load an institutional table: a JSON array of reference ranges.
    pub fn from_json_str(json: &str) -> Result<Self, LabError> {
        let entries: Vec<ReferenceRange> =
            serde_json::from_str(json).map_err(|err| LabError::Parse(err.to_string()))?;
        Ok(Self::new(entries)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| LabError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Case- and alias-insensitive lookup; `None` means the test is not catalogued.
    pub fn lookup(&self, test_id: &str) -> Option<&ReferenceRange> {
        self.index
            .get(&canonical_test_id(test_id))
            .and_then(|&position| self.entries.get(position))
    }

    pub fn contains(&self, test_id: &str) -> bool {
        self.lookup(test_id).is_some()
    }

    pub fn entries(&self) -> &[ReferenceRange] {
        &self.entries
    }

    /// Category labels in catalog order.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group test ids for display. Groups follow catalog category order with
    /// the "Other" bucket last; ids keep the caller's order and spelling.
    pub fn categories_of<S: AsRef<str>>(&self, test_ids: &[S]) -> Vec<CategoryGroup> {
        let mut buckets: HashMap<&str, Vec<String>> = HashMap::new();
        for test_id in test_ids {
            let test_id = test_id.as_ref();
            let category = self
                .lookup(test_id)
                .map(|range| range.category.as_str())
                .unwrap_or(OTHER_CATEGORY);
            buckets
                .entry(category)
                .or_default()
                .push(test_id.to_string());
        }

        let mut groups: Vec<CategoryGroup> = self
            .categories
            .iter()
            .filter(|category| category.as_str() != OTHER_CATEGORY)
            .filter_map(|category| {
                buckets.remove(category.as_str()).map(|test_ids| CategoryGroup {
                    category: category.clone(),
                    test_ids,
                })
            })
            .collect();

        if let Some(test_ids) = buckets.remove(OTHER_CATEGORY) {
            groups.push(CategoryGroup {
                category: OTHER_CATEGORY.to_string(),
                test_ids,
            });
        }

        groups
    }
}

fn validate_entry(entry: &ReferenceRange) -> Result<(), CatalogIntegrityError> {
    let test_id = &entry.test_id;
    if test_id.is_empty() {
        return Err(CatalogIntegrityError::EmptyTestId);
    }

    let finite = [entry.normal_low, entry.normal_high]
        .into_iter()
        .chain(entry.critical_low)
        .chain(entry.critical_high)
        .all(f64::is_finite);
    if !finite {
        return Err(CatalogIntegrityError::NonFiniteBound {
            test_id: test_id.clone(),
        });
    }

    if entry.normal_low > entry.normal_high {
        return Err(CatalogIntegrityError::InvertedNormalRange {
            test_id: test_id.clone(),
            low: entry.normal_low,
            high: entry.normal_high,
        });
    }

    if let Some(critical) = entry.critical_low {
        if critical > entry.normal_low {
            return Err(CatalogIntegrityError::CriticalLowAboveNormal {
                test_id: test_id.clone(),
                critical,
                normal: entry.normal_low,
            });
        }
    }

    if let Some(critical) = entry.critical_high {
        if critical < entry.normal_high {
            return Err(CatalogIntegrityError::CriticalHighBelowNormal {
                test_id: test_id.clone(),
                critical,
                normal: entry.normal_high,
            });
        }
    }

    Ok(())
}
