//! Per-region outcomes and the assembled document result.

use std::collections::BTreeMap;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::classify::MarkStrength;
use crate::config::{CoordinateMap, RegionKind};

/// Region name feeding `patient_info.name`.
pub const PATIENT_NAME_REGION: &str = "patient_name";
/// Region name feeding `patient_info.mrn`; the form prints it as FMP/SSN.
pub const MRN_REGION: &str = "fmp_ssn";

/// What one extracted region turned out to hold.
///
/// Exactly one outcome per region, consumed by exhaustive match: no region
/// ever carries a mix of mark and recognizable ink.
#[derive(Clone, Debug)]
pub enum FieldOutcome {
    /// No ink worth processing.
    Empty,
    /// A classified phenotype reaction mark.
    Mark(MarkStrength),
    /// Handwriting to be dispatched to the external recognizer.
    Recognizable(RgbImage),
}

/// Identity section of the assembled result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub mrn: Option<String>,
}

/// The assembled per-document result.
///
/// Any subset of fields may be null; consumers handle sparse documents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormResult {
    pub patient_info: PatientInfo,
    /// Token arrays for every phenotype-cell region.
    pub phenotype_data: BTreeMap<String, Option<Vec<String>>>,
    /// Raw resolved value for every region in the coordinate map.
    pub fields: BTreeMap<String, Option<String>>,
}

/// Split a value on whitespace and commas. Empty input stays null.
pub fn tokenize(value: &str) -> Option<Vec<String>> {
    let tokens: Vec<String> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

impl FormResult {
    /// Fold resolved per-region values into the sectioned document.
    pub(crate) fn assemble(
        fields: BTreeMap<String, Option<String>>,
        map: &CoordinateMap,
    ) -> Self {
        let patient_info = PatientInfo {
            name: fields.get(PATIENT_NAME_REGION).cloned().flatten(),
            mrn: fields.get(MRN_REGION).cloned().flatten(),
        };

        let phenotype_data = map
            .regions
            .iter()
            .filter(|(_, spec)| spec.kind == RegionKind::PhenotypeCell)
            .map(|(name, _)| {
                let tokens = fields
                    .get(name)
                    .and_then(|v| v.as_deref())
                    .and_then(tokenize);
                (name.clone(), tokens)
            })
            .collect();

        Self {
            patient_info,
            phenotype_data,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionRect;

    #[test]
    fn tokenize_splits_on_whitespace_and_commas() {
        assert_eq!(
            tokenize("Pos, weak  D"),
            Some(vec!["Pos".to_owned(), "weak".to_owned(), "D".to_owned()])
        );
        assert_eq!(tokenize("Pos"), Some(vec!["Pos".to_owned()]));
        assert_eq!(tokenize(""), None);
        assert_eq!(tokenize(" , ,, "), None);
    }

    #[test]
    fn assemble_partitions_fields_by_kind() {
        let rect = RegionRect {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let map = CoordinateMap::default()
            .with_region(PATIENT_NAME_REGION, rect, RegionKind::Text)
            .with_region(MRN_REGION, rect, RegionKind::Text)
            .with_region("rh_D", rect, RegionKind::PhenotypeCell)
            .with_region("kell_K", rect, RegionKind::PhenotypeCell);

        let mut fields = BTreeMap::new();
        fields.insert(PATIENT_NAME_REGION.to_owned(), Some("JANE DOE".to_owned()));
        fields.insert(MRN_REGION.to_owned(), None);
        fields.insert("rh_D".to_owned(), Some("Pos".to_owned()));
        fields.insert("kell_K".to_owned(), None);

        let result = FormResult::assemble(fields, &map);
        assert_eq!(result.patient_info.name.as_deref(), Some("JANE DOE"));
        assert_eq!(result.patient_info.mrn, None);
        assert_eq!(
            result.phenotype_data.get("rh_D"),
            Some(&Some(vec!["Pos".to_owned()]))
        );
        assert_eq!(result.phenotype_data.get("kell_K"), Some(&None));
        assert!(!result.phenotype_data.contains_key(PATIENT_NAME_REGION));
    }

    #[test]
    fn result_serializes_with_sections() {
        let map = CoordinateMap::default();
        let result = FormResult::assemble(BTreeMap::new(), &map);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("patient_info").is_some());
        assert!(json.get("phenotype_data").is_some());
    }
}
