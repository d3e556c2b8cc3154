//! Lab panels: fixed catalogues of physiology values queryable as snapshots.
//!
//! Every inbound physiology value is folded into the panels that list its
//! name.  A simulation reset zeroes everything.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Panel name → value name → last observed value.
pub struct LabPanels {
    panels: Mutex<BTreeMap<String, BTreeMap<String, f64>>>,
}

impl LabPanels {
    pub fn new() -> Self {
        let panels = LabPanels {
            panels: Mutex::new(BTreeMap::new()),
        };
        panels.reset();
        panels
    }

    /// Reinitialize every panel to its catalogue with all values at zero.
    pub fn reset(&self) {
        let mut panels = self.panels.lock().unwrap();
        panels.clear();
        for (panel, names) in PANEL_CATALOGUE {
            let entries = names.iter().map(|n| ((*n).to_owned(), 0.0)).collect();
            panels.insert((*panel).to_owned(), entries);
        }
    }

    /// Fold an observed physiology value into every panel that carries it.
    pub fn observe(&self, name: &str, value: f64) {
        let mut panels = self.panels.lock().unwrap();
        for entries in panels.values_mut() {
            if let Some(slot) = entries.get_mut(name) {
                *slot = value;
            }
        }
    }

    /// Snapshot one panel, or `None` for an unknown panel name.
    pub fn panel(&self, name: &str) -> Option<BTreeMap<String, f64>> {
        self.panels.lock().unwrap().get(name).cloned()
    }
}

impl Default for LabPanels {
    fn default() -> Self {
        LabPanels::new()
    }
}

// ---------------------------------------------------------------------------
// Panel catalogue
// ---------------------------------------------------------------------------

const PANEL_CATALOGUE: &[(&str, &[&str])] = &[
    (
        "ALL",
        &[
            "Substance_Sodium",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Glucose_Concentration",
            "BloodChemistry_BloodUreaNitrogen_Concentration",
            "Substance_Creatinine_Concentration",
            "BloodChemistry_WhiteBloodCell_Count",
            "BloodChemistry_RedBloodCell_Count",
            "Substance_Hemoglobin_Concentration",
            "BloodChemistry_Hemaocrit",
            "CompleteBloodCount_Platelet",
            "BloodChemistry_BloodPH",
            "BloodChemistry_Arterial_CarbonDioxide_Pressure",
            "BloodChemistry_Arterial_Oxygen_Pressure",
            "Substance_Bicarbonate",
            "Substance_BaseExcess",
            "Substance_Lactate_Concentration_mmol",
            "BloodChemistry_CarbonMonoxide_Saturation",
            "Anion_Gap",
            "Substance_Ionized_Calcium",
        ],
    ),
    (
        "POCT",
        &[
            "Substance_Sodium",
            "MetabolicPanel_Potassium",
            "MetabolicPanel_Chloride",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Glucose_Concentration",
            "BloodChemistry_BloodUreaNitrogen_Concentration",
            "Substance_Creatinine_Concentration",
            "Anion_Gap",
            "Substance_Ionized_Calcium",
        ],
    ),
    (
        "Hematology",
        &[
            "BloodChemistry_Hemaocrit",
            "Substance_Hemoglobin_Concentration",
        ],
    ),
    (
        "ABG",
        &[
            "BloodChemistry_BloodPH",
            "BloodChemistry_Arterial_CarbonDioxide_Pressure",
            "BloodChemistry_Arterial_Oxygen_Pressure",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Bicarbonate",
            "Substance_BaseExcess",
            "BloodChemistry_Oxygen_Saturation",
            "Substance_Lactate_Concentration_mmol",
            "BloodChemistry_CarbonMonoxide_Saturation",
        ],
    ),
    (
        "VBG",
        &[
            "BloodChemistry_BloodPH",
            "BloodChemistry_Arterial_CarbonDioxide_Pressure",
            "BloodChemistry_Arterial_Oxygen_Pressure",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Bicarbonate",
            "Substance_BaseExcess",
            "BloodChemistry_VenousCarbonDioxidePressure",
            "BloodChemistry_VenousOxygenPressure",
            "Substance_Lactate_Concentration_mmol",
            "BloodChemistry_CarbonMonoxide_Saturation",
        ],
    ),
    (
        "BMP",
        &[
            "Substance_Sodium",
            "MetabolicPanel_Potassium",
            "MetabolicPanel_Chloride",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Glucose_Concentration",
            "BloodChemistry_BloodUreaNitrogen_Concentration",
            "Substance_Creatinine_Concentration",
            "Anion_Gap",
            "Substance_Ionized_Calcium",
        ],
    ),
    (
        "CBC",
        &[
            "BloodChemistry_WhiteBloodCell_Count",
            "BloodChemistry_RedBloodCell_Count",
            "Substance_Hemoglobin_Concentration",
            "BloodChemistry_Hemaocrit",
            "CompleteBloodCount_Platelet",
        ],
    ),
    (
        "CMP",
        &[
            "Substance_Albumin_Concentration",
            "BloodChemistry_BloodUreaNitrogen_Concentration",
            "Substance_Calcium_Concentration",
            "MetabolicPanel_Chloride",
            "MetabolicPanel_CarbonDioxide",
            "Substance_Creatinine_Concentration",
            "Substance_Glucose_Concentration",
            "MetabolicPanel_Potassium",
            "Substance_Sodium",
            "MetabolicPanel_Bilirubin",
            "MetabolicPanel_Protein",
        ],
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_panels_exist_and_start_at_zero() {
        let labs = LabPanels::new();
        for name in ["ALL", "POCT", "Hematology", "ABG", "VBG", "BMP", "CBC", "CMP"] {
            let panel = labs.panel(name).expect(name);
            assert!(!panel.is_empty());
            assert!(panel.values().all(|v| *v == 0.0));
        }
        assert!(labs.panel("NoSuchPanel").is_none());
    }

    #[test]
    fn observe_updates_every_panel_listing_the_value() {
        let labs = LabPanels::new();
        labs.observe("Substance_Sodium", 140.0);
        assert_eq!(labs.panel("ALL").unwrap()["Substance_Sodium"], 140.0);
        assert_eq!(labs.panel("BMP").unwrap()["Substance_Sodium"], 140.0);
        // Not part of Hematology
        assert!(!labs.panel("Hematology").unwrap().contains_key("Substance_Sodium"));
    }

    #[test]
    fn unknown_value_names_are_ignored() {
        let labs = LabPanels::new();
        labs.observe("HR", 72.0);
        assert!(labs.panel("ALL").unwrap().values().all(|v| *v == 0.0));
    }

    #[test]
    fn reset_zeroes_populated_panels() {
        let labs = LabPanels::new();
        labs.observe("Substance_Sodium", 140.0);
        labs.observe("BloodChemistry_BloodPH", 7.4);
        labs.reset();
        assert!(labs.panel("ALL").unwrap().values().all(|v| *v == 0.0));
        assert!(labs.panel("ABG").unwrap().values().all(|v| *v == 0.0));
    }
}
