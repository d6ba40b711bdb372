//! Fixed 8-category pathology taxonomy.
//!
//! Channels are static: criteria text is compile-time data and carries no
//! runtime state across exams. Free-form labels coming back from the
//! classifier are mapped through [`normalize_label`] — an injective lookup
//! that rejects unknown labels instead of coercing them.

use serde::{Deserialize, Serialize};

/// One independently evaluated pathology category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Tuberculosis,
    NoduleMass,
    Pneumonia,
    InterstitialLungDisease,
    Emphysema,
    PleuralEffusion,
    Bronchiectasis,
    Atelectasis,
}

/// All channels in canonical order. Every run evaluates exactly this set.
pub const ALL_CHANNELS: [ChannelId; 8] = [
    ChannelId::Tuberculosis,
    ChannelId::NoduleMass,
    ChannelId::Pneumonia,
    ChannelId::InterstitialLungDisease,
    ChannelId::Emphysema,
    ChannelId::PleuralEffusion,
    ChannelId::Bronchiectasis,
    ChannelId::Atelectasis,
];

impl ChannelId {
    /// Canonical snake_case label, used on the wire and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelId::Tuberculosis => "tuberculosis",
            ChannelId::NoduleMass => "nodule_mass",
            ChannelId::Pneumonia => "pneumonia",
            ChannelId::InterstitialLungDisease => "interstitial_lung_disease",
            ChannelId::Emphysema => "emphysema",
            ChannelId::PleuralEffusion => "pleural_effusion",
            ChannelId::Bronchiectasis => "bronchiectasis",
            ChannelId::Atelectasis => "atelectasis",
        }
    }

    /// Human-readable condition name for narratives.
    pub fn display_name(&self) -> &'static str {
        match self {
            ChannelId::Tuberculosis => "tuberculosis",
            ChannelId::NoduleMass => "pulmonary nodule or mass",
            ChannelId::Pneumonia => "pneumonia",
            ChannelId::InterstitialLungDisease => "interstitial lung disease",
            ChannelId::Emphysema => "emphysema",
            ChannelId::PleuralEffusion => "pleural effusion",
            ChannelId::Bronchiectasis => "bronchiectasis",
            ChannelId::Atelectasis => "atelectasis",
        }
    }

    /// Abbreviated criteria used by the batched tier-1 screening call.
    pub fn screening_criteria(&self) -> &'static str {
        match self {
            ChannelId::Tuberculosis => {
                "Tuberculosis: cavitation, tree-in-bud nodularity, apical or upper-lobe \
                 consolidation, miliary pattern."
            }
            ChannelId::NoduleMass => {
                "Nodule/mass: focal rounded opacity; note size in mm, margin, density, \
                 and lobe when present."
            }
            ChannelId::Pneumonia => {
                "Pneumonia: lobar or patchy consolidation, air bronchograms, \
                 ground-glass opacity with consolidation."
            }
            ChannelId::InterstitialLungDisease => {
                "ILD: reticulation, honeycombing, traction bronchiectasis, \
                 subpleural basal predominance."
            }
            ChannelId::Emphysema => {
                "Emphysema: centrilobular or paraseptal lucencies, bullae, \
                 attenuated vasculature."
            }
            ChannelId::PleuralEffusion => {
                "Pleural effusion: dependent pleural fluid, meniscus sign, \
                 loculation."
            }
            ChannelId::Bronchiectasis => {
                "Bronchiectasis: bronchial dilation, signet-ring sign, bronchial \
                 wall thickening, mucus plugging."
            }
            ChannelId::Atelectasis => {
                "Atelectasis: volume loss, fissural displacement, linear or \
                 segmental collapse."
            }
        }
    }

    /// Full criteria used by the tier-2 escalation call for this channel only.
    pub fn full_criteria(&self) -> &'static str {
        match self {
            ChannelId::Tuberculosis => {
                "Assess for pulmonary tuberculosis. Active disease: cavitation \
                 (especially apical/posterior upper lobes), tree-in-bud centrilobular \
                 nodularity, consolidation, miliary micronodules, lymphadenopathy with \
                 low-attenuation centers. Sequelae: fibronodular scarring, calcified \
                 granulomas, traction distortion. Distinguish active from latent or \
                 healed disease and state which pattern is seen."
            }
            ChannelId::NoduleMass => {
                "Assess for pulmonary nodules and masses. For each lesion report: \
                 largest axial diameter in mm, margin (smooth, lobulated, irregular, \
                 spiculated), spiculation severity 0-5, density (solid, part-solid, \
                 ground-glass, calcified), lobe and laterality, pleural or fissural \
                 contact, and an estimated malignancy likelihood percentage."
            }
            ChannelId::Pneumonia => {
                "Assess for pneumonia. Lobar consolidation with air bronchograms, \
                 bronchopneumonia (patchy peribronchial consolidation), atypical \
                 patterns (ground-glass, crazy paving), round pneumonia, abscess or \
                 cavitary complication, parapneumonic effusion."
            }
            ChannelId::InterstitialLungDisease => {
                "Assess for interstitial lung disease. UIP pattern: basal subpleural \
                 reticulation, honeycombing, traction bronchiectasis. NSIP: \
                 ground-glass with subpleural sparing. Hypersensitivity pneumonitis: \
                 mosaic attenuation, centrilobular ground-glass nodules. State the \
                 most likely pattern and its distribution."
            }
            ChannelId::Emphysema => {
                "Assess for emphysema. Centrilobular lucencies (upper-lobe \
                 predominant), panlobular destruction, paraseptal rows of subpleural \
                 cysts, bullae over 1 cm, vascular attenuation. Grade extent as mild, \
                 moderate, or severe."
            }
            ChannelId::PleuralEffusion => {
                "Assess for pleural effusion. Dependent free fluid with meniscus, \
                 loculated collections, pleural thickening or enhancement suggesting \
                 exudate or empyema, associated compressive atelectasis. Estimate \
                 volume as small, moderate, or large and note laterality."
            }
            ChannelId::Bronchiectasis => {
                "Assess for bronchiectasis. Bronchoarterial ratio above 1 \
                 (signet-ring sign), lack of distal tapering (tram-track sign), \
                 bronchial wall thickening, mucus plugging, tree-in-bud change. \
                 Classify as cylindrical, varicose, or cystic and give distribution."
            }
            ChannelId::Atelectasis => {
                "Assess for atelectasis. Volume loss with fissural or mediastinal \
                 shift, linear subsegmental bands, rounded atelectasis with comet-tail \
                 sign, lobar collapse. Distinguish obstructive from passive collapse \
                 where possible."
            }
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a free-form classifier label onto the fixed taxonomy.
///
/// Injective by construction: every accepted variant maps to exactly one
/// channel. Unrecognised labels return `None` — callers log and drop them
/// rather than coercing.
pub fn normalize_label(label: &str) -> Option<ChannelId> {
    let key: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    match key.as_str() {
        "tuberculosis" | "tb" | "pulmonary tuberculosis" | "active tuberculosis" => {
            Some(ChannelId::Tuberculosis)
        }
        "nodule mass" | "nodule" | "nodules" | "mass" | "lung nodule" | "pulmonary nodule"
        | "lung mass" | "pulmonary mass" | "nodules masses" => Some(ChannelId::NoduleMass),
        "pneumonia" | "consolidation pneumonia" | "community acquired pneumonia" => {
            Some(ChannelId::Pneumonia)
        }
        "interstitial lung disease" | "ild" | "pulmonary fibrosis" | "fibrosis" => {
            Some(ChannelId::InterstitialLungDisease)
        }
        "emphysema" | "copd" | "copd emphysema" | "chronic obstructive pulmonary disease" => {
            Some(ChannelId::Emphysema)
        }
        "pleural effusion" | "effusion" | "pleural effusions" => Some(ChannelId::PleuralEffusion),
        "bronchiectasis" => Some(ChannelId::Bronchiectasis),
        "atelectasis" | "collapse" | "lung collapse" => Some(ChannelId::Atelectasis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_labels_normalize_to_themselves() {
        for ch in ALL_CHANNELS {
            assert_eq!(normalize_label(ch.label()), Some(ch), "label {}", ch.label());
        }
    }

    #[test]
    fn common_variants_normalize() {
        assert_eq!(normalize_label("TB"), Some(ChannelId::Tuberculosis));
        assert_eq!(normalize_label("Pulmonary Nodule"), Some(ChannelId::NoduleMass));
        assert_eq!(normalize_label("COPD/Emphysema"), Some(ChannelId::Emphysema));
        assert_eq!(normalize_label("  pleural effusion "), Some(ChannelId::PleuralEffusion));
        assert_eq!(normalize_label("ILD"), Some(ChannelId::InterstitialLungDisease));
    }

    #[test]
    fn unknown_labels_rejected() {
        assert_eq!(normalize_label("cardiomegaly"), None);
        assert_eq!(normalize_label(""), None);
        assert_eq!(normalize_label("???"), None);
    }

    #[test]
    fn taxonomy_is_fixed_at_eight() {
        assert_eq!(ALL_CHANNELS.len(), 8);
        let mut labels: Vec<_> = ALL_CHANNELS.iter().map(|c| c.label()).collect();
        labels.dedup();
        assert_eq!(labels.len(), 8);
    }
}
