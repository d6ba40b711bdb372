//! Deterministic nodule risk scoring.
//!
//! Pure functions over structured nodule attributes and patient context —
//! no I/O, no randomness, idempotent by construction. The weighted score is
//! blended with the classifier's own malignancy estimate and mapped onto a
//! strict six-band tier ladder, each band bound to a fixed follow-up
//! protocol.

use serde::{Deserialize, Serialize};

use crate::findings::{LesionType, Margin, NoduleFeatures, NoduleLocation};

/// Patient-level risk factors supplied by the referring context.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PatientContext {
    pub age: u32,
    pub smoking_history: bool,
    pub family_history: bool,
    pub prior_cancer: bool,
}

/// Ordinal risk band. Order matters — comparisons drive the override rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Minimal,
    Low,
    Moderate,
    Elevated,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoduleRiskProfile {
    /// Blended score, 0–100.
    pub risk_score: f64,
    pub tier: RiskTier,
    pub follow_up_action: String,
    pub timeframe: String,
    pub specialist_referral: bool,
}

// Sub-score weights. Sum to 1.0; the weighted total is then blended with
// the external malignancy estimate at BLEND_AI.
const W_SIZE: f64 = 0.25;
const W_MORPHOLOGY: f64 = 0.30;
const W_LOCATION: f64 = 0.15;
const W_DEMOGRAPHICS: f64 = 0.20;
const W_CLINICAL: f64 = 0.10;
const BLEND_AI: f64 = 0.20;

/// Any lesion at or above this diameter is forced into the top tier.
const MASS_OVERRIDE_MM: f64 = 20.0;

/// Score a nodule. Identical input always yields an identical profile.
pub fn assess(nodule: &NoduleFeatures, patient: &PatientContext) -> NoduleRiskProfile {
    let weighted = W_SIZE * size_score(nodule.size_mm)
        + W_MORPHOLOGY * morphology_score(nodule)
        + W_LOCATION * location_score(nodule.location, patient.smoking_history)
        + W_DEMOGRAPHICS * demographics_score(patient)
        + W_CLINICAL * clinical_score(patient);

    let ai = nodule.malignancy_pct.clamp(0.0, 100.0);
    let risk_score = ((1.0 - BLEND_AI) * weighted + BLEND_AI * ai).min(100.0);

    let tier = if nodule.size_mm >= MASS_OVERRIDE_MM {
        RiskTier::VeryHigh
    } else {
        tier_for(risk_score)
    };
    let (follow_up_action, timeframe, specialist_referral) = protocol(tier);

    NoduleRiskProfile {
        risk_score,
        tier,
        follow_up_action: follow_up_action.to_string(),
        timeframe: timeframe.to_string(),
        specialist_referral,
    }
}

/// Monotonic step function on diameter. Bands are half-open `[lo, hi)` so a
/// boundary value belongs to exactly one band.
fn size_score(mm: f64) -> f64 {
    match mm {
        mm if mm < 4.0 => 5.0,
        mm if mm < 6.0 => 15.0,
        mm if mm < 8.0 => 25.0,
        mm if mm < 10.0 => 40.0,
        mm if mm < 15.0 => 55.0,
        mm if mm < 20.0 => 70.0,
        mm if mm < 30.0 => 85.0,
        _ => 100.0,
    }
}

/// Spiculation dominates; margin and density add bounded bonuses.
fn morphology_score(nodule: &NoduleFeatures) -> f64 {
    let spiculation = f64::from(nodule.spiculation.min(5)) * 15.0;
    let margin = match nodule.margin {
        Margin::Smooth => 0.0,
        Margin::Lobulated => 8.0,
        Margin::Irregular => 15.0,
        Margin::Spiculated => 25.0,
    };
    let density = match nodule.lesion_type {
        LesionType::Calcified => 0.0,
        LesionType::GroundGlass => 0.0,
        LesionType::Solid => 5.0,
        LesionType::PartSolid => 12.0,
    };
    (spiculation + margin + density).min(100.0)
}

/// Upper-lobe lesions in smokers carry the highest positional risk.
fn location_score(location: NoduleLocation, smoker: bool) -> f64 {
    match location {
        NoduleLocation::UpperLobe if smoker => 90.0,
        NoduleLocation::UpperLobe => 70.0,
        NoduleLocation::Central => 60.0,
        NoduleLocation::MiddleLobe => 40.0,
        NoduleLocation::LowerLobe => 35.0,
        NoduleLocation::Pleural => 30.0,
    }
}

fn demographics_score(patient: &PatientContext) -> f64 {
    let age: f64 = match patient.age {
        a if a < 40 => 10.0,
        a if a < 50 => 25.0,
        a if a < 60 => 45.0,
        a if a < 70 => 65.0,
        _ => 80.0,
    };
    let smoking = if patient.smoking_history { 20.0 } else { 0.0 };
    (age + smoking).min(100.0)
}

fn clinical_score(patient: &PatientContext) -> f64 {
    let family = if patient.family_history { 50.0 } else { 0.0 };
    let prior = if patient.prior_cancer { 50.0 } else { 0.0 };
    family + prior
}

/// Strict ordered ladder, half-open bands.
fn tier_for(score: f64) -> RiskTier {
    match score {
        s if s < 10.0 => RiskTier::Minimal,
        s if s < 25.0 => RiskTier::Low,
        s if s < 45.0 => RiskTier::Moderate,
        s if s < 65.0 => RiskTier::Elevated,
        s if s < 85.0 => RiskTier::High,
        _ => RiskTier::VeryHigh,
    }
}

/// Fixed follow-up protocol per tier: (action, timeframe, referral).
fn protocol(tier: RiskTier) -> (&'static str, &'static str, bool) {
    match tier {
        RiskTier::Minimal => ("No routine follow-up required", "none", false),
        RiskTier::Low => ("Repeat low-dose CT", "12 months", false),
        RiskTier::Moderate => ("Repeat low-dose CT", "6 months", false),
        RiskTier::Elevated => ("Repeat CT with contrast", "3 months", true),
        RiskTier::High => ("PET-CT and tissue sampling evaluation", "2-4 weeks", true),
        RiskTier::VeryHigh => ("Urgent tissue sampling and surgical evaluation", "1-2 weeks", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodule(size_mm: f64) -> NoduleFeatures {
        NoduleFeatures {
            size_mm,
            spiculation: 0,
            margin: Margin::Smooth,
            lesion_type: LesionType::Solid,
            location: NoduleLocation::LowerLobe,
            malignancy_pct: 0.0,
        }
    }

    #[test]
    fn size_bands_are_half_open() {
        // 8 mm belongs to [8,10) and only there.
        assert_eq!(size_score(7.999), 25.0);
        assert_eq!(size_score(8.0), 40.0);
        assert_eq!(size_score(9.999), 40.0);
        assert_eq!(size_score(10.0), 55.0);
    }

    #[test]
    fn size_score_is_monotonic() {
        let samples = [0.0, 3.9, 4.0, 5.9, 6.0, 7.9, 8.0, 9.9, 10.0, 14.9, 15.0, 19.9, 20.0, 29.9, 30.0, 50.0];
        let scores: Vec<f64> = samples.iter().map(|&s| size_score(s)).collect();
        for w in scores.windows(2) {
            assert!(w[0] <= w[1], "size score must be non-decreasing: {w:?}");
        }
    }

    #[test]
    fn assessment_is_idempotent() {
        let n = NoduleFeatures {
            size_mm: 11.0,
            spiculation: 3,
            margin: Margin::Irregular,
            lesion_type: LesionType::PartSolid,
            location: NoduleLocation::UpperLobe,
            malignancy_pct: 42.0,
        };
        let p = PatientContext { age: 63, smoking_history: true, family_history: true, prior_cancer: false };
        let a = assess(&n, &p);
        let b = assess(&n, &p);
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.follow_up_action, b.follow_up_action);
    }

    #[test]
    fn benign_profile_scores_low() {
        let p = PatientContext { age: 30, ..Default::default() };
        let profile = assess(&nodule(3.0), &p);
        assert!(profile.risk_score < 25.0, "got {}", profile.risk_score);
        assert!(matches!(profile.tier, RiskTier::Minimal | RiskTier::Low));
        assert!(!profile.specialist_referral);
    }

    #[test]
    fn high_risk_profile_scores_high() {
        let n = NoduleFeatures {
            size_mm: 18.0,
            spiculation: 5,
            margin: Margin::Spiculated,
            lesion_type: LesionType::PartSolid,
            location: NoduleLocation::UpperLobe,
            malignancy_pct: 85.0,
        };
        let p = PatientContext { age: 72, smoking_history: true, family_history: true, prior_cancer: true };
        let profile = assess(&n, &p);
        assert!(profile.risk_score >= 65.0, "got {}", profile.risk_score);
        assert!(profile.tier >= RiskTier::High);
        assert!(profile.specialist_referral);
    }

    #[test]
    fn mass_size_forces_top_tier() {
        // Everything else benign: the 20 mm override alone must pin the tier.
        let p = PatientContext { age: 25, ..Default::default() };
        let profile = assess(&nodule(20.0), &p);
        assert_eq!(profile.tier, RiskTier::VeryHigh);
        assert!(profile.specialist_referral);
        assert_eq!(profile.timeframe, "1-2 weeks");
    }

    #[test]
    fn just_under_override_uses_computed_tier() {
        let p = PatientContext { age: 25, ..Default::default() };
        let profile = assess(&nodule(19.9), &p);
        assert!(profile.tier < RiskTier::VeryHigh);
    }

    #[test]
    fn ai_estimate_blends_at_one_fifth() {
        let p = PatientContext { age: 30, ..Default::default() };
        let mut low = nodule(5.0);
        let mut high = nodule(5.0);
        low.malignancy_pct = 0.0;
        high.malignancy_pct = 100.0;
        let a = assess(&low, &p).risk_score;
        let b = assess(&high, &p).risk_score;
        assert!((b - a - 20.0).abs() < 1e-9, "blend delta was {}", b - a);
    }

    #[test]
    fn score_is_capped_at_100() {
        let n = NoduleFeatures {
            size_mm: 45.0,
            spiculation: 5,
            margin: Margin::Spiculated,
            lesion_type: LesionType::PartSolid,
            location: NoduleLocation::UpperLobe,
            malignancy_pct: 100.0,
        };
        let p = PatientContext { age: 80, smoking_history: true, family_history: true, prior_cancer: true };
        assert!(assess(&n, &p).risk_score <= 100.0);
    }

    #[test]
    fn tier_ladder_is_strictly_ordered() {
        assert_eq!(tier_for(9.999), RiskTier::Minimal);
        assert_eq!(tier_for(10.0), RiskTier::Low);
        assert_eq!(tier_for(25.0), RiskTier::Moderate);
        assert_eq!(tier_for(45.0), RiskTier::Elevated);
        assert_eq!(tier_for(65.0), RiskTier::High);
        assert_eq!(tier_for(85.0), RiskTier::VeryHigh);
        assert_eq!(tier_for(100.0), RiskTier::VeryHigh);
    }
}
