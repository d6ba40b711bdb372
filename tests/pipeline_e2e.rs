//! End-to-end pipeline run against the scripted in-process provider:
//! a 500-slice series through sampling, tiered classification,
//! reconciliation, and risk scoring.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use pulmoscan::channels::ChannelId;
use pulmoscan::classify::providers::dummy::DummyProvider;
use pulmoscan::classify::{ChannelReading, ClassifierProvider};
use pulmoscan::config::{self, Config};
use pulmoscan::findings::{LesionType, Margin, NoduleFeatures, NoduleLocation, NO_FINDING_NARRATIVE};
use pulmoscan::pipeline::ExamPipeline;
use pulmoscan::risk::{PatientContext, RiskTier};
use pulmoscan::study::{LuminanceDecoder, RawSlice, StudySet};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 16;

fn load_config(dir: &TempDir) -> Config {
    let path = dir.path().join("default.toml");
    fs::write(
        &path,
        r#"
[pipeline]
instance_name = "e2e"
work_dir = "/tmp/pulmoscan-e2e"
log_level = "warn"

[sampler]
target_count = 200

[classifier]
default = "dummy"
"#,
    )
    .unwrap();
    config::load_from(&path, None, None).unwrap()
}

/// 500 slices: the first 150 carry strong in-band texture, the rest are
/// flat mid-grey. Variance ranking must put the textured ones on top.
fn study() -> StudySet {
    let n = (WIDTH * HEIGHT) as usize;
    let mut slices = Vec::with_capacity(500);
    for i in 0..500 {
        let bytes: Vec<u8> = if i < 150 {
            (0..n).map(|p| if p % 2 == 0 { 20 } else { 180 }).collect()
        } else {
            vec![100u8; n]
        };
        slices.push(RawSlice::new(i, format!("slice_{i:03}.raw"), bytes));
    }
    StudySet::new("exam-e2e-001", slices)
}

fn reading(label: &str, present: bool, confidence: f64, reasoning: &str) -> ChannelReading {
    ChannelReading {
        channel: label.into(),
        present,
        confidence,
        subtype: None,
        reasoning: reasoning.into(),
        supporting_evidence: Vec::new(),
        contradicting_evidence: Vec::new(),
        visible_slice_indices: Vec::new(),
        nodule: None,
    }
}

fn provider() -> ClassifierProvider {
    // Tier 1: two positives and one low-confidence negative; the other five
    // channels stay at the confident-absent default and must not escalate.
    let nodule_mass_screen = ChannelReading {
        nodule: Some(NoduleFeatures {
            size_mm: 21.0,
            spiculation: 2,
            margin: Margin::Lobulated,
            lesion_type: LesionType::Solid,
            location: NoduleLocation::UpperLobe,
            malignancy_pct: 40.0,
        }),
        visible_slice_indices: vec![40, 41],
        ..reading("nodule_mass", true, 95.0, "Solid right upper lobe mass.")
    };
    let nodule_mass_escalate = ChannelReading {
        nodule: Some(NoduleFeatures {
            size_mm: 22.0,
            spiculation: 3,
            margin: Margin::Spiculated,
            lesion_type: LesionType::Solid,
            location: NoduleLocation::UpperLobe,
            malignancy_pct: 55.0,
        }),
        visible_slice_indices: vec![39, 40, 41],
        ..reading(
            "nodule_mass",
            true,
            96.0,
            "Spiculated 22 mm solid mass in the right upper lobe.",
        )
    };

    ClassifierProvider::Dummy(
        DummyProvider::new()
            .with_screen(vec![
                reading("tuberculosis", true, 88.0, "Possible apical cavitation."),
                nodule_mass_screen,
                reading("emphysema", false, 60.0, "Lung parenchyma partially assessable."),
            ])
            .with_escalation(vec![
                reading(
                    "tuberculosis",
                    true,
                    97.0,
                    "Thick-walled cavitation in the right apex with tree-in-bud nodularity.",
                ),
                nodule_mass_escalate,
                reading("emphysema", false, 91.0, "Attenuation within normal limits."),
            ]),
    )
}

#[tokio::test]
async fn full_run_produces_reconciled_findings_and_risk() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&dir);
    let decoder = Arc::new(LuminanceDecoder { width: WIDTH, height: HEIGHT });
    let pipeline = ExamPipeline::new(config, provider(), decoder);

    let patient = PatientContext {
        age: 67,
        smoking_history: true,
        family_history: false,
        prior_cancer: false,
    };
    let outcome = pipeline.run(&study(), Some(&patient)).await.unwrap();

    assert_eq!(outcome.exam_id, "exam-e2e-001");

    // Selection: exactly K slices, the textured block wholly in the top quota.
    let selected = &outcome.selection.selected;
    assert_eq!(selected.len(), 200);
    assert_eq!(outcome.selection.high_variance_quota, 150);
    let from_textured = selected.iter().filter(|&&i| i < 150).count();
    assert_eq!(from_textured, 150);
    assert!(selected.windows(2).all(|w| w[0] < w[1]), "indices must ascend");

    // Findings: full taxonomy, narratives gated on the final boolean.
    assert_eq!(outcome.findings.entries.len(), 8);
    for f in outcome.findings.entries.values() {
        assert!(!f.narrative.is_empty());
        assert!(!f.unconfirmed);
        if !f.present {
            assert_eq!(f.narrative, NO_FINDING_NARRATIVE);
        }
    }

    // Escalated channels carry the tier-2 values.
    let tb = outcome.findings.get(ChannelId::Tuberculosis).unwrap();
    assert!(tb.present);
    assert_eq!(tb.confidence, 97);
    assert!(tb.narrative.contains("tree-in-bud"));

    let emphysema = outcome.findings.get(ChannelId::Emphysema).unwrap();
    assert!(!emphysema.present);
    assert_eq!(emphysema.confidence, 91);

    // 22 mm solid mass: top tier regardless of the weighted score.
    let risk = outcome.nodule_risk.expect("nodule risk must be scored");
    assert_eq!(risk.tier, RiskTier::VeryHigh);

    // One batched screen, one escalation each for the two positives and the
    // low-confidence channel.
    assert_eq!(outcome.budget.screen.calls, 1);
    assert_eq!(outcome.budget.escalate.calls, 3);
    assert!(outcome.budget.spent_usd > 0.0);
}

#[tokio::test]
async fn tiny_series_skips_sampling() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&dir);
    let decoder = Arc::new(LuminanceDecoder { width: WIDTH, height: HEIGHT });
    let pipeline = ExamPipeline::new(config, provider(), decoder);

    let n = (WIDTH * HEIGHT) as usize;
    let slices = (0..6)
        .map(|i| RawSlice::new(i, format!("slice_{i:03}.raw"), vec![100u8; n]))
        .collect();
    let outcome = pipeline
        .run(&StudySet::new("exam-e2e-002", slices), None)
        .await
        .unwrap();

    assert_eq!(outcome.selection.selected, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(outcome.findings.entries.len(), 8);
    // No patient context: risk scoring is skipped even with a flagged mass.
    assert!(outcome.nodule_risk.is_none());
}
