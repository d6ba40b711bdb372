//! Per-channel classification results and the final reconciled finding set.
//!
//! `ScreeningResult` is immutable once produced: a later tier replaces the
//! whole value for its channel, it never patches fields in place. The
//! reconciler turns the result map into a `FindingSet` — the only shape
//! downstream reporting ever sees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channels::ChannelId;
use crate::ledger::Tier;

/// Narrative emitted for channels whose final boolean is false.
pub const NO_FINDING_NARRATIVE: &str = "None identified.";

/// Structured nodule attributes reported by the classifier for the
/// nodule/mass channel. Input to the risk engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoduleFeatures {
    /// Largest axial diameter in millimetres.
    pub size_mm: f64,
    /// Spiculation severity, 0 (none) to 5 (marked).
    #[serde(default)]
    pub spiculation: u8,
    #[serde(default)]
    pub margin: Margin,
    #[serde(default)]
    pub lesion_type: LesionType,
    #[serde(default)]
    pub location: NoduleLocation,
    /// Classifier-estimated malignancy likelihood, percent.
    #[serde(default)]
    pub malignancy_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Margin {
    #[default]
    Smooth,
    Lobulated,
    Irregular,
    Spiculated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LesionType {
    #[default]
    Solid,
    PartSolid,
    GroundGlass,
    Calcified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoduleLocation {
    UpperLobe,
    MiddleLobe,
    #[default]
    LowerLobe,
    Central,
    Pleural,
}

/// One channel's classification output from either tier.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningResult {
    pub channel: ChannelId,
    pub present: bool,
    /// 0–100.
    pub confidence: u8,
    pub subtype: Option<String>,
    pub reasoning: String,
    pub supporting_evidence: Vec<String>,
    pub contradicting_evidence: Vec<String>,
    /// Selected-slice indices where the finding is visible.
    pub visible_slice_indices: Vec<usize>,
    /// Which tier produced this value.
    pub tier: Tier,
    /// Set when a tier-2 re-check was required but failed; callers must
    /// treat the channel conservatively (route to human review).
    pub unconfirmed: bool,
    /// Structured nodule attributes, nodule/mass channel only.
    pub nodule: Option<NoduleFeatures>,
}

impl ScreeningResult {
    /// Placeholder for a channel the tier-1 response omitted. Zero
    /// confidence guarantees the escalation gate picks it up.
    pub fn missing(channel: ChannelId) -> Self {
        Self {
            channel,
            present: false,
            confidence: 0,
            subtype: None,
            reasoning: String::new(),
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            visible_slice_indices: Vec::new(),
            tier: Tier::Screen,
            unconfirmed: false,
            nodule: None,
        }
    }

    /// Free text the reconciler scans: reasoning plus both evidence lists.
    pub fn narrative_text(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.supporting_evidence.len()
            + self.contradicting_evidence.len());
        if !self.reasoning.is_empty() {
            parts.push(self.reasoning.clone());
        }
        parts.extend(self.supporting_evidence.iter().cloned());
        parts.extend(self.contradicting_evidence.iter().cloned());
        parts.join(" ")
    }
}

/// Final reconciled conclusion for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub channel: ChannelId,
    pub present: bool,
    pub confidence: u8,
    pub subtype: Option<String>,
    /// Validated narrative: the channel's descriptive text when present,
    /// [`NO_FINDING_NARRATIVE`] otherwise.
    pub narrative: String,
    pub visible_slice_indices: Vec<usize>,
    pub unconfirmed: bool,
    pub nodule: Option<NoduleFeatures>,
}

/// The reconciled per-channel conclusions for one exam — always exactly the
/// fixed 8-channel taxonomy, in canonical order.
#[derive(Debug, Clone, Serialize)]
pub struct FindingSet {
    pub entries: BTreeMap<ChannelId, Finding>,
}

impl FindingSet {
    pub fn get(&self, channel: ChannelId) -> Option<&Finding> {
        self.entries.get(&channel)
    }

    pub fn positives(&self) -> impl Iterator<Item = &Finding> {
        self.entries.values().filter(|f| f.present)
    }
}
