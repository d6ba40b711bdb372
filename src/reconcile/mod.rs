//! Cross-channel evidence reconciliation.
//!
//! Deterministic rules applied after all tiers finish, producing the final
//! [`FindingSet`]:
//!
//! - explicit-negation override: text asserting global absence of a
//!   condition outranks any structured flag;
//! - pattern-combination upgrade: channels with a feature rule need a
//!   minimum count of co-occurring suggestive features before the boolean
//!   flips positive — one feature alone never flips it;
//! - co-occurrence: channels are evaluated independently by default;
//!   suppression pairs are an explicit, separately toggleable policy;
//! - validated-narrative gating: a channel's narrative is emitted only when
//!   its final boolean is true.

pub mod negation;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::channels::{ChannelId, ALL_CHANNELS};
use crate::findings::{Finding, FindingSet, ScreeningResult, NO_FINDING_NARRATIVE};
use negation::{phrase_asserted, phrase_mentioned};

/// Reconciliation policy. Default: fully independent evaluation.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePolicy {
    /// `(suppressor, suppressed)` — when the first channel's final boolean
    /// is true, the second is forced absent. Empty by default.
    pub suppression_pairs: Vec<(ChannelId, ChannelId)>,
}

/// Confidence floor applied when a pattern-combination rule upgrades a
/// negative structured flag.
const UPGRADE_CONFIDENCE: u8 = 70;

/// Suggestive-feature rule per channel: phrase list plus the minimum number
/// of distinct asserted features required to upgrade. Channels without a
/// rule rely on the structured flag alone.
fn feature_rule(channel: ChannelId) -> Option<(&'static [&'static str], usize)> {
    match channel {
        ChannelId::Tuberculosis => Some((
            &["tree-in-bud", "cavitation", "miliary", "apical opacity", "caseating"],
            2,
        )),
        ChannelId::Bronchiectasis => Some((
            &["signet-ring", "tram-track", "bronchial dilation", "mucus plugging"],
            2,
        )),
        ChannelId::InterstitialLungDisease => Some((
            &["honeycombing", "reticulation", "traction bronchiectasis", "subpleural fibrosis"],
            2,
        )),
        _ => None,
    }
}

/// Phrases that assert the global absence of a condition. A literal match
/// anywhere in the narrative forces the channel negative — the phrase
/// itself carries the negation, so no scoping is needed.
fn absence_phrases(channel: ChannelId) -> [String; 3] {
    let name = channel.display_name();
    [
        format!("no evidence of {name}"),
        format!("negative for {name}"),
        format!("no {name} identified"),
    ]
}

/// Apply the reconciliation rules to the merged per-channel results.
///
/// Always yields exactly the fixed 8-channel taxonomy: a channel somehow
/// missing from `results` is treated as an unconfirmed zero-confidence
/// negative.
pub fn reconcile(
    results: BTreeMap<ChannelId, ScreeningResult>,
    policy: &ReconcilePolicy,
) -> FindingSet {
    let mut entries: BTreeMap<ChannelId, Finding> = BTreeMap::new();

    for channel in ALL_CHANNELS {
        let result = results
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| ScreeningResult::missing(channel));
        entries.insert(channel, reconcile_channel(channel, result));
    }

    // Suppression is applied over final booleans so a suppressor that was
    // itself negated by text cannot suppress anything.
    for &(suppressor, suppressed) in &policy.suppression_pairs {
        let fire = entries.get(&suppressor).map(|f| f.present).unwrap_or(false);
        if fire {
            if let Some(target) = entries.get_mut(&suppressed) {
                if target.present {
                    info!(
                        suppressor = %suppressor,
                        suppressed = %suppressed,
                        "suppression policy cleared co-detected finding"
                    );
                    target.present = false;
                    target.confidence = 0;
                    target.narrative = NO_FINDING_NARRATIVE.to_string();
                }
            }
        }
    }

    FindingSet { entries }
}

fn reconcile_channel(channel: ChannelId, result: ScreeningResult) -> Finding {
    let text = result.narrative_text();
    let mut present = result.present;
    let mut confidence = result.confidence.min(100);

    // Text evidence outranks a possibly stale structured flag.
    let explicitly_negated = absence_phrases(channel)
        .iter()
        .any(|p| phrase_mentioned(&text, p));
    if explicitly_negated {
        if present {
            debug!(channel = %channel, "explicit textual negation overrides positive flag");
        }
        present = false;
        confidence = 0;
    } else if !present {
        if let Some((features, min_count)) = feature_rule(channel) {
            let asserted = features
                .iter()
                .filter(|f| phrase_asserted(&text, f))
                .count();
            if asserted >= min_count {
                debug!(
                    channel = %channel,
                    features = asserted,
                    "pattern combination upgraded negative flag"
                );
                present = true;
                confidence = confidence.max(UPGRADE_CONFIDENCE);
            }
        }
    }

    let narrative = if present {
        if result.reasoning.trim().is_empty() {
            format!("Findings consistent with {}.", channel.display_name())
        } else {
            result.reasoning.clone()
        }
    } else {
        NO_FINDING_NARRATIVE.to_string()
    };

    Finding {
        channel,
        present,
        confidence,
        subtype: result.subtype,
        narrative,
        visible_slice_indices: result.visible_slice_indices,
        unconfirmed: result.unconfirmed,
        nodule: result.nodule,
    }
}
