//! Tier-1 batched screening and the escalation decision.
//!
//! One low-cost call carries all 8 channel criteria at once, amortizing
//! per-call overhead across the taxonomy. A tier-1 failure is fatal to the
//! run — with nothing screened there is nothing to reconcile or escalate.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::channels::{ChannelId, ALL_CHANNELS};
use crate::classify::{
    readings_to_channels, ChannelReading, ClassifierProvider, ClassifyRequest, SliceImage,
};
use crate::error::PipelineError;
use crate::findings::ScreeningResult;
use crate::ledger::{BudgetLedger, Tier};

/// Screening instructions shared by both tiers; the reply contract is the
/// same JSON shape either way.
pub(crate) const SYSTEM_PROMPT: &str = "You are a thoracic CT triage assistant. Evaluate only the \
requested pathology categories against the provided slice images. Reply with JSON only — an array \
with one object per requested category, no prose outside the JSON. Each object: \"channel\" \
(the category label exactly as given), \"present\" (boolean), \"confidence\" (0-100), \"subtype\" \
(string or null), \"reasoning\" (concise narrative), \"supporting_evidence\" (array of strings), \
\"contradicting_evidence\" (array of strings), \"visible_slice_indices\" (array of the provided \
slice indices where the finding is visible). For the nodule_mass category additionally include \
\"nodule\": {\"size_mm\", \"spiculation\" (0-5), \"margin\" (smooth|lobulated|irregular|spiculated), \
\"lesion_type\" (solid|part_solid|ground_glass|calcified), \"location\" \
(upper_lobe|middle_lobe|lower_lobe|central|pleural), \"malignancy_pct\"} when a lesion is seen.";

/// Tier-1 output: the full result map plus the channels that failed the
/// safety gate.
#[derive(Debug)]
pub struct ScreenOutcome {
    pub results: BTreeMap<ChannelId, ScreeningResult>,
    pub escalation: Vec<ChannelId>,
}

/// Build the batched tier-1 request over all channels.
pub fn screen_request(image_indices: &[usize]) -> ClassifyRequest {
    let mut user = String::from(
        "Screen the attached CT slices for each category below. Use abbreviated criteria; a \
         dedicated review follows for anything uncertain.\n\n",
    );
    for channel in ALL_CHANNELS {
        user.push_str("- ");
        user.push_str(channel.label());
        user.push_str(": ");
        user.push_str(channel.screening_criteria());
        user.push('\n');
    }
    user.push_str(&format!(
        "\nSlice indices provided, in order: {image_indices:?}. Reference these indices in \
         visible_slice_indices."
    ));
    ClassifyRequest {
        channels: ALL_CHANNELS.to_vec(),
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Run the batched screening call and derive the escalation set.
pub async fn screen(
    provider: &ClassifierProvider,
    images: &[SliceImage],
    ledger: &Arc<BudgetLedger>,
    confidence_threshold: u8,
) -> Result<ScreenOutcome, PipelineError> {
    let indices: Vec<usize> = images.iter().map(|i| i.index).collect();
    let request = screen_request(&indices);

    let output = provider
        .classify(Tier::Screen, &request, images)
        .await
        .map_err(|e| PipelineError::Screening(e.to_string()))?;

    if let Some(usage) = &output.usage {
        ledger.record_call(Tier::Screen, usage);
    }

    let mapped = readings_to_channels(output.readings);
    if mapped.is_empty() {
        return Err(PipelineError::Screening(
            "screening reply contained no recognisable channel".into(),
        ));
    }

    let mut results: BTreeMap<ChannelId, ScreeningResult> = mapped
        .into_iter()
        .map(|(id, reading)| (id, to_screening_result(id, reading)))
        .collect();

    // A channel the reply omitted becomes a zero-confidence negative, which
    // the gate below sends straight to tier 2.
    for channel in ALL_CHANNELS {
        results
            .entry(channel)
            .or_insert_with(|| ScreeningResult::missing(channel));
    }

    let escalation = escalation_set(&results, confidence_threshold);
    info!(
        positives = results.values().filter(|r| r.present).count(),
        escalating = escalation.len(),
        "tier-1 screening complete"
    );

    Ok(ScreenOutcome { results, escalation })
}

/// The escalation gate, per channel and independent: any positive, and any
/// result below the confidence threshold, is re-confirmed at tier 2. A
/// missed pathology costs far more than a redundant high-fidelity check, so
/// this is deliberately never "positives only" or "low-confidence only".
pub fn escalation_set(
    results: &BTreeMap<ChannelId, ScreeningResult>,
    confidence_threshold: u8,
) -> Vec<ChannelId> {
    results
        .values()
        .filter(|r| r.present || r.confidence < confidence_threshold)
        .map(|r| {
            debug!(
                channel = %r.channel,
                present = r.present,
                confidence = r.confidence,
                "channel gated for escalation"
            );
            r.channel
        })
        .collect()
}

/// Convert a wire reading into the immutable per-channel result.
pub(crate) fn to_screening_result(channel: ChannelId, reading: ChannelReading) -> ScreeningResult {
    ScreeningResult {
        channel,
        present: reading.present,
        confidence: reading.confidence.clamp(0.0, 100.0).round() as u8,
        subtype: reading.subtype,
        reasoning: reading.reasoning,
        supporting_evidence: reading.supporting_evidence,
        contradicting_evidence: reading.contradicting_evidence,
        visible_slice_indices: reading.visible_slice_indices,
        tier: Tier::Screen,
        unconfirmed: false,
        nodule: reading.nodule,
    }
}
