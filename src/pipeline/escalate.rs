//! Tier-2 escalation executor — bounded concurrent re-classification.
//!
//! Channels are independent: each task gets the full criteria for its own
//! channel, the same slice subset, and writes only its own result slot. A
//! failed channel is isolated — the tier-1 result is retained and tagged
//! unconfirmed; the run never aborts here.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::channels::ChannelId;
use crate::classify::{
    readings_to_channels, ClassifierProvider, ClassifyError, ClassifyRequest, SliceImage,
};
use crate::findings::ScreeningResult;
use crate::ledger::{BudgetLedger, Tier};

use super::dispatch::{to_screening_result, SYSTEM_PROMPT};

/// Build the single-channel tier-2 request with full criteria.
pub fn escalation_request(channel: ChannelId, image_indices: &[usize]) -> ClassifyRequest {
    let user = format!(
        "Re-evaluate the attached CT slices for one category only: {label}.\n\n{criteria}\n\n\
         Slice indices provided, in order: {image_indices:?}. Reference these indices in \
         visible_slice_indices. Reply with a JSON array containing exactly one object for \
         {label}.",
        label = channel.label(),
        criteria = channel.full_criteria(),
    );
    ClassifyRequest {
        channels: vec![channel],
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Re-classify every gated channel concurrently, overwriting successful
/// slots in `results` and tagging failed ones unconfirmed.
///
/// `concurrency` bounds the fan-out; reconciliation must not start until
/// this returns, which the join loop guarantees.
pub async fn run(
    provider: &ClassifierProvider,
    images: Arc<Vec<SliceImage>>,
    targets: &[ChannelId],
    results: &mut BTreeMap<ChannelId, ScreeningResult>,
    ledger: &Arc<BudgetLedger>,
    concurrency: usize,
) {
    if targets.is_empty() {
        return;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<(ChannelId, Result<ScreeningResult, ClassifyError>)> = JoinSet::new();

    for &channel in targets {
        let provider = provider.clone();
        let images = Arc::clone(&images);
        let ledger = Arc::clone(ledger);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let indices: Vec<usize> = images.iter().map(|i| i.index).collect();
            let request = escalation_request(channel, &indices);
            let outcome = provider.classify(Tier::Escalate, &request, &images).await;
            let result = outcome.and_then(|output| {
                if let Some(usage) = &output.usage {
                    ledger.record_call(Tier::Escalate, usage);
                }
                readings_to_channels(output.readings)
                    .into_iter()
                    .find(|(id, _)| *id == channel)
                    .map(|(id, reading)| {
                        let mut r = to_screening_result(id, reading);
                        r.tier = Tier::Escalate;
                        r
                    })
                    .ok_or_else(|| {
                        ClassifyError::Parse(format!(
                            "escalation reply did not cover channel {channel}"
                        ))
                    })
            });
            (channel, result)
        });
    }

    let mut confirmed = 0usize;
    let mut degraded = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((channel, Ok(result))) => {
                // Wholesale replacement — tier-2 never patches tier-1 fields.
                results.insert(channel, result);
                confirmed += 1;
            }
            Ok((channel, Err(e))) => {
                warn!(channel = %channel, error = %e, "escalation failed; keeping tier-1 result as unconfirmed");
                if let Some(slot) = results.get_mut(&channel) {
                    slot.unconfirmed = true;
                }
                degraded += 1;
            }
            Err(e) => {
                // Task panic: the channel keeps its tier-1 slot untouched;
                // which channel it was is unknown here, so tag nothing.
                warn!(error = %e, "escalation task panicked");
                degraded += 1;
            }
        }
    }
    info!(confirmed, degraded, "tier-2 escalation complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::providers::dummy::DummyProvider;
    use crate::classify::ChannelReading;
    use crate::ledger::ModelRates;

    fn ledger() -> Arc<BudgetLedger> {
        let rates = ModelRates {
            input_per_million_usd: 1.0,
            output_per_million_usd: 2.0,
            cached_input_per_million_usd: 0.1,
        };
        Arc::new(BudgetLedger::new(5.0, rates, rates))
    }

    fn tier1_results(channels: &[ChannelId]) -> BTreeMap<ChannelId, ScreeningResult> {
        channels
            .iter()
            .map(|&c| {
                let mut r = ScreeningResult::missing(c);
                r.confidence = 50;
                (c, r)
            })
            .collect()
    }

    fn reading(label: &str, present: bool, confidence: f64) -> ChannelReading {
        ChannelReading {
            channel: label.into(),
            present,
            confidence,
            subtype: None,
            reasoning: format!("Escalated review of {label}."),
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            visible_slice_indices: Vec::new(),
            nodule: None,
        }
    }

    #[tokio::test]
    async fn successful_escalation_replaces_slot() {
        let provider = ClassifierProvider::Dummy(
            DummyProvider::new().with_escalation(vec![reading("pneumonia", true, 96.0)]),
        );
        let mut results = tier1_results(&[ChannelId::Pneumonia]);
        let ledger = ledger();
        run(
            &provider,
            Arc::new(Vec::new()),
            &[ChannelId::Pneumonia],
            &mut results,
            &ledger,
            8,
        )
        .await;

        let r = &results[&ChannelId::Pneumonia];
        assert!(r.present);
        assert_eq!(r.confidence, 96);
        assert_eq!(r.tier, Tier::Escalate);
        assert!(!r.unconfirmed);
        assert_eq!(ledger.snapshot().escalate.calls, 1);
    }

    #[tokio::test]
    async fn failed_channel_is_isolated() {
        let provider = ClassifierProvider::Dummy(
            DummyProvider::new()
                .with_escalation(vec![reading("pneumonia", true, 96.0)])
                .failing_escalation(&["tuberculosis"]),
        );
        let mut results = tier1_results(&[ChannelId::Pneumonia, ChannelId::Tuberculosis]);
        let ledger = ledger();
        run(
            &provider,
            Arc::new(Vec::new()),
            &[ChannelId::Pneumonia, ChannelId::Tuberculosis],
            &mut results,
            &ledger,
            8,
        )
        .await;

        // Failed channel keeps its tier-1 value, tagged unconfirmed.
        let tb = &results[&ChannelId::Tuberculosis];
        assert_eq!(tb.tier, Tier::Screen);
        assert!(tb.unconfirmed);
        assert_eq!(tb.confidence, 50);

        // The other channel is unaffected.
        assert!(results[&ChannelId::Pneumonia].present);
        assert_eq!(ledger.snapshot().escalate.calls, 1);
    }

    #[tokio::test]
    async fn empty_target_set_is_a_no_op() {
        let provider = ClassifierProvider::Dummy(DummyProvider::new());
        let mut results = tier1_results(&[ChannelId::Emphysema]);
        let ledger = ledger();
        run(&provider, Arc::new(Vec::new()), &[], &mut results, &ledger, 8).await;
        assert_eq!(ledger.snapshot().escalate.calls, 0);
        assert!(!results[&ChannelId::Emphysema].unconfirmed);
    }

    #[test]
    fn escalation_request_uses_full_criteria() {
        let req = escalation_request(ChannelId::Bronchiectasis, &[3, 9]);
        assert_eq!(req.channels, vec![ChannelId::Bronchiectasis]);
        assert!(req.user.contains("signet-ring"));
        assert!(req.user.contains("[3, 9]"));
    }
}
