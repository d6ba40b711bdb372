//! Scripted in-process provider for tests and offline runs.
//!
//! By default every requested channel comes back absent at high confidence.
//! Tests script tier-1 readings, per-channel tier-2 replies, and forced
//! tier-2 failures through the builder methods. Usage figures are synthetic
//! but proportional to the request so ledger arithmetic stays meaningful.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::classify::{ChannelReading, ClassifyError, ClassifyOutput, ClassifyRequest, SliceImage};
use crate::ledger::{CallUsage, Tier};

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    /// Tier-1 overrides, keyed by canonical channel label.
    screen: Arc<HashMap<String, ChannelReading>>,
    /// Tier-2 overrides, keyed by canonical channel label.
    escalate: Arc<HashMap<String, ChannelReading>>,
    /// Channels whose tier-2 call must fail.
    fail_escalate: Arc<HashSet<String>>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script tier-1 readings. Channels not listed stay at the default
    /// (absent, confidence 92).
    pub fn with_screen(mut self, readings: Vec<ChannelReading>) -> Self {
        self.screen = Arc::new(
            readings.into_iter().map(|r| (r.channel.clone(), r)).collect(),
        );
        self
    }

    /// Script tier-2 readings for specific channels.
    pub fn with_escalation(mut self, readings: Vec<ChannelReading>) -> Self {
        self.escalate = Arc::new(
            readings.into_iter().map(|r| (r.channel.clone(), r)).collect(),
        );
        self
    }

    /// Force tier-2 failures for the given canonical labels.
    pub fn failing_escalation(mut self, labels: &[&str]) -> Self {
        self.fail_escalate = Arc::new(labels.iter().map(|s| s.to_string()).collect());
        self
    }

    fn default_reading(label: &str) -> ChannelReading {
        ChannelReading {
            channel: label.to_string(),
            present: false,
            confidence: 92.0,
            subtype: None,
            reasoning: format!("No findings suggestive of {} on the reviewed slices.", label.replace('_', " ")),
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            visible_slice_indices: Vec::new(),
            nodule: None,
        }
    }

    pub async fn classify(
        &self,
        tier: Tier,
        request: &ClassifyRequest,
        images: &[SliceImage],
    ) -> Result<ClassifyOutput, ClassifyError> {
        let overrides = match tier {
            Tier::Screen => &self.screen,
            Tier::Escalate => &self.escalate,
        };

        let mut readings = Vec::with_capacity(request.channels.len());
        for channel in &request.channels {
            let label = channel.label();
            if tier == Tier::Escalate && self.fail_escalate.contains(label) {
                return Err(ClassifyError::Request(format!(
                    "scripted escalation failure for {label}"
                )));
            }
            readings.push(
                overrides
                    .get(label)
                    .cloned()
                    .unwrap_or_else(|| Self::default_reading(label)),
            );
        }

        Ok(ClassifyOutput {
            readings,
            usage: Some(CallUsage {
                input_tokens: 800 * images.len() as u64 + 400,
                output_tokens: 120 * request.channels.len() as u64,
                cached_input_tokens: 0,
            }),
        })
    }
}
