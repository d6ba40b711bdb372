//! Classifier provider abstraction.
//!
//! `ClassifierProvider` is an enum over concrete provider implementations —
//! enum dispatch avoids `dyn` trait objects and the `async-trait`
//! dependency. Provider instances are shared immutable capabilities; clone
//! them freely.
//!
//! The vision classification itself is opaque to this crate: a provider
//! takes criteria text plus encoded slice images and returns structured
//! per-channel readings with token usage. Parsing of the (possibly fenced)
//! JSON reply is shared here so every backend yields the same shape.

pub mod providers;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::channels::{normalize_label, ChannelId};
use crate::findings::NoduleFeatures;
use crate::ledger::{CallUsage, Tier};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("unparseable classifier reply: {0}")]
    Parse(String),
}

// ── Request/response shapes ───────────────────────────────────────────────────

/// One classification request: which channels to evaluate and the prompt
/// pair built from their criteria.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub channels: Vec<ChannelId>,
    pub system: String,
    pub user: String,
}

/// One encoded slice image for the wire.
#[derive(Debug, Clone)]
pub struct SliceImage {
    /// Original series index — echoed back in `visible_slice_indices`.
    pub index: usize,
    pub bytes: Arc<Vec<u8>>,
    pub mime: &'static str,
}

/// Raw structured reading for one channel as the model reports it.
/// The channel label is free-form here; [`readings_to_channels`] maps it
/// onto the fixed taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReading {
    pub channel: String,
    pub present: bool,
    /// 0–100; out-of-range values are clamped downstream.
    pub confidence: f64,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub contradicting_evidence: Vec<String>,
    #[serde(default)]
    pub visible_slice_indices: Vec<usize>,
    #[serde(default)]
    pub nodule: Option<NoduleFeatures>,
}

/// Parsed provider reply: readings plus usage for the ledger.
#[derive(Debug, Clone)]
pub struct ClassifyOutput {
    pub readings: Vec<ChannelReading>,
    pub usage: Option<CallUsage>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available classifier backends.
///
/// Adding a backend = new module + new variant + new match arms.
#[derive(Debug, Clone)]
pub enum ClassifierProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiVision(providers::openai_vision::OpenAiVisionProvider),
}

impl ClassifierProvider {
    /// Run one classification call at the given tier.
    pub async fn classify(
        &self,
        tier: Tier,
        request: &ClassifyRequest,
        images: &[SliceImage],
    ) -> Result<ClassifyOutput, ClassifyError> {
        match self {
            ClassifierProvider::Dummy(p) => p.classify(tier, request, images).await,
            ClassifierProvider::OpenAiVision(p) => p.classify(tier, request, images).await,
        }
    }

    /// Lightweight reachability probe. The dummy backend is always up.
    pub async fn ping(&self) -> Result<(), ClassifyError> {
        match self {
            ClassifierProvider::Dummy(_) => Ok(()),
            ClassifierProvider::OpenAiVision(p) => p.ping().await,
        }
    }
}

// ── Shared reply parsing ──────────────────────────────────────────────────────

/// Parse a model text reply into readings. Accepts a bare JSON array, a
/// single object, or either wrapped in markdown code fences.
pub fn parse_readings(text: &str) -> Result<Vec<ChannelReading>, ClassifyError> {
    let body = strip_fences(text);
    if let Ok(list) = serde_json::from_str::<Vec<ChannelReading>>(body) {
        return Ok(list);
    }
    match serde_json::from_str::<ChannelReading>(body) {
        Ok(one) => Ok(vec![one]),
        Err(e) => Err(ClassifyError::Parse(format!("{e}; reply started: {:.120}", body))),
    }
}

/// Drop a leading/trailing markdown code fence if present.
fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    // Skip an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Map free-form readings onto the fixed taxonomy. Unrecognised labels are
/// logged and dropped; a later duplicate for a channel wins (the model
/// corrected itself).
pub fn readings_to_channels(
    readings: Vec<ChannelReading>,
) -> Vec<(ChannelId, ChannelReading)> {
    let mut out: Vec<(ChannelId, ChannelReading)> = Vec::with_capacity(readings.len());
    for reading in readings {
        match normalize_label(&reading.channel) {
            Some(id) => {
                out.retain(|(existing, _)| *existing != id);
                out.push((id, reading));
            }
            None => warn!(label = %reading.channel, "unrecognised channel label, dropping reading"),
        }
    }
    out
}
