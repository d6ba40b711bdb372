//! Memory-bounded variance sampling over a CT slice series.
//!
//! Two passes. Pass 1 decodes slices in small concurrency-limited batches,
//! takes a structural variance score per slice, and drops each decoded
//! buffer before the next batch starts — peak memory is bounded by the
//! batch size, not the series length. Pass 2 selects a hybrid subset from
//! the ranked scores: top-M by variance plus a uniformly spaced residual
//! for regional coverage, then decodes and retains only the selected
//! slices.
//!
//! Selection is deterministic: stable ordering with ascending-index
//! tie-break, so identical inputs always produce identical plans.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SamplerConfig;
use crate::error::PipelineError;
use crate::study::{PixelBuffer, Slice, SliceDecoder, StudySet};

/// The selection decision for one exam.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionPlan {
    pub target_count: usize,
    pub high_variance_quota: usize,
    pub uniform_quota: usize,
    /// Selected slice indices, ascending.
    pub selected: Vec<usize>,
}

/// Plan plus the decoded slices retained for classification.
#[derive(Debug)]
pub struct SelectionOutcome {
    pub plan: SelectionPlan,
    pub slices: Vec<Slice>,
}

/// Score and select up to `cfg.target_count` slices from `study`.
///
/// Per-slice decode failures are tolerated; the run proceeds with whatever
/// decoded. Zero decodable slices is fatal.
pub async fn select_slices(
    study: &StudySet,
    decoder: Arc<dyn SliceDecoder>,
    cfg: &SamplerConfig,
) -> Result<SelectionOutcome, PipelineError> {
    let n = study.len();
    if n == 0 {
        return Err(PipelineError::Selection("study contains no slices".into()));
    }

    // Pass 1: batched decode + score, buffers dropped per batch.
    let scores = score_all(study, &decoder, cfg).await;
    let decodable: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|v| (i, v)))
        .collect();

    if decodable.is_empty() {
        return Err(PipelineError::Selection(format!(
            "no slice survived decoding ({n} attempted)"
        )));
    }
    if decodable.len() < n {
        warn!(failed = n - decodable.len(), total = n, "some slices failed to decode");
    }

    let plan = plan_selection(&decodable, n, cfg);
    debug!(
        selected = plan.selected.len(),
        high_variance = plan.high_variance_quota,
        uniform = plan.uniform_quota,
        "selection plan ready"
    );

    // Pass 2: decode and retain only the selected subset.
    let slices = decode_selected(study, &decoder, &plan, &scores, cfg).await;
    if slices.is_empty() {
        return Err(PipelineError::Selection(
            "no selected slice survived the retention decode".into(),
        ));
    }

    Ok(SelectionOutcome { plan, slices })
}

async fn score_all(
    study: &StudySet,
    decoder: &Arc<dyn SliceDecoder>,
    cfg: &SamplerConfig,
) -> Vec<Option<f64>> {
    let n = study.len();
    let mut scores: Vec<Option<f64>> = vec![None; n];
    let indices: Vec<usize> = (0..n).collect();
    let window = (cfg.lung_window_low, cfg.lung_window_high);
    let min_fraction = cfg.min_lung_fraction;

    for chunk in indices.chunks(cfg.decode_batch.max(1)) {
        let mut handles = Vec::with_capacity(chunk.len());
        for &i in chunk {
            let decoder = Arc::clone(decoder);
            let raw = study.slices[i].clone();
            handles.push(tokio::task::spawn_blocking(move || {
                // Decoded buffer lives only inside this closure.
                decoder.decode(&raw).map(|px| variance_score(&px, window, min_fraction))
            }));
        }
        for (&i, joined) in chunk.iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(score)) => scores[i] = Some(score),
                Ok(Err(e)) => warn!(slice = i, error = %e, "decode failed, skipping slice"),
                Err(e) => warn!(slice = i, error = %e, "decode task panicked, skipping slice"),
            }
        }
        // All buffers for this batch have been dropped before the next one starts.
    }
    scores
}

/// Structural variance proxy: intensity spread inside the lung window plus
/// edge energy. Slices with too little in-window content score zero.
fn variance_score(px: &PixelBuffer, window: (u8, u8), min_fraction: f64) -> f64 {
    let (low, high) = window;
    let in_band: Vec<f64> = px
        .data
        .iter()
        .filter(|&&v| v >= low && v <= high)
        .map(|&v| f64::from(v))
        .collect();

    let fraction = in_band.len() as f64 / px.data.len().max(1) as f64;
    if fraction < min_fraction {
        return 0.0;
    }

    let mean = in_band.iter().sum::<f64>() / in_band.len() as f64;
    let variance = in_band.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / in_band.len() as f64;

    variance + 2.0 * edge_energy(px)
}

/// Mean absolute horizontal gradient — cheap proxy for structural detail.
fn edge_energy(px: &PixelBuffer) -> f64 {
    let w = px.width as usize;
    if w < 2 || px.data.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut count = 0usize;
    for row in px.data.chunks_exact(w) {
        for pair in row.windows(2) {
            total += (f64::from(pair[1]) - f64::from(pair[0])).abs();
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// Pass 2 ranking: hybrid top-M + uniform residual over the decodable set.
fn plan_selection(decodable: &[(usize, f64)], n: usize, cfg: &SamplerConfig) -> SelectionPlan {
    let k = cfg.target_count.min(decodable.len());

    // Tiny series or nothing to trim: take everything decodable.
    if decodable.len() <= cfg.min_series || decodable.len() <= cfg.target_count {
        let selected: Vec<usize> = decodable.iter().map(|&(i, _)| i).collect();
        return SelectionPlan {
            target_count: cfg.target_count.min(n),
            high_variance_quota: 0,
            uniform_quota: selected.len(),
            selected,
        };
    }

    // Content gate rejected everything: fall back to the leading decodable
    // indices rather than ranking meaningless zeros.
    if decodable.iter().all(|&(_, s)| s == 0.0) {
        info!("no slice passed the lung-content gate; falling back to leading indices");
        let selected: Vec<usize> = decodable.iter().take(k).map(|&(i, _)| i).collect();
        return SelectionPlan {
            target_count: k,
            high_variance_quota: 0,
            uniform_quota: selected.len(),
            selected,
        };
    }

    let high_quota = ((k as f64) * cfg.high_variance_fraction).ceil() as usize;
    let high_quota = high_quota.min(k);
    let uniform_quota = k - high_quota;

    // Rank by score descending, ascending index on ties.
    let mut ranked = decodable.to_vec();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut selected: BTreeSet<usize> = ranked.iter().take(high_quota).map(|&(i, _)| i).collect();

    // Uniformly spaced residual across the remaining index range.
    let remaining: Vec<usize> = decodable
        .iter()
        .map(|&(i, _)| i)
        .filter(|i| !selected.contains(i))
        .collect();
    if uniform_quota > 0 && !remaining.is_empty() {
        let step = (remaining.len() / uniform_quota).max(1);
        for slot in 0..uniform_quota {
            let pos = slot * step;
            if pos >= remaining.len() {
                break;
            }
            selected.insert(remaining[pos]);
        }
    }

    // Deduplication can leave the set short; backfill with the lowest
    // unselected indices so the cardinality contract holds exactly.
    if selected.len() < k {
        for &(i, _) in decodable {
            if selected.len() >= k {
                break;
            }
            selected.insert(i);
        }
    }

    SelectionPlan {
        target_count: k,
        high_variance_quota: high_quota,
        uniform_quota,
        selected: selected.into_iter().collect(),
    }
}

async fn decode_selected(
    study: &StudySet,
    decoder: &Arc<dyn SliceDecoder>,
    plan: &SelectionPlan,
    scores: &[Option<f64>],
    cfg: &SamplerConfig,
) -> Vec<Slice> {
    let mut out = Vec::with_capacity(plan.selected.len());
    for chunk in plan.selected.chunks(cfg.decode_batch.max(1)) {
        let mut handles = Vec::with_capacity(chunk.len());
        for &i in chunk {
            let decoder = Arc::clone(decoder);
            let raw = study.slices[i].clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let decoded = decoder.decode(&raw);
                (raw, decoded)
            }));
        }
        for joined in join_all(handles).await {
            match joined {
                Ok((raw, Ok(pixels))) => out.push(Slice {
                    index: raw.index,
                    filename: raw.filename.clone(),
                    variance_score: scores[raw.index].unwrap_or(0.0),
                    bytes: Arc::clone(&raw.bytes),
                    pixels,
                }),
                Ok((raw, Err(e))) => {
                    warn!(slice = raw.index, error = %e, "retention decode failed, dropping slice")
                }
                Err(e) => warn!(error = %e, "retention decode task panicked"),
            }
        }
    }
    out.sort_by_key(|s| s.index);
    out
}
