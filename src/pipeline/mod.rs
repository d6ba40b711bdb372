//! Exam orchestration — one coordinating task per exam.
//!
//! Flow: variance sampling → batched tier-1 screening → bounded tier-2
//! escalation fan-out → evidence reconciliation → optional nodule risk
//! scoring. Reconciliation waits for every escalation task (success or
//! isolated failure) before running; there is no partial reconciliation
//! and no mid-run cancellation. The only cross-task mutable state is the
//! per-run budget ledger.

pub mod dispatch;
pub mod escalate;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::{normalize_label, ChannelId};
use crate::classify::{ClassifierProvider, SliceImage};
use crate::config::Config;
use crate::error::PipelineError;
use crate::findings::FindingSet;
use crate::ledger::{BudgetLedger, LedgerSnapshot};
use crate::reconcile::{self, ReconcilePolicy};
use crate::risk::{self, NoduleRiskProfile, PatientContext};
use crate::sampler::{self, SelectionPlan};
use crate::study::{SliceDecoder, StudySet};

/// Everything one exam run produces, for report assembly and persistence.
#[derive(Debug, Serialize)]
pub struct ExamOutcome {
    pub run_id: Uuid,
    pub exam_id: String,
    pub selection: SelectionPlan,
    pub findings: FindingSet,
    pub nodule_risk: Option<NoduleRiskProfile>,
    pub budget: LedgerSnapshot,
}

/// The tiered inference pipeline for one deployment. Cheap to clone
/// per-exam state is created inside [`run`](Self::run); the pipeline itself
/// holds only shared immutable capabilities.
pub struct ExamPipeline {
    config: Config,
    provider: ClassifierProvider,
    decoder: Arc<dyn SliceDecoder>,
    policy: ReconcilePolicy,
}

impl ExamPipeline {
    pub fn new(config: Config, provider: ClassifierProvider, decoder: Arc<dyn SliceDecoder>) -> Self {
        let policy = build_policy(&config);
        Self { config, provider, decoder, policy }
    }

    /// Run the full pipeline for one exam.
    ///
    /// Degradations (decode failures, failed escalations) are embedded in
    /// the outcome; only run-wide failures return an error.
    pub async fn run(
        &self,
        study: &StudySet,
        patient: Option<&PatientContext>,
    ) -> Result<ExamOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, exam = %study.exam_id, slices = study.len(), "exam run starting");

        // Ledger is scoped to this run.
        let ledger = Arc::new(BudgetLedger::new(
            self.config.budget.cost_limit_usd,
            self.config.classifier.screen.rates(),
            self.config.classifier.escalate.rates(),
        ));

        let selection =
            sampler::select_slices(study, Arc::clone(&self.decoder), &self.config.sampler).await?;
        info!(
            selected = selection.plan.selected.len(),
            retained = selection.slices.len(),
            "slice selection complete"
        );

        let images: Arc<Vec<SliceImage>> = Arc::new(
            selection
                .slices
                .iter()
                .map(|s| SliceImage { index: s.index, bytes: Arc::clone(&s.bytes), mime: "image/png" })
                .collect(),
        );

        let screen = dispatch::screen(
            &self.provider,
            &images,
            &ledger,
            self.config.escalation.confidence_threshold,
        )
        .await?;
        let mut results = screen.results;

        escalate::run(
            &self.provider,
            Arc::clone(&images),
            &screen.escalation,
            &mut results,
            &ledger,
            self.config.escalation.concurrency,
        )
        .await;

        let findings = reconcile::reconcile(results, &self.policy);
        let nodule_risk = nodule_risk(&findings, patient);

        let budget = ledger.snapshot();
        info!(
            %run_id,
            positives = findings.positives().count(),
            spent_usd = budget.spent_usd,
            utilization = budget.utilization,
            "exam run complete"
        );

        Ok(ExamOutcome {
            run_id,
            exam_id: study.exam_id.clone(),
            selection: selection.plan,
            findings,
            nodule_risk,
            budget,
        })
    }
}

/// Score the nodule channel when a mass was flagged with structured
/// attributes and patient context is available.
fn nodule_risk(
    findings: &FindingSet,
    patient: Option<&PatientContext>,
) -> Option<NoduleRiskProfile> {
    let finding = findings.get(ChannelId::NoduleMass)?;
    if !finding.present {
        return None;
    }
    let Some(features) = &finding.nodule else {
        warn!("nodule flagged without structured attributes; skipping risk scoring");
        return None;
    };
    let Some(patient) = patient else {
        debug!("no patient context supplied; skipping nodule risk scoring");
        return None;
    };
    Some(risk::assess(features, patient))
}

/// Resolve configured suppression pairs against the taxonomy. Unknown
/// labels are logged and skipped rather than failing the run.
fn build_policy(config: &Config) -> ReconcilePolicy {
    let mut pairs = Vec::new();
    for (suppressor, suppressed) in &config.reconcile.suppression_pairs {
        match (normalize_label(suppressor), normalize_label(suppressed)) {
            (Some(a), Some(b)) if a != b => pairs.push((a, b)),
            _ => warn!(%suppressor, %suppressed, "ignoring invalid suppression pair"),
        }
    }
    ReconcilePolicy { suppression_pairs: pairs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn policy_resolves_known_labels() {
        let mut config = Config::test_default();
        config.reconcile.suppression_pairs = vec![
            ("pleural_effusion".into(), "atelectasis".into()),
            ("effusion".into(), "effusion".into()), // self-pair: dropped
            ("unicorn".into(), "atelectasis".into()), // unknown: dropped
        ];
        let policy = build_policy(&config);
        assert_eq!(
            policy.suppression_pairs,
            vec![(ChannelId::PleuralEffusion, ChannelId::Atelectasis)]
        );
    }
}
