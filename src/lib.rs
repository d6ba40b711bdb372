//! pulmoscan — tiered inference orchestration for CT-chest exams.
//!
//! Ingests a slice series for one exam and produces a reconciled
//! multi-category finding set plus a nodule risk profile:
//!
//! 1. memory-bounded variance sampling selects a diagnostic slice subset;
//! 2. one batched low-cost screening call covers all 8 pathology channels;
//! 3. channels that are positive or low-confidence are re-classified
//!    concurrently at a higher-fidelity tier;
//! 4. negation-aware evidence reconciliation produces the final findings;
//! 5. a deterministic risk engine scores any flagged nodule.
//!
//! The vision classification itself is an opaque external capability
//! behind [`classify::ClassifierProvider`]; HTTP surfaces, codecs, storage,
//! and report rendering are upstream/downstream collaborators.

pub mod channels;
pub mod classify;
pub mod config;
pub mod error;
pub mod findings;
pub mod ledger;
pub mod logger;
pub mod pipeline;
pub mod reconcile;
pub mod risk;
pub mod sampler;
pub mod study;

pub use channels::{normalize_label, ChannelId, ALL_CHANNELS};
pub use classify::ClassifierProvider;
pub use config::Config;
pub use error::{AppError, PipelineError};
pub use findings::{Finding, FindingSet, ScreeningResult};
pub use ledger::{BudgetLedger, LedgerSnapshot, Tier};
pub use pipeline::{ExamOutcome, ExamPipeline};
pub use risk::{NoduleRiskProfile, PatientContext, RiskTier};
pub use study::{RawSlice, SliceDecoder, StudySet};
