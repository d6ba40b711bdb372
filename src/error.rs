//! Application- and run-level error types.
//!
//! `AppError` covers bootstrap concerns (config, logger, io).
//! `PipelineError` is the run-level taxonomy: only run-wide failures are
//! surfaced here — per-slice and per-channel degradations are absorbed at
//! their own task boundary and embedded in the output instead.

use thiserror::Error;

use crate::classify::ClassifyError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failures for one exam run.
///
/// `Selection` and `Screening` are fatal by design: with no usable slices or
/// no tier-1 results there is nothing to reconcile. Escalation failures never
/// appear here — the affected channel keeps its tier-1 result and is tagged
/// unconfirmed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("slice selection failed: {0}")]
    Selection(String),

    #[error("tier-1 screening failed: {0}")]
    Screening(String),

    #[error("classifier error: {0}")]
    Classify(#[from] ClassifyError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn selection_error_display() {
        let e = PipelineError::Selection("no slice survived decoding".into());
        assert!(e.to_string().contains("slice selection failed"));
    }

    #[test]
    fn classify_error_converts() {
        let e: PipelineError = ClassifyError::Request("timeout".into()).into();
        assert!(e.to_string().contains("timeout"));
    }
}
