//! Classifier provider implementations.
//!
//! `build(config, api_key)` is the factory — called at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_vision;

use crate::classify::{ClassifierProvider, ClassifyError};
use crate::config::ClassifierConfig;

/// Construct a `ClassifierProvider` from config and an optional API key.
///
/// `api_key` is sourced from `PULMOSCAN_API_KEY` env (never TOML) and is
/// `None` for keyless local endpoints.
pub fn build(
    config: &ClassifierConfig,
    api_key: Option<String>,
) -> Result<ClassifierProvider, ClassifyError> {
    match config.provider.as_str() {
        "dummy" => Ok(ClassifierProvider::Dummy(dummy::DummyProvider::new())),
        "openai" | "openai-compatible" => {
            let p = openai_vision::OpenAiVisionProvider::new(config, api_key)?;
            Ok(ClassifierProvider::OpenAiVision(p))
        }
        other => Err(ClassifyError::UnknownProvider(other.to_string())),
    }
}
