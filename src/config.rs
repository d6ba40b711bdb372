//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `PULMOSCAN_WORK_DIR` and `PULMOSCAN_LOG_LEVEL` env
//! overrides. The classifier API key comes only from `PULMOSCAN_API_KEY` —
//! never TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::ledger::ModelRates;

/// Variance sampler settings (`[sampler]`).
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Target number of slices to retain (K).
    pub target_count: usize,
    /// Fraction of K taken from the top of the variance ranking; the rest
    /// is uniformly spaced for regional coverage.
    pub high_variance_fraction: f64,
    /// Decode batch size — caps peak decoded-image memory.
    pub decode_batch: usize,
    /// Inclusive luminance band treated as lung-window content.
    pub lung_window_low: u8,
    pub lung_window_high: u8,
    /// Minimum in-band pixel fraction for a slice to score at all.
    pub min_lung_fraction: f64,
    /// Series at or below this size skip sampling entirely.
    pub min_series: usize,
}

/// Escalation gate settings (`[escalation]`).
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Tier-1 results below this confidence are re-confirmed at tier 2.
    pub confidence_threshold: u8,
    /// Bound on concurrent tier-2 calls.
    pub concurrency: usize,
}

/// Advisory budget ceiling (`[budget]`).
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub cost_limit_usd: f64,
}

/// Per-tier model selection and billing rates.
#[derive(Debug, Clone)]
pub struct TierModelConfig {
    pub model: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
    pub cached_input_per_million_usd: f64,
}

impl TierModelConfig {
    pub fn rates(&self) -> ModelRates {
        ModelRates {
            input_per_million_usd: self.input_per_million_usd,
            output_per_million_usd: self.output_per_million_usd,
            cached_input_per_million_usd: self.cached_input_per_million_usd,
        }
    }
}

/// Classifier provider configuration (`[classifier]`).
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Which provider is active (e.g. `"dummy"`, `"openai"`). Maps to
    /// `default` in `[classifier]` TOML.
    pub provider: String,
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub screen: TierModelConfig,
    pub escalate: TierModelConfig,
}

/// Reconciliation policy knobs (`[reconcile]`).
#[derive(Debug, Clone, Default)]
pub struct ReconcileConfig {
    /// `(suppressor, suppressed)` channel-label pairs. Empty by default —
    /// channels are evaluated independently.
    pub suppression_pairs: Vec<(String, String)>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub instance_name: String,
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub sampler: SamplerConfig,
    pub escalation: EscalationConfig,
    pub budget: BudgetConfig,
    pub classifier: ClassifierConfig,
    pub reconcile: ReconcileConfig,
    /// API key from `PULMOSCAN_API_KEY` env var — `None` for keyless local
    /// endpoints. Never sourced from TOML.
    pub api_key: Option<String>,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    pipeline: RawPipeline,
    #[serde(default)]
    sampler: RawSampler,
    #[serde(default)]
    escalation: RawEscalation,
    #[serde(default)]
    budget: RawBudget,
    #[serde(default)]
    classifier: RawClassifier,
    #[serde(default)]
    reconcile: RawReconcile,
}

#[derive(Deserialize)]
struct RawPipeline {
    instance_name: String,
    work_dir: String,
    log_level: String,
}

#[derive(Deserialize)]
struct RawSampler {
    #[serde(default = "default_target_count")]
    target_count: usize,
    #[serde(default = "default_high_variance_fraction")]
    high_variance_fraction: f64,
    #[serde(default = "default_decode_batch")]
    decode_batch: usize,
    #[serde(default = "default_lung_window_low")]
    lung_window_low: u8,
    #[serde(default = "default_lung_window_high")]
    lung_window_high: u8,
    #[serde(default = "default_min_lung_fraction")]
    min_lung_fraction: f64,
    #[serde(default = "default_min_series")]
    min_series: usize,
}

impl Default for RawSampler {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            high_variance_fraction: default_high_variance_fraction(),
            decode_batch: default_decode_batch(),
            lung_window_low: default_lung_window_low(),
            lung_window_high: default_lung_window_high(),
            min_lung_fraction: default_min_lung_fraction(),
            min_series: default_min_series(),
        }
    }
}

fn default_target_count() -> usize { 200 }
fn default_high_variance_fraction() -> f64 { 0.75 }
fn default_decode_batch() -> usize { 5 }
fn default_lung_window_low() -> u8 { 10 }
fn default_lung_window_high() -> u8 { 200 }
fn default_min_lung_fraction() -> f64 { 0.1 }
fn default_min_series() -> usize { 10 }

#[derive(Deserialize)]
struct RawEscalation {
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: u8,
    #[serde(default = "default_escalation_concurrency")]
    concurrency: usize,
}

impl Default for RawEscalation {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            concurrency: default_escalation_concurrency(),
        }
    }
}

fn default_confidence_threshold() -> u8 { 80 }
fn default_escalation_concurrency() -> usize { 8 }

#[derive(Deserialize)]
struct RawBudget {
    #[serde(default = "default_cost_limit_usd")]
    cost_limit_usd: f64,
}

impl Default for RawBudget {
    fn default() -> Self {
        Self { cost_limit_usd: default_cost_limit_usd() }
    }
}

fn default_cost_limit_usd() -> f64 { 2.5 }

#[derive(Deserialize)]
struct RawClassifier {
    /// Maps to `default = "..."` in `[classifier]`.
    #[serde(rename = "default", default = "default_provider")]
    provider: String,
    #[serde(default = "default_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_screen_tier")]
    screen: RawTierModel,
    #[serde(default = "default_escalate_tier")]
    escalate: RawTierModel,
}

impl Default for RawClassifier {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base_url: default_api_base_url(),
            screen: default_screen_tier(),
            escalate: default_escalate_tier(),
        }
    }
}

#[derive(Deserialize)]
struct RawTierModel {
    model: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    input_per_million_usd: f64,
    #[serde(default)]
    output_per_million_usd: f64,
    #[serde(default)]
    cached_input_per_million_usd: f64,
}

fn default_provider() -> String { "dummy".to_string() }
fn default_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_timeout_seconds() -> u64 { 120 }

fn default_screen_tier() -> RawTierModel {
    RawTierModel {
        model: "gpt-4o-mini".to_string(),
        timeout_seconds: 120,
        input_per_million_usd: 0.15,
        output_per_million_usd: 0.60,
        cached_input_per_million_usd: 0.075,
    }
}

fn default_escalate_tier() -> RawTierModel {
    RawTierModel {
        model: "gpt-4o".to_string(),
        timeout_seconds: 180,
        input_per_million_usd: 2.50,
        output_per_million_usd: 10.0,
        cached_input_per_million_usd: 1.25,
    }
}

#[derive(Deserialize, Default)]
struct RawReconcile {
    #[serde(default)]
    suppression_pairs: Vec<(String, String)>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let work_dir_override = env::var("PULMOSCAN_WORK_DIR").ok();
    let log_level_override = env::var("PULMOSCAN_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let p = parsed.pipeline;
    let work_dir_str = work_dir_override.unwrap_or(&p.work_dir).to_string();
    let work_dir = expand_home(&work_dir_str);
    let log_level = log_level_override.unwrap_or(&p.log_level).to_string();

    let s = parsed.sampler;
    if !(0.0..=1.0).contains(&s.high_variance_fraction) {
        return Err(AppError::Config(format!(
            "sampler.high_variance_fraction must be in [0, 1], got {}",
            s.high_variance_fraction
        )));
    }
    if s.target_count == 0 {
        return Err(AppError::Config("sampler.target_count must be positive".into()));
    }

    let tier = |t: RawTierModel| TierModelConfig {
        model: t.model,
        timeout_seconds: t.timeout_seconds,
        input_per_million_usd: t.input_per_million_usd,
        output_per_million_usd: t.output_per_million_usd,
        cached_input_per_million_usd: t.cached_input_per_million_usd,
    };

    Ok(Config {
        instance_name: p.instance_name,
        work_dir,
        log_level,
        sampler: SamplerConfig {
            target_count: s.target_count,
            high_variance_fraction: s.high_variance_fraction,
            decode_batch: s.decode_batch.max(1),
            lung_window_low: s.lung_window_low,
            lung_window_high: s.lung_window_high,
            min_lung_fraction: s.min_lung_fraction,
            min_series: s.min_series,
        },
        escalation: EscalationConfig {
            confidence_threshold: parsed.escalation.confidence_threshold.min(100),
            concurrency: parsed.escalation.concurrency.max(1),
        },
        budget: BudgetConfig { cost_limit_usd: parsed.budget.cost_limit_usd },
        classifier: ClassifierConfig {
            provider: parsed.classifier.provider,
            api_base_url: parsed.classifier.api_base_url,
            screen: tier(parsed.classifier.screen),
            escalate: tier(parsed.classifier.escalate),
        },
        reconcile: ReconcileConfig { suppression_pairs: parsed.reconcile.suppression_pairs },
        api_key: env::var("PULMOSCAN_API_KEY").ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy classifier, no API keys, no
/// external calls.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            instance_name: "test".into(),
            work_dir: PathBuf::from("/tmp/pulmoscan-test"),
            log_level: "info".into(),
            sampler: SamplerConfig {
                target_count: 20,
                high_variance_fraction: 0.75,
                decode_batch: 5,
                lung_window_low: 10,
                lung_window_high: 200,
                min_lung_fraction: 0.1,
                min_series: 10,
            },
            escalation: EscalationConfig { confidence_threshold: 80, concurrency: 8 },
            budget: BudgetConfig { cost_limit_usd: 1.0 },
            classifier: ClassifierConfig::test_default(),
            reconcile: ReconcileConfig::default(),
            api_key: None,
        }
    }
}

#[cfg(test)]
impl ClassifierConfig {
    pub fn test_default() -> Self {
        let tier = |model: &str| TierModelConfig {
            model: model.into(),
            timeout_seconds: 1,
            input_per_million_usd: 1.0,
            output_per_million_usd: 2.0,
            cached_input_per_million_usd: 0.1,
        };
        Self {
            provider: "dummy".into(),
            api_base_url: "http://localhost:0/v1/chat/completions".into(),
            screen: tier("test-screen"),
            escalate: tier("test-escalate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[pipeline]
instance_name = "test-pipeline"
work_dir = "~/.pulmoscan"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.instance_name, "test-pipeline");
        assert_eq!(cfg.sampler.target_count, 200);
        assert_eq!(cfg.escalation.confidence_threshold, 80);
        assert_eq!(cfg.classifier.provider, "dummy");
        assert!(cfg.reconcile.suppression_pairs.is_empty());
    }

    #[test]
    fn explicit_sections_override_defaults() {
        let toml = format!(
            "{MINIMAL_TOML}\n\
             [sampler]\ntarget_count = 50\nhigh_variance_fraction = 0.6\n\n\
             [escalation]\nconfidence_threshold = 70\n\n\
             [reconcile]\nsuppression_pairs = [[\"pleural_effusion\", \"atelectasis\"]]\n"
        );
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.sampler.target_count, 50);
        assert_eq!(cfg.sampler.high_variance_fraction, 0.6);
        assert_eq!(cfg.escalation.confidence_threshold, 70);
        assert_eq!(cfg.reconcile.suppression_pairs.len(), 1);
    }

    #[test]
    fn invalid_fraction_rejected() {
        let toml = format!("{MINIMAL_TOML}\n[sampler]\nhigh_variance_fraction = 1.5\n");
        let f = write_toml(&toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn zero_target_count_rejected() {
        let toml = format!("{MINIMAL_TOML}\n[sampler]\ntarget_count = 0\n");
        let f = write_toml(&toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.pulmoscan");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".pulmoscan"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    #[test]
    fn env_style_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/override"));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn tier_rates_resolve() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        let rates = cfg.classifier.screen.rates();
        assert!(rates.input_per_million_usd > 0.0);
        assert!(cfg.classifier.escalate.rates().input_per_million_usd > rates.input_per_million_usd);
    }
}
