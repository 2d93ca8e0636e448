use crate::error::VaultError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultThresholds {
    /// Extraction reuses an existing record at or above this score.
    pub extract_match: f64,
    /// Dedup merges a pair at or above this score.
    pub dedup_exact: f64,
    /// Dedup reports a pair in `[report_floor, dedup_exact)`.
    pub report_floor: f64,
}

impl Default for VaultThresholds {
    fn default() -> Self {
        Self {
            extract_match: 0.80,
            dedup_exact: 1.00,
            report_floor: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultCorpusConfig {
    pub extensions: Vec<String>,
    pub ignore_dirs: Vec<String>,
    pub context_lines: usize,
}

impl Default for VaultCorpusConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            ignore_dirs: Vec::new(),
            context_lines: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    pub thresholds: VaultThresholds,
    pub corpus: VaultCorpusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialVaultConfig {
    thresholds: Option<VaultThresholds>,
    corpus: Option<VaultCorpusConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn in_unit_range(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

pub fn validate(cfg: &VaultConfig) -> Result<(), VaultError> {
    let t = &cfg.thresholds;
    if !in_unit_range(t.extract_match) {
        return Err(VaultError::InvalidConfig(
            "extract_match must satisfy 0 < value <= 1.0".to_string(),
        ));
    }
    if !in_unit_range(t.dedup_exact) {
        return Err(VaultError::InvalidConfig(
            "dedup_exact must satisfy 0 < value <= 1.0".to_string(),
        ));
    }
    if !in_unit_range(t.report_floor) {
        return Err(VaultError::InvalidConfig(
            "report_floor must satisfy 0 < value <= 1.0".to_string(),
        ));
    }
    if t.report_floor > t.dedup_exact {
        return Err(VaultError::InvalidConfig(
            "require report_floor <= dedup_exact".to_string(),
        ));
    }
    if cfg.corpus.extensions.iter().all(|e| e.trim().is_empty()) {
        return Err(VaultError::InvalidConfig(
            "corpus.extensions cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn resolve_config_path(corpus_root: &Path) -> Option<PathBuf> {
    if let Ok(custom) = env::var("SNIPVAULT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let local = corpus_root.join(".snipvault.toml");
    if local.exists() {
        return Some(local);
    }

    let config_dir = dirs::config_dir()?;
    Some(config_dir.join("snipvault").join("snipvault.toml"))
}

fn merge_file_config(base: &mut VaultConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialVaultConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse snipvault config {}: {err}", path.display()))?;
    if let Some(thresholds) = parsed.thresholds {
        base.thresholds = thresholds;
    }
    if let Some(corpus) = parsed.corpus {
        base.corpus = corpus;
    }
    Ok(())
}

pub fn load_config(corpus_root: &Path) -> Result<VaultConfig> {
    let mut cfg = VaultConfig::default();
    if let Some(path) = resolve_config_path(corpus_root) {
        merge_file_config(&mut cfg, &path)?;
    }

    cfg.thresholds.extract_match = env_or_f64(
        "SNIPVAULT_THRESHOLD_EXTRACT_MATCH",
        cfg.thresholds.extract_match,
    );
    cfg.thresholds.dedup_exact =
        env_or_f64("SNIPVAULT_THRESHOLD_DEDUP_EXACT", cfg.thresholds.dedup_exact);
    cfg.thresholds.report_floor = env_or_f64(
        "SNIPVAULT_THRESHOLD_REPORT_FLOOR",
        cfg.thresholds.report_floor,
    );
    cfg.corpus.ignore_dirs = env_or_csv("SNIPVAULT_IGNORE_DIRS", &cfg.corpus.ignore_dirs);

    validate(&cfg)?;
    Ok(cfg)
}
