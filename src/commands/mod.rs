pub mod dedup;
pub mod extract;
pub mod repair;
pub mod scan;
pub mod status;

use anyhow::Result;
use serde::Serialize;
use std::fmt::Display;

use crate::vault::config::{self, VaultConfig};
use crate::vault::paths::{PathOverrides, VaultPaths, resolve_paths};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// `key=value` detail line.
    pub fn field(&mut self, key: &str, value: impl Display) {
        self.details.push(format!("{key}={value}"));
    }

    /// 0 when clean, 2 when the command finished but recorded issues.
    pub fn exit_code(&self) -> i32 {
        if self.ok { 0 } else { 2 }
    }
}

/// Threshold flags; each one beats file and env configuration.
#[derive(Debug, Clone, Default)]
pub struct ThresholdOverrides {
    pub extract_match: Option<f64>,
    pub dedup_exact: Option<f64>,
    pub report_floor: Option<f64>,
}

/// Resolves paths and configuration for one command invocation.
pub fn prepare(
    overrides: &PathOverrides,
    thresholds: &ThresholdOverrides,
) -> Result<(VaultPaths, VaultConfig)> {
    let paths = resolve_paths(overrides)?;
    let mut cfg = config::load_config(&paths.corpus_root)?;
    if let Some(value) = thresholds.extract_match {
        cfg.thresholds.extract_match = value;
    }
    if let Some(value) = thresholds.dedup_exact {
        cfg.thresholds.dedup_exact = value;
    }
    if let Some(value) = thresholds.report_floor {
        cfg.thresholds.report_floor = value;
    }
    config::validate(&cfg)?;
    Ok((paths, cfg))
}
