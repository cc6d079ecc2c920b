//! Build variant identity.
//!
//! A variant is one simulator build for a fixed set of component choices.
//! Its identity is the build-cache key, the executable name, and part of
//! every run directory name, so it must be stable across formatting noise.

use crate::error::{Result, RunnerError};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;

const DEFAULT_PREFETCHER: &str = "no";
const DEFAULT_BRANCH_PREDICTOR: &str = "bimodal";

/// Largest `num_cores` accepted from a configuration.
pub const MAX_CORES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantConfig {
    pub branch_predictor: String,
    pub l1i_prefetcher: String,
    pub l1d_prefetcher: String,
    pub l2c_prefetcher: String,
    pub llc_prefetcher: String,
    pub llc_replacement: String,
    pub num_cores: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantIdentity(String);

impl VariantIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl VariantConfig {
    pub fn from_file(path: &Path) -> Result<(Self, Value)> {
        let bytes = fs::read(path).map_err(|e| {
            RunnerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            RunnerError::Config(format!("{} is not valid JSON: {}", path.display(), e))
        })?;
        let config = Self::from_json(&value)?;
        Ok((config, value))
    }

    /// Reads the component choices out of a simulator configuration
    /// document. Every missing required field is reported at once.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut missing = Vec::new();
        let mut required = |pointer: &str| -> String {
            match value.pointer(pointer).and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => {
                    missing.push(pointer.to_string());
                    String::new()
                }
            }
        };
        let l1d_prefetcher = required("/L1D/prefetcher");
        let l2c_prefetcher = required("/L2C/prefetcher");
        let llc_replacement = required("/LLC/replacement");

        let num_cores = match value.pointer("/num_cores") {
            Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
            _ => None,
        };
        if num_cores.is_none() {
            missing.push("/num_cores".to_string());
        }
        if !missing.is_empty() {
            return Err(RunnerError::Config(format!(
                "missing or ill-typed fields: {}",
                missing.join(", ")
            )));
        }
        let num_cores = num_cores.unwrap_or_default();
        if num_cores == 0 {
            return Err(RunnerError::Config("/num_cores must be >= 1".to_string()));
        }
        if num_cores > MAX_CORES {
            return Err(RunnerError::Config(format!(
                "/num_cores must be <= {}, got {}",
                MAX_CORES, num_cores
            )));
        }

        let optional = |pointer: &str, default: &str| -> String {
            value
                .pointer(pointer)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };
        let branch_predictor = value
            .pointer("/ooo_cpu/0/branch_predictor")
            .or_else(|| value.pointer("/branch_predictor"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BRANCH_PREDICTOR)
            .to_string();

        Ok(Self {
            branch_predictor: normalize_component("branch_predictor", &branch_predictor)?,
            l1i_prefetcher: normalize_component(
                "/L1I/prefetcher",
                &optional("/L1I/prefetcher", DEFAULT_PREFETCHER),
            )?,
            l1d_prefetcher: normalize_component("/L1D/prefetcher", &l1d_prefetcher)?,
            l2c_prefetcher: normalize_component("/L2C/prefetcher", &l2c_prefetcher)?,
            llc_prefetcher: normalize_component(
                "/LLC/prefetcher",
                &optional("/LLC/prefetcher", DEFAULT_PREFETCHER),
            )?,
            llc_replacement: normalize_component("/LLC/replacement", &llc_replacement)?,
            num_cores,
        })
    }

    /// Canonical encoding: component choices in a fixed order, then the
    /// core count. Pure; equal configs always yield equal identities.
    pub fn resolve(&self) -> VariantIdentity {
        VariantIdentity(format!(
            "{}-{}-{}-{}-{}-{}-{}c",
            self.branch_predictor,
            self.l1i_prefetcher,
            self.l1d_prefetcher,
            self.l2c_prefetcher,
            self.llc_prefetcher,
            self.llc_replacement,
            self.num_cores
        ))
    }

    /// The prefetcher a human would name this variant after: L1D unless it
    /// is disabled, then L2C.
    pub fn headline_prefetcher(&self) -> &str {
        if self.l1d_prefetcher != DEFAULT_PREFETCHER {
            &self.l1d_prefetcher
        } else {
            &self.l2c_prefetcher
        }
    }
}

/// Returns a copy of the configuration whose build lands at the variant's
/// executable name.
pub fn config_for_build(raw: &Value, identity: &VariantIdentity) -> Result<Value> {
    let mut out = raw.clone();
    let obj = out.as_object_mut().ok_or_else(|| {
        RunnerError::Config("simulator configuration must be a JSON object".to_string())
    })?;
    obj.insert(
        "executable_name".to_string(),
        Value::String(identity.as_str().to_string()),
    );
    Ok(out)
}

fn normalize_component(field: &str, raw: &str) -> Result<String> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return Err(RunnerError::Config(format!("{} must not be empty", field)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(RunnerError::Config(format!(
            "{} has unsupported characters: {:?}",
            field, raw
        )));
    }
    Ok(value)
}
