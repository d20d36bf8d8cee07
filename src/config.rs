//! Restrictor configuration.
//!
//! [`AmgeConfig`] deserializes with serde (every field optional, falling
//! back to [`Default`]) or is built from flat `"section: name"` pairs:
//!
//! ```text
//! agglomeration: nx                    = 2
//! agglomeration: ny                    = 3
//! eigensolver: number of eigenvectors  = 1
//! eigensolver: tolerance               = 1e-14
//! ```

use serde::{Deserialize, Serialize};

use crate::amge::agglomerate::AgglomerateDim;
use crate::amge::eigensolver::EigenRetryPolicy;
use crate::amge_error::AmgeError;
use crate::discretization::evaluator::EvaluatorKind;

/// Local eigensolver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigensolverConfig {
    /// Eigenvectors requested per agglomerate.
    pub n_eigenvectors: usize,
    pub tolerance: f64,
    /// QR iteration cap; `0` means unbounded.
    pub max_iterations: usize,
    pub max_retries: usize,
    pub relax_factor: f64,
}

impl Default for EigensolverConfig {
    fn default() -> Self {
        let retry = EigenRetryPolicy::default();
        Self {
            n_eigenvectors: 1,
            tolerance: 1e-14,
            max_iterations: 1000,
            max_retries: retry.max_retries,
            relax_factor: retry.relax_factor,
        }
    }
}

impl EigensolverConfig {
    pub fn retry_policy(&self) -> EigenRetryPolicy {
        EigenRetryPolicy {
            max_retries: self.max_retries,
            relax_factor: self.relax_factor,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgeConfig {
    pub agglomeration: AgglomerateDim,
    pub eigensolver: EigensolverConfig,
    pub evaluator: EvaluatorKind,
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AmgeError> {
    raw.trim()
        .parse()
        .map_err(|_| AmgeError::InvalidConfig(format!("cannot parse '{raw}' for '{key}'")))
}

impl AmgeConfig {
    /// Build from `(key, value)` pairs; keys not given keep their default.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, AmgeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Assign one parameter by its flat key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), AmgeError> {
        let normalized: String = key.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "agglomeration: nx" => self.agglomeration.nx = parse_value(key, value)?,
            "agglomeration: ny" => self.agglomeration.ny = parse_value(key, value)?,
            "agglomeration: nz" => self.agglomeration.nz = parse_value(key, value)?,
            "eigensolver: number of eigenvectors" => {
                self.eigensolver.n_eigenvectors = parse_value(key, value)?
            }
            "eigensolver: tolerance" => self.eigensolver.tolerance = parse_value(key, value)?,
            "eigensolver: max iterations" => {
                self.eigensolver.max_iterations = parse_value(key, value)?
            }
            "eigensolver: max retries" => self.eigensolver.max_retries = parse_value(key, value)?,
            "eigensolver: relax factor" => {
                self.eigensolver.relax_factor = parse_value(key, value)?
            }
            "evaluator" => {
                self.evaluator = match value.trim().to_lowercase().as_str() {
                    "laplace" => EvaluatorKind::Laplace,
                    "mass" => EvaluatorKind::Mass,
                    other => {
                        return Err(AmgeError::InvalidConfig(format!(
                            "unknown evaluator '{other}'"
                        )));
                    }
                }
            }
            _ => {
                return Err(AmgeError::InvalidConfig(format!(
                    "unknown parameter '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Reject values the restrictor cannot work with.
    pub fn validate(&self) -> Result<(), AmgeError> {
        let a = &self.agglomeration;
        if a.nx == 0 || a.ny == 0 || a.nz == 0 {
            return Err(AmgeError::InvalidConfig(
                "agglomerate extents must be positive".into(),
            ));
        }
        let e = &self.eigensolver;
        validate_eigen_request(e.n_eigenvectors, e.tolerance, &e.retry_policy())
    }
}

/// Checks shared by [`AmgeConfig::validate`] and the restrictor entry points.
pub fn validate_eigen_request(
    n_eigenvectors: usize,
    tolerance: f64,
    retry: &EigenRetryPolicy,
) -> Result<(), AmgeError> {
    if n_eigenvectors == 0 {
        return Err(AmgeError::InvalidConfig(
            "number of eigenvectors must be positive".into(),
        ));
    }
    if !(tolerance > 0.0 && tolerance.is_finite()) {
        return Err(AmgeError::InvalidConfig(format!(
            "eigensolver tolerance must be positive (got {tolerance})"
        )));
    }
    if !(retry.relax_factor >= 1.0 && retry.relax_factor.is_finite()) {
        return Err(AmgeError::InvalidConfig(format!(
            "relax factor must be at least 1 (got {})",
            retry.relax_factor
        )));
    }
    Ok(())
}
