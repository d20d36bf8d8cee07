//! Local eigensolvers for agglomerate operators.
//!
//! A [`LocalEigensolver`] returns the `k` smallest eigenpairs of a dense
//! symmetric matrix. [`solve_with_retry`] wraps any solver with a bounded
//! retry: each retry relaxes the tolerance and asks for one vector fewer
//! (never fewer than one).

use log::warn;
use nalgebra::{DMatrix, SymmetricEigen};
use thiserror::Error;

use crate::amge::agglomerate::AgglomerateId;
use crate::amge_error::AmgeError;

/// Eigenpairs sorted by ascending eigenvalue. `eigenvectors[i]` belongs to
/// `eigenvalues[i]` and has one entry per row of the input matrix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Eigenpairs {
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Vec<Vec<f64>>,
}

impl Eigenpairs {
    pub fn len(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eigenvalues.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
#[error("no convergence for {requested} eigenpairs at tolerance {tolerance:e}")]
pub struct NonConvergence {
    pub requested: usize,
    pub tolerance: f64,
}

pub trait LocalEigensolver: Send + Sync {
    /// The `k` smallest eigenpairs of the symmetric `matrix`.
    fn solve(&self, matrix: &DMatrix<f64>, k: usize, tolerance: f64)
    -> Result<Eigenpairs, NonConvergence>;
}

/// Dense symmetric QR iteration (nalgebra).
#[derive(Clone, Copy, Debug)]
pub struct DenseEigensolver {
    /// Iteration cap handed to the QR sweep; `0` means unbounded.
    pub max_iterations: usize,
}

impl Default for DenseEigensolver {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
        }
    }
}

impl LocalEigensolver for DenseEigensolver {
    fn solve(
        &self,
        matrix: &DMatrix<f64>,
        k: usize,
        tolerance: f64,
    ) -> Result<Eigenpairs, NonConvergence> {
        let fail = NonConvergence {
            requested: k,
            tolerance,
        };
        let n = matrix.nrows();
        if n == 0 || n != matrix.ncols() || k == 0 {
            return Err(fail);
        }
        let eig = SymmetricEigen::try_new(matrix.clone(), tolerance, self.max_iterations)
            .ok_or(fail)?;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
        let mut pairs = Eigenpairs::default();
        for &i in order.iter().take(k.min(n)) {
            let mut v: Vec<f64> = eig.eigenvectors.column(i).iter().copied().collect();
            // sign convention: largest-magnitude entry is positive
            let pivot = v.iter().fold(0.0f64, |m, &x| if x.abs() > m.abs() { x } else { m });
            if pivot < 0.0 {
                v.iter_mut().for_each(|x| *x = -*x);
            }
            pairs.eigenvalues.push(eig.eigenvalues[i]);
            pairs.eigenvectors.push(v);
        }
        Ok(pairs)
    }
}

/// Bounded retry for non-converging solves.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EigenRetryPolicy {
    pub max_retries: usize,
    /// Tolerance multiplier per retry (> 1).
    pub relax_factor: f64,
}

impl Default for EigenRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            relax_factor: 100.0,
        }
    }
}

/// Why `pairs` cannot stand for at most `want` eigenpairs of an `n`-row
/// matrix, if anything.
fn rejection(pairs: &Eigenpairs, n: usize, want: usize) -> Option<String> {
    if pairs.is_empty() {
        return Some("solver returned no eigenpairs".into());
    }
    if pairs.len() > want {
        return Some(format!("solver returned {} eigenpairs, {want} requested", pairs.len()));
    }
    if pairs.eigenvectors.len() != pairs.len() {
        return Some(format!(
            "{} eigenvalues but {} eigenvectors",
            pairs.len(),
            pairs.eigenvectors.len()
        ));
    }
    if !pairs.eigenvalues.iter().all(|x| x.is_finite()) {
        return Some("non-finite eigenvalue".into());
    }
    for (i, v) in pairs.eigenvectors.iter().enumerate() {
        if v.len() != n {
            return Some(format!("eigenvector {i} has {} entries, expected {n}", v.len()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Some(format!("eigenvector {i} has non-finite entries"));
        }
    }
    None
}

/// Solve for `agglomerate`, retrying per `policy`. A result that is not a
/// usable set of eigenpairs counts as a failed attempt. Fails with
/// [`AmgeError::EigensolverNonConvergence`] carrying the first requested count
/// and tolerance.
pub fn solve_with_retry<S: LocalEigensolver + ?Sized>(
    solver: &S,
    agglomerate: AgglomerateId,
    matrix: &DMatrix<f64>,
    k: usize,
    tolerance: f64,
    policy: &EigenRetryPolicy,
) -> Result<Eigenpairs, AmgeError> {
    let n = matrix.nrows();
    let mut want = k.min(n).max(1);
    let mut tol = tolerance;
    for attempt in 0..=policy.max_retries {
        let outcome = match solver.solve(matrix, want, tol) {
            Ok(pairs) => match rejection(&pairs, n, want) {
                None => return Ok(pairs),
                Some(reason) => reason,
            },
            Err(e) => e.to_string(),
        };
        if attempt < policy.max_retries {
            tol *= policy.relax_factor;
            want = want.saturating_sub(1).max(1);
            warn!(
                "agglomerate {agglomerate}: {outcome}, retrying with {want} vectors at tolerance {tol:e}"
            );
        } else {
            warn!("agglomerate {agglomerate}: {outcome}, no retries left");
        }
    }
    Err(AmgeError::EigensolverNonConvergence {
        agglomerate,
        requested: k,
        tolerance,
    })
}
