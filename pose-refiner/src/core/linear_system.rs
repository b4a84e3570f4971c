//! Weighted normal equations for one linearization.
//!
//! Given the fixed template Jacobian `J` (N × P), residuals `r`, weights `w` and
//! the validity mask, accumulates
//!
//! ```text
//! H = Σ wᵢ Jᵢᵀ Jᵢ      G = Σ wᵢ Jᵢᵀ rᵢ      cost = Σ wᵢ rᵢ²
//! ```
//!
//! over valid rows. Rows are split into fixed-size chunks processed in parallel;
//! the per-chunk partial sums are merged in chunk order, so the result does not
//! depend on the number of worker threads.

use faer::Mat;
use rayon::prelude::*;

/// Rows per parallel work item.
const CHUNK_SIZE: usize = 1024;

/// Scalar outputs of [`LinearSystemBuilder::run`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinearSystemSummary {
    /// Weighted squared residual sum `Σ wᵢ rᵢ²`.
    pub cost: f64,
    /// Rows whose validity flag is set.
    pub num_valid: usize,
    /// Valid rows with a strictly positive weight.
    pub num_informative: usize,
}

/// Builds `H` and `G` from the template Jacobian.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSystemBuilder;

struct Partial {
    hessian: Vec<f64>,
    gradient: Vec<f64>,
    summary: LinearSystemSummary,
}

impl Partial {
    fn zeros(dof: usize) -> Self {
        Partial {
            hessian: vec![0.0; dof * dof],
            gradient: vec![0.0; dof],
            summary: LinearSystemSummary::default(),
        }
    }

    fn merge(&mut self, other: &Partial) {
        for (a, b) in self.hessian.iter_mut().zip(&other.hessian) {
            *a += b;
        }
        for (a, b) in self.gradient.iter_mut().zip(&other.gradient) {
            *a += b;
        }
        self.summary.cost += other.summary.cost;
        self.summary.num_valid += other.summary.num_valid;
        self.summary.num_informative += other.summary.num_informative;
    }
}

impl LinearSystemBuilder {
    pub fn new() -> Self {
        LinearSystemBuilder
    }

    /// Overwrite `hessian` (P × P) and `gradient` (P × 1) with the weighted normal
    /// equations and return the cost and row counts.
    ///
    /// With no valid rows both outputs are zero and the cost is zero.
    pub fn run(
        &self,
        jacobians: &Mat<f64>,
        residuals: &[f64],
        weights: &[f64],
        valid: &[bool],
        hessian: &mut Mat<f64>,
        gradient: &mut Mat<f64>,
    ) -> LinearSystemSummary {
        let n = residuals.len();
        let dof = jacobians.ncols();
        debug_assert_eq!(jacobians.nrows(), n);
        debug_assert_eq!(weights.len(), n);
        debug_assert_eq!(valid.len(), n);

        let partials: Vec<Partial> = (0..n.div_ceil(CHUNK_SIZE))
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * CHUNK_SIZE;
                let end = (start + CHUNK_SIZE).min(n);
                let mut partial = Partial::zeros(dof);
                for i in start..end {
                    if !valid[i] {
                        continue;
                    }
                    partial.summary.num_valid += 1;
                    let w = weights[i];
                    if w <= 0.0 {
                        continue;
                    }
                    partial.summary.num_informative += 1;

                    let r = residuals[i];
                    partial.summary.cost += w * r * r;
                    for a in 0..dof {
                        let wja = w * jacobians[(i, a)];
                        partial.gradient[a] += wja * r;
                        for b in a..dof {
                            partial.hessian[a * dof + b] += wja * jacobians[(i, b)];
                        }
                    }
                }
                partial
            })
            .collect();

        let mut total = Partial::zeros(dof);
        for partial in &partials {
            total.merge(partial);
        }

        if hessian.nrows() != dof || hessian.ncols() != dof {
            *hessian = Mat::zeros(dof, dof);
        }
        if gradient.nrows() != dof || gradient.ncols() != 1 {
            *gradient = Mat::zeros(dof, 1);
        }
        for a in 0..dof {
            gradient[(a, 0)] = total.gradient[a];
            for b in a..dof {
                let value = total.hessian[a * dof + b];
                hessian[(a, b)] = value;
                hessian[(b, a)] = value;
            }
        }

        total.summary
    }
}
