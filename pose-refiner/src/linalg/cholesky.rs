use faer::{
    Mat, Side,
    linalg::solvers::{Llt, Solve},
};

use crate::linalg::{LinAlgError, LinAlgResult, NormalEquationSolver};

/// Dense LLT solver for small symmetric positive definite systems.
///
/// Only the lower triangle of the input is read. The last successful
/// factorization is kept so the covariance can be recovered after the solve.
#[derive(Default)]
pub struct DenseCholeskySolver {
    factorizer: Option<Llt<f64>>,
    dim: usize,
}

impl std::fmt::Debug for DenseCholeskySolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseCholeskySolver")
            .field("factorized", &self.factorizer.is_some())
            .field("dim", &self.dim)
            .finish()
    }
}

impl DenseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn factorize_and_solve(
        &mut self,
        matrix: &Mat<f64>,
        gradient: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>> {
        self.factorizer = None;

        let n = matrix.nrows();
        if matrix.ncols() != n || gradient.nrows() != n || gradient.ncols() != 1 {
            return Err(LinAlgError::DimensionMismatch(format!(
                "system is {}x{} with a {}x{} right-hand side",
                matrix.nrows(),
                matrix.ncols(),
                gradient.nrows(),
                gradient.ncols()
            )));
        }

        let llt = matrix.as_ref().llt(Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed(format!("Cholesky factorization failed: {e:?}"))
        })?;
        let solution = llt.solve(gradient);

        for i in 0..n {
            if !solution[(i, 0)].is_finite() {
                return Err(LinAlgError::NonFiniteSolution);
            }
        }

        self.factorizer = Some(llt);
        self.dim = n;
        Ok(solution)
    }
}

impl NormalEquationSolver for DenseCholeskySolver {
    fn solve_normal_equation(
        &mut self,
        hessian: &Mat<f64>,
        gradient: &Mat<f64>,
    ) -> LinAlgResult<Mat<f64>> {
        self.factorize_and_solve(hessian, gradient)
    }

    fn solve_augmented_equation(
        &mut self,
        hessian: &Mat<f64>,
        gradient: &Mat<f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>> {
        let mut augmented = hessian.clone();
        for i in 0..augmented.nrows().min(augmented.ncols()) {
            augmented[(i, i)] += lambda;
        }
        self.factorize_and_solve(&augmented, gradient)
    }

    fn compute_covariance_matrix(&self) -> Option<Mat<f64>> {
        let factorizer = self.factorizer.as_ref()?;
        let identity = Mat::<f64>::identity(self.dim, self.dim);
        Some(factorizer.solve(&identity))
    }
}
