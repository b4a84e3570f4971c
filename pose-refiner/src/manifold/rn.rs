//! Rn - n-dimensional Euclidean Space
//!
//! Vector addition as the group operation; the tangent space is Rⁿ itself,
//! so `Exp` and `Log` are the identity. Useful for low-dimensional motion
//! models (pure translation, image-plane shifts) refined with the same loop
//! as full rigid-body poses.

use crate::manifold::{LieGroup, ManifoldResult, check_tangent};
use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Rⁿ group element.
#[derive(Clone, Debug, PartialEq)]
pub struct Rn {
    data: DVector<f64>,
}

impl Display for Rn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Rn(dim: {}, data: [", self.data.len())?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", val)?;
        }
        write!(f, "])")
    }
}

impl From<DVector<f64>> for Rn {
    fn from(data: DVector<f64>) -> Self {
        Rn::new(data)
    }
}

impl From<Rn> for DVector<f64> {
    fn from(rn: Rn) -> Self {
        rn.data
    }
}

impl Rn {
    pub fn new(data: DVector<f64>) -> Self {
        Rn { data }
    }

    /// The zero vector of dimension `dim`.
    pub fn zeros(dim: usize) -> Self {
        Rn {
            data: DVector::zeros(dim),
        }
    }

    pub fn from_slice(slice: &[f64]) -> Self {
        Rn::new(DVector::from_column_slice(slice))
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }
}

impl LieGroup for Rn {
    fn tangent_dim(&self) -> usize {
        self.data.len()
    }

    fn inverse(&self) -> Self {
        Rn::new(-&self.data)
    }

    fn compose(&self, other: &Self) -> Self {
        Rn::new(&self.data + &other.data)
    }

    fn log(&self) -> DVector<f64> {
        self.data.clone()
    }

    fn right_plus(&self, tangent: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(tangent, self.data.len())?;
        Ok(Rn::new(&self.data + tangent))
    }

    fn right_minus(&self, other: &Self) -> DVector<f64> {
        &self.data - &other.data
    }
}
