//! Named attribute arrays carried by meshes.

use crate::cmfe_error::CmfeError;
use serde::{Deserialize, Serialize};

/// Whether a field lives on mesh nodes or mesh cells.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Centering {
    Node,
    Cell,
}

impl Centering {
    /// Stable code used in reductions and on the wire. Zero is reserved for
    /// "unknown".
    pub fn code(self) -> u64 {
        match self {
            Centering::Node => 1,
            Centering::Cell => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Centering> {
        match code {
            1 => Some(Centering::Node),
            2 => Some(Centering::Cell),
            _ => None,
        }
    }
}

/// A named, fixed-width tuple array.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: String,
    centering: Centering,
    n_comp: usize,
    values: Vec<f64>,
}

impl Field {
    /// Build a field, checking that `values` holds whole tuples.
    pub fn new(
        name: impl Into<String>,
        centering: Centering,
        n_comp: usize,
        values: Vec<f64>,
    ) -> Result<Self, CmfeError> {
        let name = name.into();
        if n_comp == 0 && !values.is_empty() {
            return Err(CmfeError::InvalidGeometry(format!(
                "field `{name}` has values but zero components"
            )));
        }
        if n_comp > 0 && values.len() % n_comp != 0 {
            return Err(CmfeError::InvalidGeometry(format!(
                "field `{name}` length {} is not a multiple of {n_comp}",
                values.len()
            )));
        }
        Ok(Self {
            name,
            centering,
            n_comp,
            values,
        })
    }

    /// Scalar field convenience constructor.
    pub fn scalar(name: impl Into<String>, centering: Centering, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            centering,
            n_comp: 1,
            values,
        }
    }

    /// Same value on every tuple.
    pub fn uniform(
        name: impl Into<String>,
        centering: Centering,
        n_tuples: usize,
        tuple: &[f64],
    ) -> Self {
        let mut values = Vec::with_capacity(n_tuples * tuple.len());
        for _ in 0..n_tuples {
            values.extend_from_slice(tuple);
        }
        Self {
            name: name.into(),
            centering,
            n_comp: tuple.len(),
            values,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn centering(&self) -> Centering {
        self.centering
    }

    #[inline]
    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    #[inline]
    pub fn n_tuples(&self) -> usize {
        if self.n_comp == 0 {
            0
        } else {
            self.values.len() / self.n_comp
        }
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Tuple `i`; panics on out-of-range like slice indexing.
    #[inline]
    pub fn tuple(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_comp..(i + 1) * self.n_comp]
    }
}
