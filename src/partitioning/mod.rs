//! Geometric domain decomposition.
//!
//! [`spatial::SpatialPartition`] cuts space into exactly one box per rank by
//! recursive bisection over globally summed histograms; [`region::Region`]
//! holds the per-box splitting state.

pub mod region;
pub mod spatial;

pub use self::spatial::SpatialPartition;

use crate::cmfe_error::CmfeError;
use crate::geometry::bbox::BoundingBox;
use crate::partitioning::region::Region;
use serde::{Deserialize, Serialize};

/// Tuning knobs for the bisection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Candidate pivots per classification round.
    pub num_pivots: usize,
    /// Accept a pivot whose cumulative share is this close to the target.
    pub tolerance: f64,
    /// Classification rounds per split before the best pivot is forced.
    pub max_attempts: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            num_pivots: 5,
            tolerance: 0.02,
            max_attempts: 3,
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<(), CmfeError> {
        if self.num_pivots == 0 {
            return Err(CmfeError::InvalidConfig("num_pivots must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(CmfeError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !(self.tolerance >= 0.0) {
            return Err(CmfeError::InvalidConfig(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Owner of an axis-aligned box.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoxOwner {
    /// Exactly one region overlaps the box.
    Rank(usize),
    /// The box straddles several regions.
    Ambiguous,
    /// No region overlaps the box.
    None,
}

/// Local geometry that takes part in building the partition.
pub trait SpatialContent {
    /// Grow `bounds` by everything this rank holds.
    fn extend_bounds(&self, bounds: &mut BoundingBox);

    /// Add this rank's contribution to the region's histogram.
    fn classify(&self, region: &mut Region);
}
