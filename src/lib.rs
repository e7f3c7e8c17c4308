#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-cmfe
//!
//! mesh-cmfe evaluates a field defined on one mesh (the donor) at the sample
//! locations of another, unrelated mesh (the target). The two meshes may
//! differ in connectivity, resolution and distribution over ranks; sample
//! locations are matched purely by position.
//!
//! ## Features
//! - Compact sample storage: rectilinear targets are kept as three axes, never
//!   as `nx * ny * nz` points
//! - Bounding-box interval tree over donor cells with exact point-in-cell
//!   tests and shape-function interpolation for linear cells
//! - Recursive-bisection domain decomposition agreed by global reductions
//! - Point, sub-grid and cell redistribution over a variable-size all-to-all
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-cmfe = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```
//!
//! A single-rank run needs only [`NoComm`](algs::communicator::NoComm):
//!
//! ```
//! use mesh_cmfe::prelude::*;
//! use std::sync::Arc;
//!
//! let donor = RectilinearMesh::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 1.0])?;
//! let donor = Mesh::from(donor).with_field(Field::scalar("p", Centering::Node, vec![5.0; 8]))?;
//! let target = Mesh::from(UnstructuredMesh::new(vec![[0.5; 3], [2.0; 3]]))
//!     .with_field(Field::scalar("p0", Centering::Node, vec![0.0, 9.0]))?;
//!
//! let cfg = CmfeConfig::new("p", "p0", "p_mapped");
//! let out = perform_cmfe(&NoComm, &[Arc::new(donor)], &[target], &cfg)?;
//! assert_eq!(out[0].values(), &[5.0, 9.0]);
//! # Ok::<(), CmfeError>(())
//! ```
//!
//! ## Determinism
//!
//! Every rank applies the same split rule to the same reduced histograms, so
//! partitions are identical everywhere. Thread-backend reductions fold in
//! rank order; tests seed `SmallRng` explicitly.

pub mod algs;
pub mod cmfe_error;
pub mod data;
pub mod geometry;
pub mod partitioning;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::cmfe::{CmfeConfig, CmfeOutcome, perform_cmfe, perform_cmfe_with_stats};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ReduceOp, ThreadComm};
    pub use crate::cmfe_error::{CmfeError, ErrorKind};
    pub use crate::data::donor_index::DonorIndex;
    pub use crate::data::field::{Centering, Field};
    pub use crate::data::mesh::{Mesh, RectilinearMesh, UnstructuredMesh};
    pub use crate::data::sample_set::SampleSet;
    pub use crate::geometry::bbox::{Axis, BoundingBox};
    pub use crate::partitioning::{BoxOwner, PartitionConfig, SpatialPartition};
    pub use crate::topology::cell_type::CellType;
}
