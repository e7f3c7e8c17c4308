//! Meshes, fields, and the two per-rank containers the evaluation runs on.

pub mod donor_index;
pub mod field;
pub mod mesh;
pub mod recenter;
pub mod sample_set;
