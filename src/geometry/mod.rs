//! Geometry utilities for mesh-cmfe.
//!
//! Axis-aligned boxes, the bounding-box interval tree, and point-in-cell
//! tests with interpolation weights for linear cells.

pub mod bbox;
pub mod cell;
pub mod interval_tree;
