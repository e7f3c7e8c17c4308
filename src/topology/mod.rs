//! Cell topology.

pub mod cell_type;
