//! Re-export public algorithms.

pub mod cmfe;
pub mod communicator;
pub mod exchange;
pub mod wire;

pub use cmfe::{CmfeConfig, CmfeOutcome, perform_cmfe, perform_cmfe_with_stats};
pub use exchange::all_to_all_v;
