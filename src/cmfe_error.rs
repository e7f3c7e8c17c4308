//! CmfeError: unified error type for mesh-cmfe public APIs
//!
//! Every fallible operation in the crate returns this error. Variants fall into
//! three classes (see [`ErrorKind`]): configuration problems the caller can fix,
//! internal invariant violations, and communication failures between ranks.
//! A sample that lies outside every donor cell is *not* an error; it is resolved
//! through the default field at assembly time.

use thiserror::Error;

/// Coarse classification of a [`CmfeError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The requested fields or settings cannot be honoured.
    Configuration,
    /// An internal consistency violation (out-of-range index, missing field on a
    /// matched cell, point outside the partition).
    Invariant,
    /// A collective exchange failed or delivered a malformed buffer.
    Communication,
}

/// Unified error type for mesh-cmfe operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CmfeError {
    /// No rank owns any donor dataset.
    #[error("no donor data is available on any rank")]
    NoDonorData,
    /// The donor field is absent from every rank's donor geometry.
    #[error("donor variable `{0}` was not found on any donor dataset")]
    MissingVariable(String),
    /// The donor field resolved to zero components everywhere.
    #[error("donor variable `{0}` has no components")]
    DegenerateVariable(String),
    /// A target dataset has unmatched samples but no fallback field.
    #[error("target dataset {dataset} has no default variable `{name}`")]
    MissingDefaultVariable { name: String, dataset: usize },
    /// Two fields that must agree on component count do not.
    #[error("component mismatch for `{name}`: expected {expected}, found {found}")]
    ComponentMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Donor datasets disagree on whether the field is node- or cell-centered.
    #[error("donor variable `{0}` is node-centered on some donors and cell-centered on others")]
    CenteringMismatch(String),
    /// A partition setting is out of its valid range.
    #[error("invalid partition configuration: {0}")]
    InvalidConfig(String),
    /// A mesh or field was constructed with inconsistent sizes.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A sample index outside `[0, total)`.
    #[error("sample index {index} out of range (total {total})")]
    SampleOutOfRange { index: usize, total: usize },
    /// A dataset index outside the registered datasets.
    #[error("dataset index {index} out of range ({count} datasets)")]
    DatasetOutOfRange { index: usize, count: usize },
    /// A component slice of the wrong width was handed to a value accessor.
    #[error("value width {found} does not match component count {expected}")]
    ValueWidth { expected: usize, found: usize },
    /// A cell matched a query but carries no field of the requested name.
    #[error("matched cell {cell} of donor mesh {mesh} has no field `{name}`")]
    MissingCellField {
        name: String,
        mesh: usize,
        cell: usize,
    },
    /// A point lies outside every partition region.
    #[error("point {0:?} is not owned by any partition region")]
    PointOutsidePartition([f64; 3]),
    /// An operation that requires `finalize()` ran before it.
    #[error("{0} used before finalize()")]
    NotFinalized(&'static str),
    /// Relocate/unrelocate called out of order.
    #[error("invalid relocation state: {0}")]
    RelocationState(&'static str),

    /// A peer message was missing or of unexpected size.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// A received buffer failed to decode.
    #[error("wire decode error: {0}")]
    WireDecode(String),
    /// The MPI runtime could not be initialized.
    #[error("MPI initialization failed")]
    MpiInit,
}

impl CmfeError {
    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CmfeError::NoDonorData
            | CmfeError::MissingVariable(_)
            | CmfeError::DegenerateVariable(_)
            | CmfeError::MissingDefaultVariable { .. }
            | CmfeError::ComponentMismatch { .. }
            | CmfeError::CenteringMismatch(_)
            | CmfeError::InvalidConfig(_)
            | CmfeError::InvalidGeometry(_) => ErrorKind::Configuration,
            CmfeError::SampleOutOfRange { .. }
            | CmfeError::DatasetOutOfRange { .. }
            | CmfeError::ValueWidth { .. }
            | CmfeError::MissingCellField { .. }
            | CmfeError::PointOutsidePartition(_)
            | CmfeError::NotFinalized(_)
            | CmfeError::RelocationState(_) => ErrorKind::Invariant,
            CmfeError::CommError { .. } | CmfeError::WireDecode(_) | CmfeError::MpiInit => {
                ErrorKind::Communication
            }
        }
    }
}
