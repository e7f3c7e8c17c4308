//! Position-based cross-mesh field evaluation.
//!
//! [`perform_cmfe`] samples a donor field at every target location and
//! returns one new field per target dataset. The run is a fixed sequence of
//! stages, each a collective step when more than one rank takes part:
//!
//! 1. unify metadata: centering and width of the donor field, agreed by
//!    max- and min-reductions so ranks without donor data still learn them
//!    and a disagreement fails on every rank;
//! 2. build the local [`SampleSet`] and [`DonorIndex`];
//! 3. build the [`SpatialPartition`] (distributed only);
//! 4. relocate samples and donor cells to their region owners (distributed
//!    only);
//! 5. evaluate every local sample, marking misses with [`NOT_FOUND`];
//! 6. ship values back to the submitting ranks (distributed only);
//! 7. assemble output fields, filling misses from the default field.
//!
//! [`NOT_FOUND`]: crate::data::sample_set::NOT_FOUND

use crate::algs::communicator::{Communicator, ReduceOp};
use crate::cmfe_error::CmfeError;
use crate::data::donor_index::DonorIndex;
use crate::data::field::{Centering, Field};
use crate::data::mesh::Mesh;
use crate::data::recenter::recenter;
use crate::data::sample_set::{SampleSet, is_not_found};
use crate::partitioning::{PartitionConfig, SpatialPartition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field names that drive an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmfeConfig {
    /// Donor field to sample.
    pub invar: String,
    /// Field on each target dataset used where no donor cell matches.
    pub default_var: String,
    /// Name given to the produced fields.
    pub outvar: String,
    #[serde(default)]
    pub partition: PartitionConfig,
}

impl CmfeConfig {
    pub fn new(
        invar: impl Into<String>,
        default_var: impl Into<String>,
        outvar: impl Into<String>,
    ) -> Self {
        Self {
            invar: invar.into(),
            default_var: default_var.into(),
            outvar: outvar.into(),
            partition: PartitionConfig::default(),
        }
    }

    pub fn with_partition(mut self, partition: PartitionConfig) -> Self {
        self.partition = partition;
        self
    }
}

/// Output fields plus per-rank match statistics over the local targets.
#[derive(Debug, Clone, PartialEq)]
pub struct CmfeOutcome {
    pub fields: Vec<Field>,
    pub matched: usize,
    pub unmatched: usize,
}

/// Donor field layout agreed by all ranks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct DonorLayout {
    centering: Centering,
    n_comp: usize,
}

/// Evaluate `config.invar` from `donors` on every dataset in `targets`.
///
/// Collective: every rank calls this with its own share of the meshes and
/// the same `config`. Returns one field per target, in order.
pub fn perform_cmfe<C: Communicator + ?Sized>(
    comm: &C,
    donors: &[Arc<Mesh>],
    targets: &[Mesh],
    config: &CmfeConfig,
) -> Result<Vec<Field>, CmfeError> {
    perform_cmfe_with_stats(comm, donors, targets, config).map(|o| o.fields)
}

/// [`perform_cmfe`] that also reports how many samples matched.
pub fn perform_cmfe_with_stats<C: Communicator + ?Sized>(
    comm: &C,
    donors: &[Arc<Mesh>],
    targets: &[Mesh],
    config: &CmfeConfig,
) -> Result<CmfeOutcome, CmfeError> {
    config.partition.validate()?;
    let layout = unify_metadata(comm, donors, &config.invar)?;
    let distributed = comm.size() > 1;

    // Donors without the field can never supply a value.
    let mut index = DonorIndex::new(config.invar.clone());
    for (m, mesh) in donors.iter().enumerate() {
        if mesh.field(&config.invar).is_some() {
            index.add_mesh(Arc::clone(mesh));
        } else {
            log::debug!(
                "[rank {}] donor {m} has no `{}`; skipped",
                comm.rank(),
                config.invar
            );
        }
    }
    index.finalize();
    let mut samples = SampleSet::new(layout.centering, layout.n_comp);
    for mesh in targets {
        samples.add_dataset(mesh);
    }
    samples.finalize();

    let partition = if distributed {
        let partition = SpatialPartition::build(comm, &config.partition, &[&samples, &index])?;
        samples.relocate(comm, &partition)?;
        index.relocate(comm, &partition)?;
        index.finalize();
        Some(partition)
    } else {
        None
    };

    evaluate(comm, &mut index, &mut samples)?;

    if let Some(partition) = &partition {
        samples.unrelocate(comm, partition)?;
    }

    assemble(&samples, targets, config, layout)
}

fn unify_metadata<C: Communicator + ?Sized>(
    comm: &C,
    donors: &[Arc<Mesh>],
    var: &str,
) -> Result<DonorLayout, CmfeError> {
    // [has donor data, has the field, centering code, component count]
    let mut hi = [0u64; 4];
    // [centering code, component count]; ranks without the field stay neutral.
    let mut lo = [u64::MAX; 2];
    hi[0] = u64::from(!donors.is_empty());
    for field in donors.iter().filter_map(|m| m.field(var)) {
        let (centering, n_comp) = (field.centering().code(), field.n_comp() as u64);
        hi[1] = 1;
        hi[2] = hi[2].max(centering);
        hi[3] = hi[3].max(n_comp);
        lo[0] = lo[0].min(centering);
        lo[1] = lo[1].min(n_comp);
    }
    comm.all_reduce_u64(&mut hi, ReduceOp::Max)?;
    comm.all_reduce_u64(&mut lo, ReduceOp::Min)?;

    // The reduced arrays are identical everywhere, so every rank takes the
    // same branch and none is left waiting in a later collective.
    if hi[0] == 0 {
        return Err(CmfeError::NoDonorData);
    }
    if hi[1] == 0 {
        return Err(CmfeError::MissingVariable(var.to_string()));
    }
    if hi[3] != lo[1] {
        return Err(CmfeError::ComponentMismatch {
            name: var.to_string(),
            expected: hi[3] as usize,
            found: lo[1] as usize,
        });
    }
    if hi[2] != lo[0] {
        return Err(CmfeError::CenteringMismatch(var.to_string()));
    }
    let centering = Centering::from_code(hi[2])
        .ok_or_else(|| CmfeError::DegenerateVariable(var.to_string()))?;
    if hi[3] == 0 {
        return Err(CmfeError::DegenerateVariable(var.to_string()));
    }
    let layout = DonorLayout {
        centering,
        n_comp: hi[3] as usize,
    };
    log::info!(
        "[rank {}] donor variable `{var}`: {:?}-centered, {} component(s)",
        comm.rank(),
        layout.centering,
        layout.n_comp
    );
    Ok(layout)
}

fn evaluate<C: Communicator + ?Sized>(
    comm: &C,
    index: &mut DonorIndex,
    samples: &mut SampleSet,
) -> Result<(), CmfeError> {
    let mut value = vec![0.0; samples.n_comp()];
    let mut misses = 0usize;
    for g in 0..samples.num_points() {
        let p = samples.point(g)?;
        if index.get_value(&p, &mut value)? {
            samples.set_value(g, &value)?;
        } else {
            samples.set_not_found(g)?;
            misses += 1;
        }
    }
    log::debug!(
        "[rank {}] evaluated {} sample(s), {misses} without a donor cell",
        comm.rank(),
        samples.num_points()
    );
    Ok(())
}

fn assemble(
    samples: &SampleSet,
    targets: &[Mesh],
    config: &CmfeConfig,
    layout: DonorLayout,
) -> Result<CmfeOutcome, CmfeError> {
    let nc = layout.n_comp;
    let mut fields = Vec::with_capacity(targets.len());
    let (mut matched, mut unmatched) = (0, 0);
    for (d, target) in targets.iter().enumerate() {
        let n = samples.dataset_len(d)?;
        let mut values = Vec::with_capacity(n * nc);
        let mut fallback: Option<Field> = None;
        for i in 0..n {
            let v = samples.value(d, i)?;
            if !is_not_found(v) {
                matched += 1;
                values.extend_from_slice(v);
                continue;
            }
            unmatched += 1;
            if fallback.is_none() {
                fallback = Some(default_field(target, d, config, layout)?);
            }
            if let Some(f) = &fallback {
                values.extend_from_slice(f.tuple(i));
            }
        }
        fields.push(Field::new(
            config.outvar.clone(),
            layout.centering,
            nc,
            values,
        )?);
    }
    Ok(CmfeOutcome {
        fields,
        matched,
        unmatched,
    })
}

/// The target's default field, recentered to the output centering.
fn default_field(
    target: &Mesh,
    dataset: usize,
    config: &CmfeConfig,
    layout: DonorLayout,
) -> Result<Field, CmfeError> {
    let raw = target
        .field(&config.default_var)
        .ok_or_else(|| CmfeError::MissingDefaultVariable {
            name: config.default_var.clone(),
            dataset,
        })?;
    if raw.n_comp() != layout.n_comp {
        return Err(CmfeError::ComponentMismatch {
            name: config.default_var.clone(),
            expected: layout.n_comp,
            found: raw.n_comp(),
        });
    }
    recenter(target, raw, layout.centering)
}
