mod util;
use util::*;

use mesh_cmfe::data::donor_index::DonorIndex;
use mesh_cmfe::data::sample_set::SampleSet;
use mesh_cmfe::partitioning::SpatialContent;
use mesh_cmfe::prelude::*;
use std::sync::Arc;

fn rank_targets(rank: usize) -> Vec<Mesh> {
    vec![
        cloud(rank as u64, 40 + 7 * rank, -0.5, 1.5, 0.0),
        target_grid(
            linspace(-0.3, 1.3, 6 + rank),
            linspace(0.0, 1.0, 4),
            linspace(0.2 * rank as f64, 1.0, 3),
            0.0,
        ),
        Mesh::from(UnstructuredMesh::new(Vec::new())),
    ]
}

fn sample_set(targets: &[Mesh]) -> SampleSet {
    let mut s = SampleSet::new(Centering::Node, 2);
    for t in targets {
        s.add_dataset(t);
    }
    s.finalize();
    s
}

fn tag(p: [f64; 3], rank: usize) -> [f64; 2] {
    [linear(p), rank as f64]
}

#[test]
fn samples_come_home_in_original_order() {
    for size in [2, 3, 4] {
        run_ranks(size, |comm| {
            let me = comm.rank();
            let targets = rank_targets(me);
            let mut s = sample_set(&targets);
            let before: Vec<[f64; 3]> = (0..s.num_points()).map(|g| s.point(g).unwrap()).collect();
            let lens: Vec<usize> = (0..s.num_datasets()).map(|d| s.dataset_len(d).unwrap()).collect();

            let part = SpatialPartition::build(
                &comm,
                &PartitionConfig::default(),
                &[&s as &dyn SpatialContent],
            )
            .unwrap();
            s.relocate(&comm, &part).unwrap();

            // Everything that arrived is ours, and is stamped by the evaluator.
            for g in 0..s.num_points() {
                let p = s.point(g).unwrap();
                assert_eq!(part.get_processor(&p).unwrap(), me);
                s.set_value(g, &tag(p, me)).unwrap();
            }
            s.unrelocate(&comm, &part).unwrap();

            assert!(!s.is_relocated());
            let after: Vec<[f64; 3]> = (0..s.num_points()).map(|g| s.point(g).unwrap()).collect();
            assert_eq!(before, after);
            for d in 0..s.num_datasets() {
                assert_eq!(s.dataset_len(d).unwrap(), lens[d]);
            }
            for (d, t) in targets.iter().enumerate() {
                for i in 0..s.dataset_len(d).unwrap() {
                    let p = t.point(i);
                    let owner = part.get_processor(&p).unwrap();
                    assert_eq!(s.value(d, i).unwrap(), &tag(p, owner));
                }
            }
        });
    }
}

#[test]
fn relocated_grids_ship_only_owned_sub_ranges() {
    run_ranks(3, |comm| {
        // One big grid on rank 0, nothing elsewhere.
        let targets = if comm.rank() == 0 {
            vec![target_grid(
                linspace(0.0, 1.0, 30),
                linspace(0.0, 1.0, 20),
                linspace(0.0, 1.0, 10),
                0.0,
            )]
        } else {
            Vec::new()
        };
        let mut s = sample_set(&targets);
        let part = SpatialPartition::build(
            &comm,
            &PartitionConfig::default(),
            &[&s as &dyn SpatialContent],
        )
        .unwrap();
        s.relocate(&comm, &part).unwrap();
        let here = s.num_points();
        let mut total = [here as u64];
        comm.all_reduce_u64(&mut total, ReduceOp::Sum).unwrap();
        assert_eq!(total[0], 6000);
        assert!(here > 0 && here < 6000);
    });
}

#[test]
fn donor_cells_reach_every_region_they_touch() {
    run_ranks(3, |comm| {
        let me = comm.rank();
        let mut idx = DonorIndex::new("p");
        idx.add_mesh(Arc::new(donor_slab(6, me, 3)));
        idx.finalize();
        let s = sample_set(&[cloud(50 + me as u64, 100, 0.0, 1.0, 0.0)]);
        let part = SpatialPartition::build(
            &comm,
            &PartitionConfig::default(),
            &[&s as &dyn SpatialContent, &idx],
        )
        .unwrap();

        idx.relocate(&comm, &part).unwrap();
        idx.finalize();

        let mine = part.regions().find(|(r, _)| *r == me).map(|(_, b)| *b).unwrap();
        let mut received = 0;
        for mesh in idx.meshes() {
            for c in 0..mesh.num_cells() {
                assert!(mine.owns_part_of(&mesh.cell_bounds(c)));
                received += 1;
            }
        }
        assert!(received > 0);

        // Every sample this rank owns can now be evaluated locally.
        let mut out = [0.0];
        for g in 0..s.num_points() {
            let p = s.point(g).unwrap();
            if part.get_processor(&p).unwrap() == me {
                assert!(idx.get_value(&p, &mut out).unwrap());
                assert!((out[0] - linear(p)).abs() < 1e-9);
            }
        }
    });
}
