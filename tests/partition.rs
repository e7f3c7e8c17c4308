mod util;
use util::*;

use mesh_cmfe::data::sample_set::SampleSet;
use mesh_cmfe::partitioning::SpatialContent;
use mesh_cmfe::prelude::*;
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Rank-local samples: a seeded cloud, skewed towards the origin.
fn local_samples(rank: usize, n: usize) -> SampleSet {
    let mut rng = SmallRng::seed_from_u64(1000 + rank as u64);
    let pts: Vec<[f64; 3]> = (0..n)
        .map(|_| {
            let u: f64 = rng.r#gen();
            [u * u * 4.0, rng.gen_range(0.0..2.0), rng.gen_range(-1.0..1.0)]
        })
        .collect();
    let mut s = SampleSet::new(Centering::Node, 1);
    s.add_dataset(&UnstructuredMesh::new(pts).into());
    s.finalize();
    s
}

fn build(comm: &ThreadComm, s: &SampleSet) -> SpatialPartition {
    SpatialPartition::build(comm, &PartitionConfig::default(), &[s as &dyn SpatialContent])
        .unwrap()
}

fn volume(b: &BoundingBox) -> f64 {
    (0..3).map(|a| b.extent(a)).product()
}

#[test]
fn leaf_count_equals_rank_count() {
    for p in 1..=8 {
        let results = run_ranks(p, |comm| {
            let s = local_samples(comm.rank(), 200);
            let part = build(&comm, &s);
            part.regions().map(|(r, b)| (r, *b)).collect::<Vec<_>>()
        });
        for leaves in &results {
            assert_eq!(leaves.len(), p);
            assert_eq!(leaves, &results[0], "ranks disagree on the partition");
            let ranks: Vec<usize> = leaves.iter().map(|(r, _)| *r).collect();
            assert_eq!(ranks, (0..p).collect::<Vec<_>>());
        }
    }
}

#[test]
fn regions_tile_the_root_box() {
    let results = run_ranks(5, |comm| {
        let s = local_samples(comm.rank(), 300);
        let part = build(&comm, &s);

        let total: f64 = part.regions().map(|(_, b)| volume(b)).sum();
        let root = volume(part.bounds());
        assert!((total - root).abs() <= 1e-9 * root);

        let mut rng = SmallRng::seed_from_u64(7);
        let bounds = *part.bounds();
        for _ in 0..2000 {
            let p: [f64; 3] =
                std::array::from_fn(|a| rng.gen_range(bounds.min[a]..bounds.max[a]));
            let owners = part.regions().filter(|(_, b)| b.owns(&p)).count();
            assert_eq!(owners, 1, "point {p:?} has {owners} owners");
            let r = part.get_processor(&p).unwrap();
            assert!(part.regions().any(|(q, b)| q == r && b.owns(&p)));
        }
        part.num_regions()
    });
    assert_eq!(results, vec![5; 5]);
}

#[test]
fn every_sample_has_an_owner_and_load_is_roughly_balanced() {
    let p = 4;
    let counts = run_ranks(p, |comm| {
        let s = local_samples(comm.rank(), 500);
        let part = build(&comm, &s);
        let mut mine = vec![0u64; p];
        for g in 0..s.num_points() {
            let pt = s.point(g).unwrap();
            mine[part.get_processor(&pt).unwrap()] += 1;
        }
        comm.all_reduce_u64(&mut mine, ReduceOp::Sum).unwrap();
        mine
    });
    let per_rank = &counts[0];
    assert_eq!(per_rank.iter().sum::<u64>(), 2000);
    for &c in per_rank {
        // Three rounds of five pivots leave some imbalance; it stays bounded.
        assert!(c > 250 && c < 750, "unbalanced: {per_rank:?}");
    }
}

#[test]
fn planar_problems_alternate_between_x_and_y() {
    let results = run_ranks(4, |comm| {
        let mut rng = SmallRng::seed_from_u64(comm.rank() as u64);
        let pts: Vec<[f64; 3]> = (0..100)
            .map(|_| [rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0), 0.0])
            .collect();
        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&UnstructuredMesh::new(pts).into());
        s.finalize();
        let part = build(&comm, &s);
        let root = *part.bounds();
        part.regions()
            .all(|(_, b)| b.min[2] == root.min[2] && b.max[2] == root.max[2])
    });
    assert!(results.into_iter().all(|flat| flat));
}

/// Every leaf keeps the root's full extent along `axis`.
fn never_split_along(p: usize, axis: usize, plane: impl Fn(f64, f64) -> [f64; 3] + Sync) -> bool {
    let results = run_ranks(p, |comm| {
        let mut rng = SmallRng::seed_from_u64(77 + comm.rank() as u64);
        let pts: Vec<[f64; 3]> = (0..100)
            .map(|_| plane(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)))
            .collect();
        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&UnstructuredMesh::new(pts).into());
        s.finalize();
        let part = build(&comm, &s);
        let root = *part.bounds();
        part.regions()
            .all(|(_, b)| b.min[axis] == root.min[axis] && b.max[axis] == root.max[axis])
    });
    results.into_iter().all(|flat| flat)
}

#[test]
fn xz_and_yz_planes_never_split_on_their_flat_axis() {
    assert!(never_split_along(4, 1, |u, v| [u, 0.5, v]));
    assert!(never_split_along(4, 0, |u, v| [-2.0, u, v]));
}

#[test]
fn xz_plane_splits_on_x_and_z() {
    let results = run_ranks(4, |comm| {
        let mut rng = SmallRng::seed_from_u64(5 + comm.rank() as u64);
        let pts: Vec<[f64; 3]> = (0..200)
            .map(|_| [rng.gen_range(0.0..1.0), 0.5, rng.gen_range(0.0..1.0)])
            .collect();
        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&UnstructuredMesh::new(pts).into());
        s.finalize();
        let part = build(&comm, &s);
        let root = *part.bounds();
        let cut = |a: usize| {
            part.regions()
                .any(|(_, b)| b.min[a] != root.min[a] || b.max[a] != root.max[a])
        };
        (cut(0), cut(2))
    });
    assert!(results.into_iter().all(|c| c == (true, true)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn any_rank_count_gets_one_leaf_per_rank(p in 1usize..7, n in 0usize..60) {
        let results = run_ranks(p, |comm| {
            let s = local_samples(comm.rank() + 31 * n, n);
            build(&comm, &s).num_regions()
        });
        prop_assert!(results.iter().all(|&k| k == p));
    }
}
