//! Dependency-counter construction on a multi-process plane, and the
//! end-to-end consequence of sound counters: every supernode is driven
//! exactly once, so the per-rank message totals are fully determined.

mod helpers;

use sparsolve::factor::UpperColMap;
use sparsolve::forest::ForestPartition;
use sparsolve::grid::GridShape;
use sparsolve::tracker::{BackwardTracker, ForwardTracker};
use sparsolve::transport::ChannelFabric;
use sparsolve::types::{Permutation, SupernodePartition};

use helpers::{
    dense_lu_solve, distribute_factor, max_abs_diff, random_block_factor, random_rhs, run_solve,
};

/// Four size-2 supernodes on a 2 x 2 plane. The lower pattern holds blocks
/// (1, 0), (2, 0) and (3, 2); the upper holds (0, 1), (2, 3) and (1, 3).
/// Every plane rank ends up with a distinct counter profile: rank 0 owns
/// the only leaf, rank 2 holds all three `L` updates, rank 1 holds all
/// three `U` updates, and rank 3 owns both diagonals of process column 1.
fn cross_rank_case() -> (SupernodePartition, ForestPartition, helpers::GlobalFactor) {
    let part = SupernodePartition::from_boundaries(vec![0, 2, 4, 6, 8]);
    let parents = vec![Some(1), Some(3), Some(3), None];
    let partition = ForestPartition::single_tree(4, &parents);
    let pattern = [(1, 0), (2, 0), (3, 2), (0, 1), (2, 3), (1, 3)];
    let f = random_block_factor(&part, &pattern, 101);
    (part, partition, f)
}

#[test]
fn counters_on_a_2x2_plane() {
    let (part, partition, f) = cross_rank_case();
    let shape = GridShape { nprow: 2, npcol: 2, depth: 1 };
    let factors = distribute_factor(&f, &part, &shape);
    let bundles = ChannelFabric::build(shape);
    let nsupers = part.num_supernodes();

    // The builds are collective over each row scope, so every rank runs on
    // its own thread, exactly as the engine would drive them.
    let mut fwd: Vec<Option<ForwardTracker>> = (0..4).map(|_| None).collect();
    let mut bwd: Vec<Option<BackwardTracker>> = (0..4).map(|_| None).collect();
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (w, comms) in bundles.into_iter().enumerate() {
            let factored = factors[w].clone();
            let part = &part;
            let partition = &partition;
            handles.push(scope.spawn(move || {
                let forest = partition.forest(0).unwrap();
                let ft = ForwardTracker::build(
                    forest,
                    &factored,
                    part,
                    &shape,
                    comms.myrow,
                    comms.mycol,
                    comms.row_scope.as_ref(),
                )
                .unwrap();
                let ucol_map = UpperColMap::build(&factored.upper, &shape, nsupers, comms.mycol);
                let bt = BackwardTracker::build(
                    forest,
                    &factored,
                    &ucol_map,
                    part,
                    &shape,
                    comms.myrow,
                    comms.mycol,
                    comms.row_scope.as_ref(),
                )
                .unwrap();
                (w, ft, bt)
            }));
        }
        for h in handles {
            let (w, ft, bt) = h.join().expect("tracker thread panicked");
            fwd[w] = Some(ft);
            bwd[w] = Some(bt);
        }
    });
    let fwd: Vec<ForwardTracker> = fwd.into_iter().flatten().collect();
    let bwd: Vec<BackwardTracker> = bwd.into_iter().flatten().collect();

    // Forward. Rank 0 holds the (2, 0) update and both diagonals of column
    // 0; rank 2 holds (1, 0) and (3, 2), whose row sums make frecv = 1 on
    // all of process row 1; rank 3 waits for both of them.
    let want_fmod = [vec![0, 1], vec![0, 0], vec![1, 1], vec![0, 0]];
    let want_frecv = [vec![0, 0], vec![0, 0], vec![1, 1], vec![1, 1]];
    let want_fwd = [(0, 0, 1), (0, 0, 0), (2, 0, 0), (0, 2, 0)];
    for (p, t) in fwd.iter().enumerate() {
        assert_eq!(t.fmod, want_fmod[p], "fmod at plane rank {p}");
        assert_eq!(t.frecv, want_frecv[p], "frecv at plane rank {p}");
        assert_eq!(
            (t.nfrecvx, t.nfrecvmod, t.nleaf),
            want_fwd[p],
            "forward counts at plane rank {p}"
        );
    }

    // Backward. All three `U` updates land on process column 1, so rank 1
    // carries bmod for rows 0 and 2 and rank 3 for row 1; brecv is the
    // unconditional indicator and is 1 on every diagonal-owned row.
    let want_bmod = [vec![0, 0], vec![1, 1], vec![0, 0], vec![1, 0]];
    let want_brecv = [vec![1, 1], vec![1, 1], vec![1, 1], vec![1, 1]];
    let want_bwd = [(0, 2, 0), (2, 0, 0), (0, 0, 0), (0, 2, 0)];
    for (p, t) in bwd.iter().enumerate() {
        assert_eq!(t.bmod, want_bmod[p], "bmod at plane rank {p}");
        assert_eq!(t.brecv, want_brecv[p], "brecv at plane rank {p}");
        assert_eq!(
            (t.nbrecvx, t.nbrecvmod, t.nroot),
            want_bwd[p],
            "backward counts at plane rank {p}"
        );
    }

    // Receive expectations must balance the sends the protocol will make:
    // two forward row sums cross the plane (for supernodes 1 and 3), and
    // every off-diagonal column of every row ships one backward sum.
    let nfrecvmod: usize = fwd.iter().map(|t| t.nfrecvmod).sum();
    assert_eq!(nfrecvmod, 2);
    let nbrecvmod: usize = bwd.iter().map(|t| t.nbrecvmod).sum();
    assert_eq!(nbrecvmod, 4);
}

#[test]
fn counters_drive_each_supernode_exactly_once() {
    let (part, partition, f) = cross_rank_case();
    let perm = Permutation::identity(8);
    let b = random_rhs(8, 1, 102);
    let shape = GridShape { nprow: 2, npcol: 2, depth: 1 };

    let (got, stats) = run_solve(shape, &part, &perm, &partition, &f, &b, 1);

    let mut want = b.clone();
    dense_lu_solve(&f, &mut want, 1);
    assert!(max_abs_diff(&got, &want) < 1e-10);

    // Exact message totals per plane rank, both directions combined:
    // (xk_sent, xk_received, lsum_sent, lsum_received). These only hold if
    // every counter reaches zero exactly once and the -1 sentinel keeps a
    // late update from retriggering a solved supernode.
    let expect = [(2, 0, 0, 2), (0, 2, 2, 0), (0, 2, 4, 0), (2, 0, 0, 4)];
    for (p, s) in stats.iter().enumerate() {
        assert_eq!(
            (s.xk_sent, s.xk_received, s.lsum_sent, s.lsum_received),
            expect[p],
            "message counts at plane rank {p}"
        );
    }
}
