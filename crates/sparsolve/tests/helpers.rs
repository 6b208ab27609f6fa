//! Shared test helpers for the sparsolve integration test suite.
//!
//! Provides deterministic block-sparse factor generators, a dense reference
//! solver, the distribution of a global dense factor into per-process
//! block-sparse storage, and a thread-per-process harness over the in-memory
//! channel fabric.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sparsolve::factor::{
    FactoredMatrix, LowerBlock, LowerBlockColumn, LowerFactor, UpperBlock, UpperBlockRow,
    UpperFactor,
};
use sparsolve::forest::ForestPartition;
use sparsolve::grid::GridShape;
use sparsolve::transport::ChannelFabric;
use sparsolve::types::{Permutation, RhsMatrix, SolveStats, SupernodePartition};
use sparsolve::{solve, SolveInput};

// ---------------------------------------------------------------------------
// Global factor generation
// ---------------------------------------------------------------------------

/// A globally assembled factor `F = L + U - I` (unit-lower `L`, upper `U`
/// including the diagonal), column-major `n x n`, with a supernodal block
/// structure.
pub struct GlobalFactor {
    pub n: usize,
    pub values: Vec<f64>,
}

impl GlobalFactor {
    #[inline]
    pub fn at(&self, r: usize, c: usize) -> f64 {
        self.values[r + c * self.n]
    }
}

/// Generate a factor with dense diagonal blocks and the given off-diagonal
/// block pattern. Each `(bi, bj)` pair fills block row `bi`, block column
/// `bj` with small random values (`bi > bj` lands in `L`, `bi < bj` in `U`).
/// Diagonal entries of `U` are kept away from zero so the backward solve is
/// well conditioned.
pub fn random_block_factor(
    part: &SupernodePartition,
    pattern: &[(usize, usize)],
    seed: u64,
) -> GlobalFactor {
    let n = part.dim();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = vec![0.0; n * n];

    for k in 0..part.num_supernodes() {
        for c in part.first_row(k)..part.last_row(k) {
            for r in part.first_row(k)..part.last_row(k) {
                values[r + c * n] = if r == c {
                    4.0 + rng.gen_range(0.0..1.0)
                } else {
                    rng.gen_range(-0.5..0.5)
                };
            }
        }
    }
    for &(bi, bj) in pattern {
        assert_ne!(bi, bj, "diagonal blocks are implicit");
        for c in part.first_row(bj)..part.last_row(bj) {
            for r in part.first_row(bi)..part.last_row(bi) {
                values[r + c * n] = rng.gen_range(-0.5..0.5);
            }
        }
    }
    GlobalFactor { n, values }
}

/// Deterministic right-hand side, `n x nrhs` column-major.
pub fn random_rhs(n: usize, nrhs: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * nrhs).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

// ---------------------------------------------------------------------------
// Dense reference solve
// ---------------------------------------------------------------------------

/// Solve `L * U * y = rhs` in place against the global factor.
pub fn dense_lu_solve(f: &GlobalFactor, rhs: &mut [f64], nrhs: usize) {
    let n = f.n;
    for j in 0..nrhs {
        for c in 0..n {
            let xc = rhs[c + j * n];
            for r in (c + 1)..n {
                rhs[r + j * n] -= f.at(r, c) * xc;
            }
        }
    }
    for j in 0..nrhs {
        for c in (0..n).rev() {
            let xc = rhs[c + j * n] / f.at(c, c);
            rhs[c + j * n] = xc;
            for r in 0..c {
                rhs[r + j * n] -= f.at(r, c) * xc;
            }
        }
    }
}

/// Reference for a permuted solve: the engine permutes `b` on the way in
/// (`row i` lands at `perm_c[perm_r[i]]`), solves against the factor, and
/// un-permutes on the way out.
pub fn dense_permuted_solve(
    f: &GlobalFactor,
    perm: &Permutation,
    b: &[f64],
    nrhs: usize,
) -> Vec<f64> {
    let n = f.n;
    let mut bx = vec![0.0; n * nrhs];
    for i in 0..n {
        let irow = perm.permuted_row(i);
        for j in 0..nrhs {
            bx[irow + j * n] = b[i + j * n];
        }
    }
    dense_lu_solve(f, &mut bx, nrhs);
    let mut out = vec![0.0; n * nrhs];
    for i in 0..n {
        let irow = perm.permuted_row(i);
        for j in 0..nrhs {
            out[i + j * n] = bx[irow + j * n];
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Factor distribution
// ---------------------------------------------------------------------------

fn block_nonzero(f: &GlobalFactor, part: &SupernodePartition, bi: usize, bj: usize) -> bool {
    for c in part.first_row(bj)..part.last_row(bj) {
        for r in part.first_row(bi)..part.last_row(bi) {
            if f.at(r, c) != 0.0 {
                return true;
            }
        }
    }
    false
}

/// Split the global factor into one [`FactoredMatrix`] per 2D plane rank
/// (row-major), mirroring the block-cyclic distribution the engine expects.
pub fn distribute_factor(
    f: &GlobalFactor,
    part: &SupernodePartition,
    shape: &GridShape,
) -> Vec<FactoredMatrix> {
    let mut out = Vec::new();
    for prow in 0..shape.nprow {
        for pcol in 0..shape.npcol {
            out.push(build_rank_factor(f, part, shape, prow, pcol));
        }
    }
    out
}

fn build_rank_factor(
    f: &GlobalFactor,
    part: &SupernodePartition,
    shape: &GridShape,
    prow: usize,
    pcol: usize,
) -> FactoredMatrix {
    let nsupers = part.num_supernodes();
    let ncols = shape.num_local_block_cols(nsupers, pcol);
    let nrows = shape.num_local_block_rows(nsupers, prow);

    // Lower panels.
    let mut columns: Vec<Option<LowerBlockColumn>> = vec![None; ncols];
    for k in (0..nsupers).filter(|&k| shape.owner_col(k) == pcol) {
        let ksz = part.size(k);
        let mut blocks = Vec::new();
        if shape.owner_row(k) == prow {
            blocks.push(k);
        }
        for ik in (k + 1)..nsupers {
            if shape.owner_row(ik) == prow && block_nonzero(f, part, ik, k) {
                blocks.push(ik);
            }
        }
        if blocks.is_empty() {
            continue;
        }
        let lda: usize = blocks.iter().map(|&ik| part.size(ik)).sum();
        let mut values = vec![0.0; lda * ksz];
        let mut lblocks = Vec::new();
        let mut row_offset = 0usize;
        for &ik in &blocks {
            let rows: Vec<usize> = (part.first_row(ik)..part.last_row(ik)).collect();
            for (c, col) in (part.first_row(k)..part.last_row(k)).enumerate() {
                for (r, &grow) in rows.iter().enumerate() {
                    values[row_offset + r + c * lda] = f.at(grow, col);
                }
            }
            lblocks.push(LowerBlock { block_row: ik, rows, row_offset });
            row_offset += part.size(ik);
        }
        columns[shape.local_block_col(k)] = Some(LowerBlockColumn {
            supernode: k,
            lda,
            blocks: lblocks,
            values,
        });
    }

    // Upper block rows.
    let mut rows: Vec<Option<UpperBlockRow>> = vec![None; nrows];
    for k in (0..nsupers).filter(|&k| shape.owner_row(k) == prow) {
        let k_end = part.last_row(k);
        let mut blocks = Vec::new();
        for jb in (k + 1)..nsupers {
            if shape.owner_col(jb) != pcol || !block_nonzero(f, part, k, jb) {
                continue;
            }
            let mut col_first_nz = Vec::new();
            let mut values = Vec::new();
            for col in part.first_row(jb)..part.last_row(jb) {
                let fnz = (part.first_row(k)..k_end)
                    .find(|&r| f.at(r, col) != 0.0)
                    .unwrap_or(k_end);
                col_first_nz.push(fnz);
                for r in fnz..k_end {
                    values.push(f.at(r, col));
                }
            }
            blocks.push(UpperBlock { block_col: jb, col_first_nz, values });
        }
        if !blocks.is_empty() {
            rows[shape.local_block_row(k)] = Some(UpperBlockRow { supernode: k, blocks });
        }
    }

    // Broadcast recipient lists, on the diagonal owner's column.
    let mut fsend_rows = vec![vec![false; shape.nprow]; ncols];
    let mut bsend_rows = vec![vec![false; shape.nprow]; ncols];
    for k in (0..nsupers).filter(|&k| shape.owner_col(k) == pcol) {
        let lbc = shape.local_block_col(k);
        for ik in (k + 1)..nsupers {
            if block_nonzero(f, part, ik, k) {
                fsend_rows[lbc][shape.owner_row(ik)] = true;
            }
        }
        for ik in 0..k {
            if block_nonzero(f, part, ik, k) {
                bsend_rows[lbc][shape.owner_row(ik)] = true;
            }
        }
    }

    FactoredMatrix {
        lower: LowerFactor { columns },
        upper: UpperFactor { rows },
        fsend_rows,
        bsend_rows,
    }
}

// ---------------------------------------------------------------------------
// Distributed harness
// ---------------------------------------------------------------------------

/// Even row split of `B` across the 2D plane ranks.
pub fn even_row_starts(n: usize, plane_size: usize) -> Vec<usize> {
    (0..=plane_size).map(|p| p * n / plane_size).collect()
}

/// Run one distributed solve with a thread per process over the in-memory
/// fabric. Returns the reassembled `n x nrhs` solution and the per-process
/// stats in flat world-rank order.
pub fn run_solve(
    shape: GridShape,
    part: &SupernodePartition,
    perm: &Permutation,
    partition: &ForestPartition,
    f: &GlobalFactor,
    b_global: &[f64],
    nrhs: usize,
) -> (Vec<f64>, Vec<SolveStats>) {
    let n = part.dim();
    let plane_size = shape.nprow * shape.npcol;
    let factors = distribute_factor(f, part, &shape);
    let starts = even_row_starts(n, plane_size);
    let bundles = ChannelFabric::build(shape);

    let mut results: Vec<Option<(usize, RhsMatrix, SolveStats)>> = Vec::new();
    for _ in 0..shape.num_procs() {
        results.push(None);
    }

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (w, comms) in bundles.into_iter().enumerate() {
            let layer = w / plane_size;
            let prank = w % plane_size;
            let factored = factors[prank].clone();
            let starts = &starts;
            let mut b = if layer == 0 {
                let fst = starts[prank];
                let m_loc = starts[prank + 1] - fst;
                let mut vals = vec![0.0; m_loc.max(1) * nrhs];
                for i in 0..m_loc {
                    for j in 0..nrhs {
                        vals[i + j * m_loc.max(1)] = b_global[fst + i + j * n];
                    }
                }
                RhsMatrix { values: vals, m_loc, ldb: m_loc.max(1), fst_row: fst }
            } else {
                RhsMatrix::empty()
            };
            handles.push(scope.spawn(move || {
                let input = SolveInput {
                    part,
                    perm,
                    partition,
                    factored: &factored,
                    b_row_starts: starts,
                };
                let stats = solve(&input, &comms, &mut b, nrhs).expect("solve failed");
                (w, b, stats)
            }));
        }
        for h in handles {
            let (w, b, stats) = h.join().expect("process thread panicked");
            results[w] = Some((w, b, stats));
        }
    });

    let mut out = vec![0.0; n * nrhs];
    let mut stats_out = Vec::new();
    for r in results.into_iter().flatten() {
        let (w, b, stats) = r;
        if w < plane_size {
            for i in 0..b.m_loc {
                for j in 0..nrhs {
                    out[b.fst_row + i + j * n] = b.get(i, j);
                }
            }
        }
        stats_out.push(stats);
    }
    (out, stats_out)
}

/// Largest absolute difference between two equally sized slices.
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
