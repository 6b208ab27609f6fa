//! Core types shared across the solve engine.
//!
//! Provides [`SupernodePartition`] (the supernode boundary map), the
//! right-hand-side layout [`RhsMatrix`], row/column permutations consumed
//! from the factorization, and the [`SolveStats`] accounting record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::SolveEvent;

// ---------------------------------------------------------------------------
// SupernodePartition
// ---------------------------------------------------------------------------

/// Partition of the matrix rows/columns into supernodes.
///
/// A supernode is a contiguous group of rows/columns treated as one dense
/// block. Supernode `k` spans global rows `xsup[k]..xsup[k + 1]`.
///
/// # Layout
///
/// For a matrix of dimension `n` with `nsupers` supernodes:
/// - `xsup` has length `nsupers + 1`, with `xsup[0] == 0` and
///   `xsup[nsupers] == n`.
/// - `supno` has length `n` and maps each global row to its supernode.
#[derive(Debug, Clone)]
pub struct SupernodePartition {
    /// Supernode boundaries: supernode `k` covers rows `xsup[k]..xsup[k+1]`.
    pub xsup: Vec<usize>,
    /// Row-to-supernode map.
    pub supno: Vec<usize>,
}

impl SupernodePartition {
    /// Build a partition from the boundary array alone.
    pub fn from_boundaries(xsup: Vec<usize>) -> Self {
        let n = *xsup.last().unwrap_or(&0);
        let mut supno = vec![0usize; n];
        for k in 0..xsup.len().saturating_sub(1) {
            for i in xsup[k]..xsup[k + 1] {
                supno[i] = k;
            }
        }
        Self { xsup, supno }
    }

    /// Matrix dimension `n`.
    #[inline]
    pub fn dim(&self) -> usize {
        *self.xsup.last().unwrap_or(&0)
    }

    /// Number of supernodes.
    #[inline]
    pub fn num_supernodes(&self) -> usize {
        self.xsup.len().saturating_sub(1)
    }

    /// Number of rows/columns in supernode `k` (the `SuperSize` contract).
    #[inline]
    pub fn size(&self, k: usize) -> usize {
        self.xsup[k + 1] - self.xsup[k]
    }

    /// First global row of supernode `k`.
    #[inline]
    pub fn first_row(&self, k: usize) -> usize {
        self.xsup[k]
    }

    /// One past the last global row of supernode `k`.
    #[inline]
    pub fn last_row(&self, k: usize) -> usize {
        self.xsup[k + 1]
    }

    /// Supernode containing global row `i`.
    #[inline]
    pub fn block_of_row(&self, i: usize) -> usize {
        self.supno[i]
    }

    /// Largest supernode size, used to size receive/scratch buffers.
    pub fn max_size(&self) -> usize {
        (0..self.num_supernodes()).map(|k| self.size(k)).max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Permutation
// ---------------------------------------------------------------------------

/// Row/column permutations applied by the factorization.
///
/// The solve operates on the permuted system `A1 = Pc*Pr*A*Pc^T = L*U`; the
/// right-hand side is permuted on the way in (`b_to_x`) and the solution is
/// un-permuted on the way out (`x_to_b`).
#[derive(Debug, Clone)]
pub struct Permutation {
    /// Row permutation: `perm_r[i]` is the permuted position of row `i`.
    pub perm_r: Vec<usize>,
    /// Column permutation, applied on top of `perm_r`.
    pub perm_c: Vec<usize>,
}

impl Permutation {
    /// Identity permutation for a system of dimension `n`.
    pub fn identity(n: usize) -> Self {
        Self {
            perm_r: (0..n).collect(),
            perm_c: (0..n).collect(),
        }
    }

    /// Permuted row index of original row `i` (`perm_c[perm_r[i]]`).
    #[inline]
    pub fn permuted_row(&self, i: usize) -> usize {
        self.perm_c[self.perm_r[i]]
    }

    /// Inverse of the composed permutation: maps a permuted row index back
    /// to the original row.
    pub fn inverse(&self) -> Vec<usize> {
        let n = self.perm_r.len();
        let mut inv = vec![0usize; n];
        for i in 0..n {
            inv[self.permuted_row(i)] = i;
        }
        inv
    }
}

// ---------------------------------------------------------------------------
// RhsMatrix
// ---------------------------------------------------------------------------

/// Local slice of the distributed right-hand-side matrix `B`.
///
/// Column-major with leading dimension `ldb`; this process owns the
/// contiguous global row range `fst_row..fst_row + m_loc`. On entry it holds
/// the right-hand side, on successful exit the solution, in the same layout.
#[derive(Debug, Clone)]
pub struct RhsMatrix {
    /// Column-major values, `ldb * nrhs` entries.
    pub values: Vec<f64>,
    /// Number of locally owned rows.
    pub m_loc: usize,
    /// Leading dimension (`>= m_loc`).
    pub ldb: usize,
    /// Global index of the first locally owned row.
    pub fst_row: usize,
}

impl RhsMatrix {
    /// Wrap a dense local block with a tight leading dimension.
    pub fn new(values: Vec<f64>, m_loc: usize, fst_row: usize) -> Self {
        Self { values, m_loc, ldb: m_loc.max(1), fst_row }
    }

    /// An empty slice for processes that own no rows of `B`.
    pub fn empty() -> Self {
        Self { values: Vec::new(), m_loc: 0, ldb: 1, fst_row: 0 }
    }

    /// Entry `(i, j)` of the local block.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i + j * self.ldb]
    }

    /// Set entry `(i, j)` of the local block.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.values[i + j * self.ldb] = v;
    }
}

// ---------------------------------------------------------------------------
// SolveStats
// ---------------------------------------------------------------------------

/// Statistics accumulated by one process over one triangular solve.
///
/// Communication volumes are counted in `f64` words including the one-word
/// block-id header of each message, split into the 2D plane (`xy`) and the
/// depth dimension (`z`), matching the wire layout described in the module
/// docs of [`crate::transport`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Floating-point operations performed by the dense kernels.
    pub solve_flops: u64,
    /// Words sent within the 2D grid (Xk broadcasts and LSUM messages).
    pub data_sent_xy: u64,
    /// Words received within the 2D grid.
    pub data_recv_xy: u64,
    /// Words sent along the depth dimension.
    pub data_sent_z: u64,
    /// Words received along the depth dimension.
    pub data_recv_z: u64,
    /// Number of `Xk` point-to-point sends issued.
    pub xk_sent: u64,
    /// Number of `LSUM` point-to-point sends issued.
    pub lsum_sent: u64,
    /// Number of `Xk` messages consumed by the leaf receive loops.
    pub xk_received: u64,
    /// Number of `LSUM` messages consumed by the leaf receive loops.
    pub lsum_received: u64,
    /// Wall time of the forward direction.
    pub t_forward: Duration,
    /// Wall time of the backward direction.
    pub t_backward: Duration,
    /// Wall time of the `B -> X` redistribution.
    pub t_redistribute_b: Duration,
    /// Wall time of the `X -> B` redistribution.
    pub t_redistribute_x: Duration,
    /// Per-level wall times of the forward direction.
    pub t_forward_level: Vec<Duration>,
    /// Per-level wall times of the backward direction.
    pub t_backward_level: Vec<Duration>,
    /// Event log of this solve (see [`SolveEvent`]).
    pub events: Vec<SolveEvent>,
}

impl SolveStats {
    /// Record an event.
    #[inline]
    pub fn record(&mut self, event: SolveEvent) {
        self.events.push(event);
    }
}
