//! Process-grid topology and block-cyclic ownership arithmetic.
//!
//! Processes are arranged in a 3D grid of `nprow x npcol x depth`. Supernode
//! blocks are mapped block-cyclically onto the 2D plane: block row `k` lives
//! on process row `k % nprow`, block column `k` on process column
//! `k % npcol`. The depth dimension replicates the plane; each layer solves a
//! sub-forest of the elimination forest and the layers combine through a
//! binary reduction hierarchy of `log2(depth) + 1` levels.

use crate::transport::Comm;

/// Shape of the 3D process grid plus ownership arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    /// Process rows of the 2D plane.
    pub nprow: usize,
    /// Process columns of the 2D plane.
    pub npcol: usize,
    /// Number of replicated layers; must be a power of two.
    pub depth: usize,
}

impl GridShape {
    /// Total number of processes.
    #[inline]
    pub fn num_procs(&self) -> usize {
        self.nprow * self.npcol * self.depth
    }

    /// Process row owning block row `k`.
    #[inline]
    pub fn owner_row(&self, k: usize) -> usize {
        k % self.nprow
    }

    /// Process column owning block column `k`.
    #[inline]
    pub fn owner_col(&self, k: usize) -> usize {
        k % self.npcol
    }

    /// Local index of global block row `k` on its owner process row.
    #[inline]
    pub fn local_block_row(&self, k: usize) -> usize {
        k / self.nprow
    }

    /// Local index of global block column `k` on its owner process column.
    #[inline]
    pub fn local_block_col(&self, k: usize) -> usize {
        k / self.npcol
    }

    /// Rank within the 2D plane of the process at `(prow, pcol)`, row-major.
    #[inline]
    pub fn plane_rank(&self, prow: usize, pcol: usize) -> usize {
        prow * self.npcol + pcol
    }

    /// Number of levels in the binary reduction hierarchy
    /// (`log2(depth) + 1`).
    #[inline]
    pub fn max_level(&self) -> usize {
        debug_assert!(self.depth.is_power_of_two());
        (usize::BITS - 1 - self.depth.leading_zeros()) as usize + 1
    }

    /// Number of local block rows this process row may own for `nsupers`
    /// supernodes.
    #[inline]
    pub fn num_local_block_rows(&self, nsupers: usize, myrow: usize) -> usize {
        ceil_div(nsupers.saturating_sub(myrow), self.nprow)
    }

    /// Number of local block columns this process column may own.
    #[inline]
    pub fn num_local_block_cols(&self, nsupers: usize, mycol: usize) -> usize {
        ceil_div(nsupers.saturating_sub(mycol), self.npcol)
    }
}

#[inline]
fn ceil_div(a: usize, b: usize) -> usize {
    if a == 0 { 0 } else { (a - 1) / b + 1 }
}

/// Communicator bundle for one process in the 3D grid.
///
/// Each process participates in four scopes:
/// - `world`: all `nprow * npcol * depth` processes,
/// - `plane`: the `nprow * npcol` processes of its layer,
/// - `row_scope`: its process row within the layer (rank = process column),
/// - `col_scope`: its process column within the layer (rank = process row),
/// - `z_scope`: the `depth` processes sharing its 2D coordinates
///   (rank = layer index).
pub struct ProcessComms {
    /// Global scope over all processes.
    pub world: Box<dyn Comm>,
    /// 2D plane of this layer.
    pub plane: Box<dyn Comm>,
    /// Row scope: the process row of this process, ranks are columns.
    pub row_scope: Box<dyn Comm>,
    /// Column scope: the process column of this process, ranks are rows.
    pub col_scope: Box<dyn Comm>,
    /// Depth scope: same (row, col) across layers, ranks are layers.
    pub z_scope: Box<dyn Comm>,
    /// Grid shape.
    pub shape: GridShape,
    /// This process's row within the plane.
    pub myrow: usize,
    /// This process's column within the plane.
    pub mycol: usize,
    /// This process's layer.
    pub mylayer: usize,
}

impl ProcessComms {
    /// Flat rank of this process in the world scope.
    #[inline]
    pub fn world_rank(&self) -> usize {
        self.mylayer * self.shape.nprow * self.shape.npcol
            + self.shape.plane_rank(self.myrow, self.mycol)
    }

    /// True if this process owns the diagonal block of supernode `k`.
    #[inline]
    pub fn owns_diag(&self, k: usize) -> bool {
        self.myrow == self.shape.owner_row(k) && self.mycol == self.shape.owner_col(k)
    }
}
