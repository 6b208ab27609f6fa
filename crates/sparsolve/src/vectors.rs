//! Distributed solution and row-sum block containers.
//!
//! `x` and `lsum` hold one `knsupc x nrhs` block per supernode whose block
//! row this process row owns; the transposed copy `xT` holds one block per
//! supernode whose block column this process column owns. Blocks are packed
//! contiguously and addressed by local block index, with explicit metadata
//! instead of in-band header words.

use crate::grid::GridShape;
use crate::types::SupernodePartition;

/// A dense container of per-supernode blocks, column-major within each block.
#[derive(Debug, Clone)]
pub struct BlockVec {
    offsets: Vec<usize>,
    sizes: Vec<usize>,
    globals: Vec<usize>,
    values: Vec<f64>,
    nrhs: usize,
}

impl BlockVec {
    /// Blocks for every supernode whose block row is owned by process row
    /// `myrow`, in local-block-row order.
    pub fn for_rows(part: &SupernodePartition, shape: &GridShape, myrow: usize, nrhs: usize) -> Self {
        let globals: Vec<usize> = (0..part.num_supernodes())
            .filter(|&k| shape.owner_row(k) == myrow)
            .collect();
        Self::from_globals(part, globals, nrhs)
    }

    /// Blocks for every supernode whose block column is owned by process
    /// column `mycol`, in local-block-column order.
    pub fn for_cols(part: &SupernodePartition, shape: &GridShape, mycol: usize, nrhs: usize) -> Self {
        let globals: Vec<usize> = (0..part.num_supernodes())
            .filter(|&k| shape.owner_col(k) == mycol)
            .collect();
        Self::from_globals(part, globals, nrhs)
    }

    fn from_globals(part: &SupernodePartition, globals: Vec<usize>, nrhs: usize) -> Self {
        let sizes: Vec<usize> = globals.iter().map(|&k| part.size(k)).collect();
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut total = 0usize;
        for &s in &sizes {
            offsets.push(total);
            total += s * nrhs;
        }
        Self { offsets, sizes, globals, values: vec![0.0; total], nrhs }
    }

    /// Number of local blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.globals.len()
    }

    /// Global supernode of local block `lb`.
    #[inline]
    pub fn global(&self, lb: usize) -> usize {
        self.globals[lb]
    }

    /// Supernode size of local block `lb`.
    #[inline]
    pub fn size(&self, lb: usize) -> usize {
        self.sizes[lb]
    }

    /// Number of right-hand sides.
    #[inline]
    pub fn nrhs(&self) -> usize {
        self.nrhs
    }

    /// Values of local block `lb` (`size(lb) * nrhs` entries, column-major).
    #[inline]
    pub fn block(&self, lb: usize) -> &[f64] {
        let off = self.offsets[lb];
        &self.values[off..off + self.sizes[lb] * self.nrhs]
    }

    /// Mutable values of local block `lb`.
    #[inline]
    pub fn block_mut(&mut self, lb: usize) -> &mut [f64] {
        let off = self.offsets[lb];
        &mut self.values[off..off + self.sizes[lb] * self.nrhs]
    }

    /// Element-wise add `data` into local block `lb`.
    pub fn add_into(&mut self, lb: usize, data: &[f64]) {
        for (dst, v) in self.block_mut(lb).iter_mut().zip(data.iter()) {
            *dst += v;
        }
    }

    /// Reset every block to zero.
    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// The whole packed buffer, for cross-layer reductions and broadcasts.
    #[inline]
    pub fn raw(&self) -> &[f64] {
        &self.values
    }

    /// Mutable packed buffer.
    #[inline]
    pub fn raw_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_blocks_follow_cyclic_ownership() {
        let part = SupernodePartition::from_boundaries(vec![0, 2, 3, 5, 6]);
        let shape = GridShape { nprow: 2, npcol: 1, depth: 1 };
        let v = BlockVec::for_rows(&part, &shape, 0, 2);
        // Row 0 owns supernodes 0 and 2 (sizes 2 and 2).
        assert_eq!(v.num_blocks(), 2);
        assert_eq!(v.global(0), 0);
        assert_eq!(v.global(1), 2);
        assert_eq!(v.block(1).len(), 4);
    }

    #[test]
    fn add_into_accumulates() {
        let part = SupernodePartition::from_boundaries(vec![0, 3]);
        let shape = GridShape { nprow: 1, npcol: 1, depth: 1 };
        let mut v = BlockVec::for_rows(&part, &shape, 0, 1);
        v.add_into(0, &[1.0, 2.0, 3.0]);
        v.add_into(0, &[0.5, 0.5, 0.5]);
        assert_eq!(v.block(0), &[1.5, 2.5, 3.5]);
        v.zero();
        assert_eq!(v.block(0), &[0.0, 0.0, 0.0]);
    }
}
