//! Per-solve dependency tracking.
//!
//! Each direction keeps two counter families per local block row, scoped to
//! the sub-forest being solved:
//!
//! - `fmod` / `bmod`: local updates still pending before this process's
//!   partial row sum for the supernode is complete.
//! - `frecv` / `brecv`: on the diagonal owner, how many remote row sums will
//!   arrive from other process columns.
//!
//! Counters are `i64`; a value of `-1` marks a supernode this process has
//! finished with, so a late message can never retrigger it. The `frecv`
//! indicator is conditional (a column with nothing pending sends nothing);
//! the `brecv` indicator is unconditional: every off-diagonal process column
//! of an in-forest supernode row sends exactly one row sum, even a zero one,
//! which keeps the backward receive count independent of the sparsity of
//! `U`.

use crate::error::SolveError;
use crate::factor::{FactoredMatrix, UpperColMap};
use crate::forest::SubForest;
use crate::grid::GridShape;
use crate::transport::Comm;
use crate::types::SupernodePartition;

/// Membership mask over supernodes for one sub-forest.
pub fn in_tree_mask(forest: &SubForest, nsupers: usize) -> Vec<bool> {
    let mut mask = vec![false; nsupers];
    for &k in &forest.nodes {
        mask[k] = true;
    }
    mask
}

/// Forward-direction dependency state for one sub-forest.
#[derive(Debug)]
pub struct ForwardTracker {
    /// Pending local `L` updates per local block row; `-1` once solved.
    pub fmod: Vec<i64>,
    /// Remote row sums expected per local block row (diagonal owner).
    pub frecv: Vec<i64>,
    /// `Xk` messages this process will receive in the leaf loop.
    pub nfrecvx: usize,
    /// `Lsum` messages this process will receive in the leaf loop.
    pub nfrecvmod: usize,
    /// Diagonal-owned supernodes solvable with no waiting.
    pub nleaf: usize,
}

impl ForwardTracker {
    /// Compute the counters for `forest`. Collective over the row scope.
    pub fn build(
        forest: &SubForest,
        factored: &FactoredMatrix,
        part: &SupernodePartition,
        shape: &GridShape,
        myrow: usize,
        mycol: usize,
        row_scope: &dyn Comm,
    ) -> Result<Self, SolveError> {
        let nsupers = part.num_supernodes();
        let in_tree = in_tree_mask(forest, nsupers);
        let nlb = shape.num_local_block_rows(nsupers, myrow);

        let mut fmod = vec![0i64; nlb];
        for panel in factored.lower.columns.iter().flatten() {
            if !in_tree[panel.supernode] {
                continue;
            }
            for blk in &panel.blocks {
                if blk.block_row != panel.supernode {
                    fmod[shape.local_block_row(blk.block_row)] += 1;
                }
            }
        }

        let mut mod_bit = vec![0i64; nlb];
        for &k in &forest.nodes {
            if shape.owner_row(k) == myrow {
                let lk = shape.local_block_row(k);
                if shape.owner_col(k) != mycol && fmod[lk] > 0 {
                    mod_bit[lk] = 1;
                }
            }
        }
        let frecv = row_scope.allreduce_sum_i64(&mod_bit)?;

        let mut nfrecvx = 0usize;
        let mut nfrecvmod = 0usize;
        let mut nleaf = 0usize;
        for &k in &forest.nodes {
            if shape.owner_col(k) == mycol && shape.owner_row(k) != myrow {
                let has_blocks = factored
                    .lower
                    .columns
                    .get(shape.local_block_col(k))
                    .and_then(|c| c.as_ref())
                    .map(|c| !c.blocks.is_empty())
                    .unwrap_or(false);
                if has_blocks {
                    nfrecvx += 1;
                }
            }
            if shape.owner_row(k) == myrow && shape.owner_col(k) == mycol {
                let lk = shape.local_block_row(k);
                nfrecvmod += frecv[lk] as usize;
                if frecv[lk] == 0 && fmod[lk] == 0 {
                    nleaf += 1;
                }
            }
        }

        Ok(Self { fmod, frecv, nfrecvx, nfrecvmod, nleaf })
    }
}

/// Backward-direction dependency state for one sub-forest.
#[derive(Debug)]
pub struct BackwardTracker {
    /// Pending local `U` updates per local block row; `-1` once solved.
    pub bmod: Vec<i64>,
    /// Remote row sums expected per local block row (diagonal owner).
    pub brecv: Vec<i64>,
    /// `Xk` messages this process will receive in the leaf loop.
    pub nbrecvx: usize,
    /// `Lsum` messages this process will receive in the leaf loop.
    pub nbrecvmod: usize,
    /// Diagonal-owned supernodes solvable with no waiting (forest roots).
    pub nroot: usize,
}

impl BackwardTracker {
    /// Compute the counters for `forest`. Collective over the row scope.
    pub fn build(
        forest: &SubForest,
        factored: &FactoredMatrix,
        ucol_map: &UpperColMap,
        part: &SupernodePartition,
        shape: &GridShape,
        myrow: usize,
        mycol: usize,
        row_scope: &dyn Comm,
    ) -> Result<Self, SolveError> {
        let nsupers = part.num_supernodes();
        let in_tree = in_tree_mask(forest, nsupers);
        let nlb = shape.num_local_block_rows(nsupers, myrow);

        let mut bmod = vec![0i64; nlb];
        for (lbr, row) in factored.upper.rows.iter().enumerate() {
            let Some(row) = row else { continue };
            for blk in &row.blocks {
                if in_tree[blk.block_col] {
                    bmod[lbr] += 1;
                }
            }
        }

        // The off-diagonal indicator is set whenever the row is in the
        // forest, whether or not this column has updates to apply.
        let mut mod_bit = vec![0i64; nlb];
        for &k in &forest.nodes {
            if shape.owner_row(k) == myrow && shape.owner_col(k) != mycol {
                mod_bit[shape.local_block_row(k)] = 1;
            }
        }
        let brecv = row_scope.allreduce_sum_i64(&mod_bit)?;

        let mut nbrecvx = 0usize;
        let mut nbrecvmod = 0usize;
        let mut nroot = 0usize;
        for &k in &forest.nodes {
            if shape.owner_col(k) == mycol && shape.owner_row(k) != myrow {
                let lk = shape.local_block_col(k);
                let references_col = ucol_map.refs.get(lk).map(|r| !r.is_empty()).unwrap_or(false);
                if references_col {
                    nbrecvx += 1;
                }
            }
            if shape.owner_row(k) == myrow && shape.owner_col(k) == mycol {
                let lk = shape.local_block_row(k);
                nbrecvmod += brecv[lk] as usize;
                if brecv[lk] == 0 && bmod[lk] == 0 {
                    nroot += 1;
                }
            }
        }

        Ok(Self { bmod, brecv, nbrecvx, nbrecvmod, nroot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::{LowerBlock, LowerBlockColumn, LowerFactor, UpperBlock, UpperBlockRow, UpperFactor};
    use crate::forest::ForestPartition;
    use crate::transport::ChannelFabric;

    // Single-process fixture: two supernodes of size 1, L has an off-diagonal
    // block (1, 0), U has block (0, 1).
    fn fixture() -> (SupernodePartition, GridShape, FactoredMatrix) {
        let part = SupernodePartition::from_boundaries(vec![0, 1, 2]);
        let shape = GridShape { nprow: 1, npcol: 1, depth: 1 };
        let lower = LowerFactor {
            columns: vec![
                Some(LowerBlockColumn {
                    supernode: 0,
                    lda: 2,
                    blocks: vec![
                        LowerBlock { block_row: 0, rows: vec![0], row_offset: 0 },
                        LowerBlock { block_row: 1, rows: vec![1], row_offset: 1 },
                    ],
                    values: vec![1.0, 0.5],
                }),
                Some(LowerBlockColumn {
                    supernode: 1,
                    lda: 1,
                    blocks: vec![LowerBlock { block_row: 1, rows: vec![1], row_offset: 0 }],
                    values: vec![1.0],
                }),
            ],
        };
        let upper = UpperFactor {
            rows: vec![
                Some(UpperBlockRow {
                    supernode: 0,
                    blocks: vec![UpperBlock { block_col: 1, col_first_nz: vec![0], values: vec![0.25] }],
                }),
                Some(UpperBlockRow { supernode: 1, blocks: vec![] }),
            ],
        };
        let factored = FactoredMatrix {
            lower,
            upper,
            fsend_rows: vec![vec![false]; 2],
            bsend_rows: vec![vec![false]; 2],
        };
        (part, shape, factored)
    }

    #[test]
    fn forward_counters_single_process() {
        let (part, shape, factored) = fixture();
        let parent = vec![Some(1), None];
        let partition = ForestPartition::single_tree(2, &parent);
        let forest = partition.forest(0).unwrap();
        let comms = ChannelFabric::build(shape).remove(0);

        let t = ForwardTracker::build(
            forest, &factored, &part, &shape, 0, 0, comms.row_scope.as_ref(),
        )
        .unwrap();
        // Supernode 1 waits on the (1, 0) update; supernode 0 is a leaf.
        assert_eq!(t.fmod, vec![0, 1]);
        assert_eq!(t.frecv, vec![0, 0]);
        assert_eq!(t.nfrecvx, 0);
        assert_eq!(t.nfrecvmod, 0);
        assert_eq!(t.nleaf, 1);
    }

    #[test]
    fn backward_counters_single_process() {
        let (part, shape, factored) = fixture();
        let parent = vec![Some(1), None];
        let partition = ForestPartition::single_tree(2, &parent);
        let forest = partition.forest(0).unwrap();
        let ucol_map = UpperColMap::build(&factored.upper, &shape, 2, 0);
        let comms = ChannelFabric::build(shape).remove(0);

        let t = BackwardTracker::build(
            forest, &factored, &ucol_map, &part, &shape, 0, 0, comms.row_scope.as_ref(),
        )
        .unwrap();
        // Supernode 0 waits on the (0, 1) update; supernode 1 is the root.
        assert_eq!(t.bmod, vec![1, 0]);
        assert_eq!(t.brecv, vec![0, 0]);
        assert_eq!(t.nbrecvx, 0);
        assert_eq!(t.nbrecvmod, 0);
        assert_eq!(t.nroot, 1);
    }
}
