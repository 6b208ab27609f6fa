//! Block-sparse storage of the triangular factors.
//!
//! The lower factor is stored by block column: each supernode column owned by
//! this process column holds one dense panel (column-major, leading dimension
//! = total packed rows) and a list of row blocks describing which global rows
//! each panel slice covers. On the diagonal owner the first block is the
//! dense diagonal block, which carries both the strictly-lower part of `L`
//! (unit diagonal implied) and the upper part of `U` including the diagonal.
//!
//! The upper factor is stored by block row: each supernode row owned by this
//! process row holds a list of column blocks. A column block stores, per
//! column of the target supernode's span, the first structurally nonzero row
//! of that column segment; segments are packed column after column, each
//! running from its first nonzero down to the end of the supernode.
//!
//! Missing entries are `None`: the solve skips them (recording a
//! [`crate::events::SolveEvent::BlockSkipped`]) rather than failing, so a
//! partially populated structure cannot stall a collective phase.

use crate::grid::GridShape;

// ---------------------------------------------------------------------------
// Lower factor
// ---------------------------------------------------------------------------

/// One row block of a lower panel.
#[derive(Debug, Clone)]
pub struct LowerBlock {
    /// Global block row (supernode id) this block's rows belong to.
    pub block_row: usize,
    /// Global row indices of the packed rows, in panel order.
    pub rows: Vec<usize>,
    /// Row offset of this block within the panel.
    pub row_offset: usize,
}

impl LowerBlock {
    /// Number of packed rows in this block.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }
}

/// Dense panel of one supernode column of `L`.
#[derive(Debug, Clone)]
pub struct LowerBlockColumn {
    /// Global supernode id of this column.
    pub supernode: usize,
    /// Leading dimension of the panel (total packed rows).
    pub lda: usize,
    /// Row blocks, diagonal block first on the diagonal owner.
    pub blocks: Vec<LowerBlock>,
    /// Column-major panel values, `lda * supernode_size` entries.
    pub values: Vec<f64>,
}

impl LowerBlockColumn {
    /// Panel entry at packed row `r`, column `c`.
    #[inline]
    pub fn at(&self, r: usize, c: usize) -> f64 {
        self.values[r + c * self.lda]
    }
}

/// All lower panels owned by this process, indexed by local block column.
#[derive(Debug, Clone, Default)]
pub struct LowerFactor {
    /// `columns[lk]` is the panel of global supernode `lk * npcol + mycol`.
    pub columns: Vec<Option<LowerBlockColumn>>,
}

// ---------------------------------------------------------------------------
// Upper factor
// ---------------------------------------------------------------------------

/// One column block of an upper block row.
#[derive(Debug, Clone)]
pub struct UpperBlock {
    /// Global block column (supernode id) of this block.
    pub block_col: usize,
    /// Per column of `block_col`'s span: first structurally nonzero global
    /// row of the segment. Equal to the row supernode's end if the column is
    /// empty in this block.
    pub col_first_nz: Vec<usize>,
    /// Segment values, column after column, each segment running from its
    /// first nonzero to the end of the row supernode.
    pub values: Vec<f64>,
}

/// All upper blocks of one supernode row.
#[derive(Debug, Clone)]
pub struct UpperBlockRow {
    /// Global supernode id of this row.
    pub supernode: usize,
    /// Column blocks in ascending `block_col` order.
    pub blocks: Vec<UpperBlock>,
}

/// All upper block rows owned by this process, indexed by local block row.
#[derive(Debug, Clone, Default)]
pub struct UpperFactor {
    /// `rows[lk]` is the block row of global supernode `lk * nprow + myrow`.
    pub rows: Vec<Option<UpperBlockRow>>,
}

// ---------------------------------------------------------------------------
// FactoredMatrix
// ---------------------------------------------------------------------------

/// The distributed factor data of one process, plus broadcast recipient
/// lists.
///
/// `fsend_rows[lk]` / `bsend_rows[lk]` are only populated on the diagonal
/// owner of the corresponding supernode; entry `r` says whether process row
/// `r` holds blocks that need `x_k` in the forward / backward direction.
#[derive(Debug, Clone, Default)]
pub struct FactoredMatrix {
    /// Lower panels by local block column.
    pub lower: LowerFactor,
    /// Upper block rows by local block row.
    pub upper: UpperFactor,
    /// Forward broadcast recipients per local block column.
    pub fsend_rows: Vec<Vec<bool>>,
    /// Backward broadcast recipients per local block column.
    pub bsend_rows: Vec<Vec<bool>>,
}

/// Reference to one upper block, addressed by owner block row.
#[derive(Debug, Clone, Copy)]
pub struct UpperColRef {
    /// Local block row holding the referencing block.
    pub local_block_row: usize,
    /// Index of the block within that row's block list.
    pub block_idx: usize,
}

/// Column-to-blocks map over the upper factor.
///
/// The backward substitution walks `U` by column: solving supernode `k`
/// updates every row supernode with a block in column `k`. The row-major
/// store cannot answer that query directly, so this map inverts it, per
/// local block column.
#[derive(Debug, Clone, Default)]
pub struct UpperColMap {
    /// `refs[lk]` lists the upper blocks whose `block_col` is the global
    /// supernode of local block column `lk`.
    pub refs: Vec<Vec<UpperColRef>>,
}

impl UpperColMap {
    /// Build the map from this process's upper factor.
    pub fn build(upper: &UpperFactor, shape: &GridShape, nsupers: usize, mycol: usize) -> Self {
        let ncols = shape.num_local_block_cols(nsupers, mycol);
        let mut refs: Vec<Vec<UpperColRef>> = vec![Vec::new(); ncols];
        for (lbr, row) in upper.rows.iter().enumerate() {
            let Some(row) = row else { continue };
            for (block_idx, blk) in row.blocks.iter().enumerate() {
                if shape.owner_col(blk.block_col) == mycol {
                    let lk = shape.local_block_col(blk.block_col);
                    refs[lk].push(UpperColRef { local_block_row: lbr, block_idx });
                }
            }
        }
        Self { refs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_indexing() {
        // 3-row panel, 2 columns.
        let col = LowerBlockColumn {
            supernode: 0,
            lda: 3,
            blocks: vec![LowerBlock { block_row: 0, rows: vec![0, 1, 2], row_offset: 0 }],
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        };
        assert_eq!(col.at(1, 0), 2.0);
        assert_eq!(col.at(0, 1), 4.0);
    }

    #[test]
    fn upper_col_map_inverts_rows() {
        let shape = GridShape { nprow: 1, npcol: 1, depth: 1 };
        let upper = UpperFactor {
            rows: vec![
                Some(UpperBlockRow {
                    supernode: 0,
                    blocks: vec![
                        UpperBlock { block_col: 1, col_first_nz: vec![0], values: vec![1.0] },
                        UpperBlock { block_col: 2, col_first_nz: vec![0], values: vec![1.0] },
                    ],
                }),
                Some(UpperBlockRow {
                    supernode: 1,
                    blocks: vec![UpperBlock {
                        block_col: 2,
                        col_first_nz: vec![1],
                        values: vec![1.0],
                    }],
                }),
                None,
            ],
        };
        let map = UpperColMap::build(&upper, &shape, 3, 0);
        assert!(map.refs[0].is_empty());
        assert_eq!(map.refs[1].len(), 1);
        assert_eq!(map.refs[2].len(), 2);
        assert_eq!(map.refs[2][0].local_block_row, 0);
        assert_eq!(map.refs[2][1].local_block_row, 1);
    }
}
