//! Redistribution between the caller's row layout of `B` and the solver's
//! block layout of `x`.
//!
//! The caller hands `B` in contiguous global row ranges across the layer-0
//! plane. `b_to_x` permutes each row with the factorization's permutations
//! and ships it to the diagonal owner of its supernode; `x_to_b` inverts
//! both steps after the solve. Both are single `alltoallv` exchanges where
//! the integer stream carries permuted row ids and the float stream carries
//! the row values, `nrhs` per row.
//!
//! Every layer runs the exchange over its own plane; layers above 0 own no
//! rows of `B` and exchange nothing.

use crate::driver::Engine;
use crate::error::SolveError;
use crate::types::{Permutation, RhsMatrix};

impl Engine<'_> {
    /// Scatter the permuted right-hand side into the diagonal blocks of `x`.
    pub(crate) fn b_to_x(&mut self, b: &RhsMatrix, perm: &Permutation) -> Result<(), SolveError> {
        let psize = self.comms.plane.size();
        let nrhs = self.nrhs;
        let mut ints: Vec<Vec<i64>> = vec![Vec::new(); psize];
        let mut floats: Vec<Vec<f64>> = vec![Vec::new(); psize];
        for i in 0..b.m_loc {
            let irow = perm.permuted_row(b.fst_row + i);
            let k = self.part.block_of_row(irow);
            let dest = self
                .shape
                .plane_rank(self.shape.owner_row(k), self.shape.owner_col(k));
            ints[dest].push(irow as i64);
            for j in 0..nrhs {
                floats[dest].push(b.get(i, j));
            }
        }
        let (recv_ints, recv_floats) = self.comms.plane.alltoallv(&ints, &floats)?;
        for (rows, vals) in recv_ints.iter().zip(recv_floats.iter()) {
            for (idx, &irow) in rows.iter().enumerate() {
                let irow = irow as usize;
                let k = self.part.block_of_row(irow);
                let lk = self.shape.local_block_row(k);
                let off = irow - self.part.first_row(k);
                let sz = self.part.size(k);
                let xb = self.x.block_mut(lk);
                for j in 0..nrhs {
                    xb[off + j * sz] = vals[idx * nrhs + j];
                }
            }
        }
        Ok(())
    }

    /// Gather the solution out of the diagonal blocks of `x` back into the
    /// caller's layout, undoing the permutations.
    pub(crate) fn x_to_b(
        &mut self,
        b: &mut RhsMatrix,
        perm: &Permutation,
        b_row_starts: &[usize],
    ) -> Result<(), SolveError> {
        let psize = self.comms.plane.size();
        let nrhs = self.nrhs;
        let mut ints: Vec<Vec<i64>> = vec![Vec::new(); psize];
        let mut floats: Vec<Vec<f64>> = vec![Vec::new(); psize];
        if self.comms.mylayer == 0 {
            let inv = perm.inverse();
            for k in 0..self.part.num_supernodes() {
                if !self.comms.owns_diag(k) {
                    continue;
                }
                let lk = self.shape.local_block_row(k);
                let first = self.part.first_row(k);
                let sz = self.part.size(k);
                let xb = self.x.block(lk);
                for r in 0..sz {
                    let orig = inv[first + r];
                    let dest = b_row_starts.partition_point(|&s| s <= orig) - 1;
                    ints[dest].push(orig as i64);
                    for j in 0..nrhs {
                        floats[dest].push(xb[r + j * sz]);
                    }
                }
            }
        }
        let (recv_ints, recv_floats) = self.comms.plane.alltoallv(&ints, &floats)?;
        for (rows, vals) in recv_ints.iter().zip(recv_floats.iter()) {
            for (idx, &orig) in rows.iter().enumerate() {
                let li = orig as usize - b.fst_row;
                for j in 0..nrhs {
                    b.set(li, j, vals[idx * nrhs + j]);
                }
            }
        }
        Ok(())
    }
}
