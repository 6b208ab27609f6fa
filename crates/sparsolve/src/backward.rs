//! Backward substitution (`U * x = y`).
//!
//! Mirrors the forward direction with the roles of `L` and `U` swapped and
//! the traversal reversed: forests are solved from the hierarchy root down,
//! and within a forest the topological order runs roots-first. One protocol
//! difference is deliberate: every off-diagonal process row of an in-forest
//! supernode sends exactly one row sum, even when it has no updates to
//! contribute, so the initial sweep ships those (possibly zero) sums
//! immediately and the receive count stays independent of the sparsity of
//! `U`.

use tracing::trace;

use crate::dense;
use crate::driver::Engine;
use crate::error::SolveError;
use crate::events::FactorSide;
use crate::forest::SubForest;
use crate::tracker::BackwardTracker;
use crate::transport::MsgTag;

impl Engine<'_> {
    /// Self-scheduling backward solve of one leaf forest. Returns the number
    /// of supernodes solved on this process.
    pub(crate) fn leaf_backward_solve(
        &mut self,
        forest: &SubForest,
        tree: usize,
        tracker: &mut BackwardTracker,
    ) -> Result<usize, SolveError> {
        let mut solved = 0usize;

        // Initial sweep: off-diagonal columns with nothing pending ship
        // their row sums unconditionally; ready roots solve on the spot.
        for &k in &forest.nodes {
            let krow = self.shape.owner_row(k);
            let kcol = self.shape.owner_col(k);
            if self.comms.myrow != krow {
                continue;
            }
            let lk = self.shape.local_block_row(k);
            if tracker.bmod[lk] != 0 {
                continue;
            }
            if self.comms.mycol != kcol {
                tracker.bmod[lk] = -1;
                let data = self.lsum.block(lk).to_vec();
                let dest = self.shape.plane_rank(self.comms.myrow, kcol);
                self.send_plane(dest, MsgTag::Lsum, k, data)?;
            } else if tracker.brecv[lk] == 0 {
                solved += self.solve_backward_diag(k, tree, tracker)?;
            }
        }

        while tracker.nbrecvx > 0 || tracker.nbrecvmod > 0 {
            let (src, msg) = self.comms.plane.recv()?;
            self.stats.data_recv_xy += msg.wire_words();
            match msg.tag {
                MsgTag::Xk => {
                    tracker.nbrecvx -= 1;
                    self.stats.xk_received += 1;
                    trace!(supernode = msg.supernode, src, "xk received");
                    solved += self.backward_cascade(msg.supernode, msg.data, tree, tracker)?;
                }
                MsgTag::Lsum => {
                    tracker.nbrecvmod -= 1;
                    self.stats.lsum_received += 1;
                    trace!(supernode = msg.supernode, src, "row sum received");
                    let k = msg.supernode;
                    let lk = self.shape.local_block_row(k);
                    self.x.add_into(lk, &msg.data);
                    tracker.brecv[lk] -= 1;
                    if tracker.brecv[lk] == 0 && tracker.bmod[lk] == 0 {
                        solved += self.solve_backward_diag(k, tree, tracker)?;
                    }
                }
            }
        }
        Ok(solved)
    }

    /// Deterministic backward solve of a non-leaf forest, roots-first.
    pub(crate) fn nonleaf_backward_solve(
        &mut self,
        forest: &SubForest,
        tree: usize,
    ) -> Result<usize, SolveError> {
        let mut solved = 0usize;
        for t in (0..forest.topo.num_levels).rev() {
            for &k in forest.level_nodes(t) {
                let krow = self.shape.owner_row(k);
                let kcol = self.shape.owner_col(k);
                if self.comms.myrow == krow {
                    let lk = self.shape.local_block_row(k);
                    let mut buf = self.lsum.block(lk).to_vec();
                    self.comms.row_scope.reduce_sum_f64(&mut buf, kcol)?;
                    if self.comms.mycol == kcol {
                        self.x.add_into(lk, &buf);
                        if self.trsm_backward(k)?.is_some() {
                            solved += 1;
                        }
                    } else {
                        self.stats.data_sent_xy += buf.len() as u64;
                    }
                }
                if self.comms.mycol == kcol {
                    let ltc = self.shape.local_block_col(k);
                    let mut buf = vec![0.0; self.part.size(k) * self.nrhs];
                    if self.comms.myrow == krow {
                        let lk = self.shape.local_block_row(k);
                        buf.copy_from_slice(self.x.block(lk));
                    } else {
                        self.stats.data_recv_xy += buf.len() as u64;
                    }
                    self.comms.col_scope.bcast_f64(&mut buf, krow)?;
                    self.xt.block_mut(ltc).copy_from_slice(&buf);
                    self.apply_upper_updates(k, &buf, tree)?;
                }
            }
        }
        Ok(solved)
    }

    /// Solve the diagonal block of `k` against `U`, broadcast the result,
    /// and cascade the updates it unlocks.
    fn solve_backward_diag(
        &mut self,
        k: usize,
        tree: usize,
        tracker: &mut BackwardTracker,
    ) -> Result<usize, SolveError> {
        let lk = self.shape.local_block_row(k);
        tracker.bmod[lk] = -1;
        self.fold_lsum_into_x(lk);
        let Some(xk) = self.trsm_backward(k)? else {
            return Ok(0);
        };
        self.bcast_x_backward(k, &xk)?;
        let cascaded = self.backward_cascade(k, xk, tree, tracker)?;
        Ok(1 + cascaded)
    }

    /// Apply a solved block through the local `U` structure via the column
    /// map, following the chain of completions with an explicit worklist.
    fn backward_cascade(
        &mut self,
        k0: usize,
        xk0: Vec<f64>,
        tree: usize,
        tracker: &mut BackwardTracker,
    ) -> Result<usize, SolveError> {
        let factored = self.factored;
        let mut solved = 0usize;
        let mut work = vec![(k0, xk0)];
        while let Some((k, xk)) = work.pop() {
            let lbc = self.shape.local_block_col(k);
            let refs = match self.ucol_map.refs.get(lbc) {
                Some(r) => r.clone(),
                None => Vec::new(),
            };
            let jb_size = self.part.size(k);
            for r in refs {
                let Some(row) = factored.upper.rows.get(r.local_block_row).and_then(|x| x.as_ref())
                else {
                    continue;
                };
                let ik = row.supernode;
                let blk = &row.blocks[r.block_idx];
                let lbr = r.local_block_row;
                let flops = dense::upper_block_update(
                    blk,
                    self.part.last_row(ik),
                    self.part.size(ik),
                    &xk,
                    jb_size,
                    self.lsum.block_mut(lbr),
                    self.nrhs,
                );
                self.stats.solve_flops += flops;
                tracker.bmod[lbr] -= 1;
                if tracker.bmod[lbr] != 0 || self.partition.supernode_tree[ik] != Some(tree) {
                    continue;
                }
                let ikcol = self.shape.owner_col(ik);
                if ikcol == self.comms.mycol {
                    if tracker.brecv[lbr] == 0 {
                        tracker.bmod[lbr] = -1;
                        if let Some(xik) = self.solve_backward_ready(ik)? {
                            work.push((ik, xik));
                            solved += 1;
                        }
                    }
                } else {
                    tracker.bmod[lbr] = -1;
                    let data = self.lsum.block(lbr).to_vec();
                    let dest = self.shape.plane_rank(self.comms.myrow, ikcol);
                    self.send_plane(dest, MsgTag::Lsum, ik, data)?;
                }
            }
        }
        Ok(solved)
    }

    /// Fold, solve and broadcast a supernode whose counters just cleared.
    fn solve_backward_ready(&mut self, k: usize) -> Result<Option<Vec<f64>>, SolveError> {
        let lk = self.shape.local_block_row(k);
        self.fold_lsum_into_x(lk);
        let Some(xk) = self.trsm_backward(k)? else {
            return Ok(None);
        };
        self.bcast_x_backward(k, &xk)?;
        Ok(Some(xk))
    }

    /// Apply the blocks of column `k` into local row sums, restricted to
    /// rows belonging to `tree`. Used by the non-leaf solver and by the
    /// ancestor-update pass; dependency counters are untouched.
    pub(crate) fn apply_upper_updates(
        &mut self,
        k: usize,
        xk: &[f64],
        tree: usize,
    ) -> Result<(), SolveError> {
        let factored = self.factored;
        let lbc = self.shape.local_block_col(k);
        let refs = match self.ucol_map.refs.get(lbc) {
            Some(r) => r.clone(),
            None => Vec::new(),
        };
        let jb_size = self.part.size(k);
        for r in refs {
            let Some(row) = factored.upper.rows.get(r.local_block_row).and_then(|x| x.as_ref())
            else {
                continue;
            };
            let ik = row.supernode;
            if self.partition.supernode_tree[ik] != Some(tree) {
                continue;
            }
            let blk = &row.blocks[r.block_idx];
            let flops = dense::upper_block_update(
                blk,
                self.part.last_row(ik),
                self.part.size(ik),
                xk,
                jb_size,
                self.lsum.block_mut(r.local_block_row),
                self.nrhs,
            );
            self.stats.solve_flops += flops;
        }
        Ok(())
    }

    /// Upper triangular solve on the diagonal block of `k`; returns the
    /// solved values, or `None` if the block is missing.
    fn trsm_backward(&mut self, k: usize) -> Result<Option<Vec<f64>>, SolveError> {
        let lk = self.shape.local_block_row(k);
        let Some(panel) = self.lower_panel(k) else {
            self.skip_block(k, FactorSide::Lower);
            return Ok(None);
        };
        let Some(diag) = panel.blocks.first().filter(|b| b.block_row == k) else {
            self.skip_block(k, FactorSide::Lower);
            return Ok(None);
        };
        let n = self.part.size(k);
        let flops = dense::trsm_upper(
            &panel.values[diag.row_offset..],
            panel.lda,
            n,
            self.x.block_mut(lk),
            n,
            self.nrhs,
        );
        self.stats.solve_flops += flops;
        Ok(Some(self.x.block(lk).to_vec()))
    }

    /// Send `x_k` to every process row holding backward work for column `k`.
    fn bcast_x_backward(&mut self, k: usize, xk: &[f64]) -> Result<(), SolveError> {
        let factored = self.factored;
        let lbc = self.shape.local_block_col(k);
        let Some(recipients) = factored.bsend_rows.get(lbc) else {
            return Ok(());
        };
        for (r, &wants) in recipients.iter().enumerate() {
            if wants && r != self.comms.myrow {
                let dest = self.shape.plane_rank(r, self.comms.mycol);
                self.send_plane(dest, MsgTag::Xk, k, xk.to_vec())?;
            }
        }
        Ok(())
    }
}
