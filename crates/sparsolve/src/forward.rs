//! Forward substitution (`L * y = b'`).
//!
//! At level 0 every layer runs [`Engine::leaf_forward_solve`] on its own
//! sub-forest: a self-scheduling loop that seeds the ready diagonal blocks,
//! then consumes `Xk` and `Lsum` messages from any source until the expected
//! counts are exhausted, cascading newly solvable supernodes through an
//! explicit worklist. At higher levels [`Engine::nonleaf_forward_solve`]
//! walks the forest in topological order with collective reductions, since
//! every surviving layer processes the same nodes in the same order.
//!
//! Update direction: applying a solved `x_k` *subtracts* `L(:, k) * x_k`
//! into the pending row sums, and a diagonal solve folds the row sum into
//! `x` just before the triangular kernel runs.

use tracing::trace;

use crate::dense;
use crate::driver::Engine;
use crate::error::SolveError;
use crate::events::FactorSide;
use crate::factor::{LowerBlock, LowerBlockColumn};
use crate::forest::SubForest;
use crate::tracker::ForwardTracker;
use crate::transport::MsgTag;

impl Engine<'_> {
    /// Self-scheduling forward solve of one leaf forest. Returns the number
    /// of supernodes solved on this process.
    pub(crate) fn leaf_forward_solve(
        &mut self,
        forest: &SubForest,
        tree: usize,
        tracker: &mut ForwardTracker,
    ) -> Result<usize, SolveError> {
        let mut solved = 0usize;

        // Seed: diagonal-owned nodes with nothing pending anywhere.
        let ready: Vec<usize> = forest
            .nodes
            .iter()
            .copied()
            .filter(|&k| self.comms.owns_diag(k))
            .filter(|&k| {
                let lk = self.shape.local_block_row(k);
                tracker.fmod[lk] == 0 && tracker.frecv[lk] == 0
            })
            .collect();
        debug_assert_eq!(ready.len(), tracker.nleaf);
        for k in ready {
            solved += self.solve_forward_diag(k, tree, tracker)?;
        }

        // Consume messages until every expected one has arrived. Work is
        // driven entirely by what shows up; no ordering is assumed beyond
        // the dependency counters.
        while tracker.nfrecvx > 0 || tracker.nfrecvmod > 0 {
            let (src, msg) = self.comms.plane.recv()?;
            self.stats.data_recv_xy += msg.wire_words();
            match msg.tag {
                MsgTag::Xk => {
                    tracker.nfrecvx -= 1;
                    self.stats.xk_received += 1;
                    trace!(supernode = msg.supernode, src, "xk received");
                    solved += self.forward_cascade(msg.supernode, msg.data, tree, tracker)?;
                }
                MsgTag::Lsum => {
                    tracker.nfrecvmod -= 1;
                    self.stats.lsum_received += 1;
                    trace!(supernode = msg.supernode, src, "row sum received");
                    let k = msg.supernode;
                    let lk = self.shape.local_block_row(k);
                    self.x.add_into(lk, &msg.data);
                    tracker.frecv[lk] -= 1;
                    if tracker.frecv[lk] == 0 && tracker.fmod[lk] == 0 {
                        solved += self.solve_forward_diag(k, tree, tracker)?;
                    }
                }
            }
        }

        // Every expected message is in; the plane barrier closes the leaf
        // phase before row sums move up the depth dimension.
        self.comms.plane.barrier()?;
        Ok(solved)
    }

    /// Deterministic forward solve of a non-leaf forest, in topological
    /// order with row-scope reductions and column-scope broadcasts.
    pub(crate) fn nonleaf_forward_solve(&mut self, forest: &SubForest) -> Result<usize, SolveError> {
        let mut solved = 0usize;
        for t in 0..forest.topo.num_levels {
            for &k in forest.level_nodes(t) {
                let krow = self.shape.owner_row(k);
                let kcol = self.shape.owner_col(k);
                if self.comms.myrow == krow {
                    let lk = self.shape.local_block_row(k);
                    let mut buf = self.lsum.block(lk).to_vec();
                    self.comms.row_scope.reduce_sum_f64(&mut buf, kcol)?;
                    if self.comms.mycol == kcol {
                        self.x.add_into(lk, &buf);
                        if self.trsm_forward(k)?.is_some() {
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
                    self.apply_lower_updates(k, &buf)?;
                }
            }
        }
        Ok(solved)
    }

    /// Solve the diagonal block of `k`, broadcast the result down the
    /// process column, and cascade the local updates it unlocks.
    fn solve_forward_diag(
        &mut self,
        k: usize,
        tree: usize,
        tracker: &mut ForwardTracker,
    ) -> Result<usize, SolveError> {
        let lk = self.shape.local_block_row(k);
        tracker.fmod[lk] = -1;
        self.fold_lsum_into_x(lk);
        let Some(xk) = self.trsm_forward(k)? else {
            return Ok(0);
        };
        self.bcast_x_forward(k, &xk)?;
        let cascaded = self.forward_cascade(k, xk, tree, tracker)?;
        Ok(1 + cascaded)
    }

    /// Apply a solved block through the local `L` structure, following the
    /// chain of supernodes it completes via an explicit worklist.
    fn forward_cascade(
        &mut self,
        k0: usize,
        xk0: Vec<f64>,
        tree: usize,
        tracker: &mut ForwardTracker,
    ) -> Result<usize, SolveError> {
        let mut solved = 0usize;
        let mut work = vec![(k0, xk0)];
        while let Some((k, xk)) = work.pop() {
            let Some(panel) = self.lower_panel(k) else {
                self.skip_block(k, FactorSide::Lower);
                continue;
            };
            let knsupc = self.part.size(k);
            for blk in &panel.blocks {
                if blk.block_row == k {
                    continue;
                }
                let ik = blk.block_row;
                let lbr = self.shape.local_block_row(ik);
                self.apply_lower_block(panel, blk, &xk, knsupc, lbr);
                tracker.fmod[lbr] -= 1;
                if tracker.fmod[lbr] != 0 || self.partition.supernode_tree[ik] != Some(tree) {
                    continue;
                }
                let ikcol = self.shape.owner_col(ik);
                if ikcol == self.comms.mycol {
                    // Diagonal owner: solvable once the remote sums are in.
                    if tracker.frecv[lbr] == 0 {
                        tracker.fmod[lbr] = -1;
                        self.fold_lsum_into_x(lbr);
                        if let Some(xik) = self.trsm_forward(ik)? {
                            self.bcast_x_forward(ik, &xik)?;
                            work.push((ik, xik));
                            solved += 1;
                        }
                    }
                } else {
                    // Local contributions complete: ship the row sum to the
                    // diagonal column.
                    tracker.fmod[lbr] = -1;
                    let data = self.lsum.block(lbr).to_vec();
                    let dest = self.shape.plane_rank(self.comms.myrow, ikcol);
                    self.send_plane(dest, MsgTag::Lsum, ik, data)?;
                }
            }
        }
        Ok(solved)
    }

    /// Apply every off-diagonal block of column `k` into the local row sums,
    /// without touching dependency counters.
    pub(crate) fn apply_lower_updates(&mut self, k: usize, xk: &[f64]) -> Result<(), SolveError> {
        let Some(panel) = self.lower_panel(k) else {
            self.skip_block(k, FactorSide::Lower);
            return Ok(());
        };
        let knsupc = self.part.size(k);
        for blk in &panel.blocks {
            if blk.block_row == k {
                continue;
            }
            let lbr = self.shape.local_block_row(blk.block_row);
            self.apply_lower_block(panel, blk, xk, knsupc, lbr);
        }
        Ok(())
    }

    /// `lsum_ik -= L(ik, k) * x_k`, scattering through the block's row list.
    fn apply_lower_block(
        &mut self,
        panel: &LowerBlockColumn,
        blk: &LowerBlock,
        xk: &[f64],
        knsupc: usize,
        lbr: usize,
    ) {
        let nrhs = self.nrhs;
        let m = blk.nrows();
        let mut temp = vec![0.0; m * nrhs];
        let flops = dense::gemm_minus(
            &panel.values,
            panel.lda,
            blk.row_offset,
            m,
            knsupc,
            xk,
            knsupc,
            &mut temp,
            m,
            nrhs,
        );
        self.stats.solve_flops += flops;
        let first = self.part.first_row(blk.block_row);
        let iksz = self.part.size(blk.block_row);
        let lblock = self.lsum.block_mut(lbr);
        for j in 0..nrhs {
            for (r, &grow) in blk.rows.iter().enumerate() {
                lblock[grow - first + j * iksz] += temp[r + j * m];
            }
        }
    }

    /// Add the accumulated local row sum into `x` before a diagonal solve.
    pub(crate) fn fold_lsum_into_x(&mut self, lbr: usize) {
        let sum = self.lsum.block(lbr).to_vec();
        self.x.add_into(lbr, &sum);
    }

    /// Unit-lower triangular solve on the diagonal block of `k`; returns the
    /// solved values, or `None` if the block is missing.
    pub(crate) fn trsm_forward(&mut self, k: usize) -> Result<Option<Vec<f64>>, SolveError> {
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
        let flops = dense::trsm_lower_unit(
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

    /// Send `x_k` to every process row that holds forward work for column
    /// `k`.
    fn bcast_x_forward(&mut self, k: usize, xk: &[f64]) -> Result<(), SolveError> {
        let factored = self.factored;
        let lbc = self.shape.local_block_col(k);
        let Some(recipients) = factored.fsend_rows.get(lbc) else {
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
