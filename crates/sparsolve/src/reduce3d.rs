//! Cross-layer data movement along the depth dimension.
//!
//! After each forward level the layers retire pairwise: the retiring layer
//! of each pair consolidates its pending row sums for every ancestor
//! supernode and ships them to its surviving partner. Before each backward
//! level the movement reverses: layers rejoining the computation receive the
//! column-replicated solutions of every ancestor supernode from their
//! partner. At the boundaries of the solve, the right-hand side is seeded
//! from layer 0 to all layers and the solved blocks are gathered back.
//!
//! Partner arithmetic at level `lvl` pairs layer `l` (with `l` a multiple of
//! `2^(lvl+1)`) with layer `l + 2^lvl`.

use tracing::debug;

use crate::driver::Engine;
use crate::error::SolveError;
use crate::forest::{tree_id, tree_parent};
use crate::transport::MsgTag;

impl Engine<'_> {
    /// Broadcast the seeded right-hand-side blocks from layer 0 to every
    /// layer, per diagonal position.
    pub(crate) fn seed_x_across_layers(&mut self) -> Result<(), SolveError> {
        if self.shape.depth == 1 {
            return Ok(());
        }
        for k in 0..self.part.num_supernodes() {
            if !self.comms.owns_diag(k) {
                continue;
            }
            let lk = self.shape.local_block_row(k);
            let mut buf = self.x.block(lk).to_vec();
            self.comms.z_scope.bcast_f64(&mut buf, 0)?;
            if self.comms.mylayer == 0 {
                self.stats.data_sent_z += (buf.len() * (self.shape.depth - 1)) as u64;
            } else {
                self.stats.data_recv_z += buf.len() as u64;
                self.x.block_mut(lk).copy_from_slice(&buf);
            }
        }
        Ok(())
    }

    /// Consolidate and ship the pending row sums of every ancestor
    /// supernode from the retiring layer of each pair to its surviving
    /// partner, after the forward solve of `lvl` finished.
    pub(crate) fn reduce_lsum_to_ancestors(
        &mut self,
        lvl: usize,
        max_level: usize,
    ) -> Result<(), SolveError> {
        let bit = 1usize << lvl;
        let span = bit << 1;
        let surviving = self.comms.mylayer % span == 0;
        let partner = if surviving {
            self.comms.mylayer + bit
        } else {
            self.comms.mylayer - bit
        };
        debug!(level = lvl, surviving, partner, "row-sum hand-off");

        for alvl in (lvl + 1)..max_level {
            let t = tree_id(alvl, self.comms.mylayer, max_level);
            let Some(forest) = self.partition.forest(t) else { continue };
            // Iterate a private copy of the node list so the forest borrow
            // does not pin `self`.
            let nodes: Vec<usize> = forest.nodes.clone();
            for k in nodes {
                let krow = self.shape.owner_row(k);
                let kcol = self.shape.owner_col(k);
                if self.comms.myrow != krow {
                    continue;
                }
                let lk = self.shape.local_block_row(k);
                if surviving {
                    if self.comms.mycol == kcol {
                        let msg = self.recv_z(partner)?;
                        self.lsum.add_into(lk, &msg.data);
                    }
                } else {
                    let mut buf = self.lsum.block(lk).to_vec();
                    self.comms.row_scope.reduce_sum_f64(&mut buf, kcol)?;
                    if self.comms.mycol == kcol {
                        self.send_z(partner, MsgTag::Lsum, k, buf)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Ship the column-replicated ancestor solutions from the surviving
    /// layer of each pair to the layer rejoining at `lvl`, before its
    /// backward solve starts.
    pub(crate) fn broadcast_xt_down(&mut self, lvl: usize, max_level: usize) -> Result<(), SolveError> {
        let bit = 1usize << lvl;
        let span = bit << 1;
        let sending = self.comms.mylayer % span == 0;
        let partner = if sending {
            self.comms.mylayer + bit
        } else {
            self.comms.mylayer - bit
        };
        debug!(level = lvl, sending, partner, "ancestor solution hand-off");

        for alvl in (lvl + 1)..max_level {
            let t = tree_id(alvl, self.comms.mylayer, max_level);
            let Some(forest) = self.partition.forest(t) else { continue };
            let nodes: Vec<usize> = forest.nodes.clone();
            for k in nodes {
                if self.shape.owner_col(k) != self.comms.mycol {
                    continue;
                }
                let ltc = self.shape.local_block_col(k);
                if sending {
                    let data = self.xt.block(ltc).to_vec();
                    self.send_z(partner, MsgTag::Xk, k, data)?;
                } else {
                    let msg = self.recv_z(partner)?;
                    self.xt.block_mut(ltc).copy_from_slice(&msg.data);
                }
            }
        }
        Ok(())
    }

    /// Apply the solved ancestor columns to the rows of `tree`, walking the
    /// parent chain from the nearest ancestor to the root.
    pub(crate) fn apply_ancestor_updates(&mut self, tree: usize) -> Result<(), SolveError> {
        let mut chain = Vec::new();
        let mut t = tree;
        while let Some(p) = tree_parent(t) {
            chain.push(p);
            t = p;
        }
        for a in chain {
            let Some(forest) = self.partition.forest(a) else { continue };
            let nodes: Vec<usize> = forest.nodes.clone();
            for jb in nodes {
                if self.shape.owner_col(jb) != self.comms.mycol {
                    continue;
                }
                let ltc = self.shape.local_block_col(jb);
                let xk = self.xt.block(ltc).to_vec();
                self.apply_upper_updates(jb, &xk, tree)?;
            }
        }
        Ok(())
    }

    /// Gather the solved diagonal blocks of every off-layer tree back to
    /// layer 0, where the solution is redistributed to the caller's layout.
    pub(crate) fn gather_solved_x(&mut self, max_level: usize) -> Result<(), SolveError> {
        if self.shape.depth == 1 {
            return Ok(());
        }
        for alvl in 0..max_level {
            let first = (1usize << (max_level - 1 - alvl)) - 1;
            let count = 1usize << (max_level - 1 - alvl);
            for t in first..first + count {
                // Lowest layer that worked this tree.
                let home_layer = (t - first) << alvl;
                if home_layer == 0 {
                    continue;
                }
                let Some(forest) = self.partition.forest(t) else { continue };
                let nodes: Vec<usize> = forest.nodes.clone();
                for k in nodes {
                    if !self.comms.owns_diag(k) {
                        continue;
                    }
                    let lk = self.shape.local_block_row(k);
                    if self.comms.mylayer == home_layer {
                        let data = self.x.block(lk).to_vec();
                        self.send_z(0, MsgTag::Xk, k, data)?;
                    } else if self.comms.mylayer == 0 {
                        let msg = self.recv_z(home_layer)?;
                        self.x.block_mut(lk).copy_from_slice(&msg.data);
                    }
                }
            }
        }
        Ok(())
    }
}
