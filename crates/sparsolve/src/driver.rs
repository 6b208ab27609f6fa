//! Solve driver.
//!
//! [`solve`] runs one triangular solve (`L * U * x = b`) on the calling
//! process. The forward direction walks the reduction hierarchy from the
//! leaf level up, the backward direction walks it back down; at level 0 each
//! layer runs the self-scheduling leaf solver on its own sub-forest, at
//! higher levels the surviving layers run the deterministic non-leaf solver.
//! Between levels, partial row sums move up the depth dimension and solved
//! blocks move back down.
//!
//! The call is collective: every process of the grid must enter `solve` with
//! consistent inputs, the way every rank enters an MPI solve together.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::SolveError;
use crate::events::{Direction, FactorSide, SolveEvent};
use crate::factor::{FactoredMatrix, LowerBlockColumn, UpperColMap};
use crate::forest::ForestPartition;
use crate::grid::{GridShape, ProcessComms};
use crate::tracker::{BackwardTracker, ForwardTracker};
use crate::transport::{Message, MsgTag};
use crate::types::{Permutation, RhsMatrix, SolveStats, SupernodePartition};
use crate::validation;
use crate::vectors::BlockVec;

/// Read-only inputs of one solve, shared by reference with the engine.
pub struct SolveInput<'a> {
    /// Supernode partition of the matrix.
    pub part: &'a SupernodePartition,
    /// Row/column permutations from the factorization.
    pub perm: &'a Permutation,
    /// Elimination-forest partition across layers.
    pub partition: &'a ForestPartition,
    /// This process's slice of the factors.
    pub factored: &'a FactoredMatrix,
    /// Global row boundaries of the `B` distribution over the layer-0 plane:
    /// plane rank `p` owns rows `b_row_starts[p]..b_row_starts[p + 1]`.
    pub b_row_starts: &'a [usize],
}

/// Solve `L * U * x = b` for this process's slice of `b`.
///
/// On success `b` holds the solution in the same distribution, and the
/// returned [`SolveStats`] describe this process's share of the work.
pub fn solve(
    input: &SolveInput<'_>,
    comms: &ProcessComms,
    b: &mut RhsMatrix,
    nrhs: usize,
) -> Result<SolveStats, SolveError> {
    validation::validate(input, comms, b, nrhs)?;

    let mut eng = Engine::new(input, comms, nrhs);
    eng.stats.record(SolveEvent::SolveRequested {
        n: input.part.dim(),
        nrhs,
        nsupers: input.part.num_supernodes(),
        rank: comms.world_rank(),
    });
    info!(
        n = input.part.dim(),
        nrhs,
        rank = comms.world_rank(),
        "triangular solve started"
    );

    let t = Instant::now();
    eng.b_to_x(b, input.perm)?;
    eng.stats.t_redistribute_b = t.elapsed();
    eng.seed_x_across_layers()?;
    comms.world.barrier()?;

    let max_level = eng.shape.max_level();
    let my_trees = input.partition.my_tree_ids(comms.mylayer, max_level);
    let idle = input.partition.my_idle_levels(comms.mylayer, max_level);

    let t_fwd = Instant::now();
    for lvl in 0..max_level {
        let t_lvl = Instant::now();
        if !idle[lvl] {
            if let Some(forest) = input.partition.forest(my_trees[lvl]) {
                let solved = if lvl == 0 {
                    let mut tracker = ForwardTracker::build(
                        forest,
                        input.factored,
                        input.part,
                        &eng.shape,
                        comms.myrow,
                        comms.mycol,
                        comms.row_scope.as_ref(),
                    )?;
                    eng.leaf_forward_solve(forest, my_trees[lvl], &mut tracker)?
                } else {
                    eng.nonleaf_forward_solve(forest)?
                };
                debug!(level = lvl, solved, "forward level done");
                eng.stats.record(SolveEvent::LevelCompleted {
                    direction: Direction::Forward,
                    level: lvl,
                    nodes_solved: solved,
                });
            }
        }
        if lvl + 1 < max_level && eng.active_at(lvl) {
            eng.reduce_lsum_to_ancestors(lvl, max_level)?;
        }
        eng.stats.t_forward_level.push(t_lvl.elapsed());
    }
    eng.stats.t_forward = t_fwd.elapsed();

    // Row sums restart from zero for the backward direction.
    eng.lsum.zero();

    let t_bwd = Instant::now();
    for lvl in (0..max_level).rev() {
        let t_lvl = Instant::now();
        if lvl + 1 < max_level && eng.active_at(lvl) {
            eng.broadcast_xt_down(lvl, max_level)?;
        }
        if !idle[lvl] {
            if let Some(forest) = input.partition.forest(my_trees[lvl]) {
                eng.apply_ancestor_updates(my_trees[lvl])?;
                let solved = if lvl == 0 {
                    let mut tracker = BackwardTracker::build(
                        forest,
                        input.factored,
                        &eng.ucol_map,
                        input.part,
                        &eng.shape,
                        comms.myrow,
                        comms.mycol,
                        comms.row_scope.as_ref(),
                    )?;
                    eng.leaf_backward_solve(forest, my_trees[lvl], &mut tracker)?
                } else {
                    eng.nonleaf_backward_solve(forest, my_trees[lvl])?
                };
                debug!(level = lvl, solved, "backward level done");
                eng.stats.record(SolveEvent::LevelCompleted {
                    direction: Direction::Backward,
                    level: lvl,
                    nodes_solved: solved,
                });
            }
        }
        eng.stats.t_backward_level.push(t_lvl.elapsed());
    }
    eng.stats.t_backward = t_bwd.elapsed();

    comms.world.barrier()?;
    eng.gather_solved_x(max_level)?;

    let t = Instant::now();
    eng.x_to_b(b, input.perm, input.b_row_starts)?;
    eng.stats.t_redistribute_x = t.elapsed();

    Ok(eng.finish())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-solve working state of one process.
///
/// The substitution phases live in sibling modules (`forward`, `backward`,
/// `reduce3d`, `redist`) as further `impl` blocks on this type.
pub(crate) struct Engine<'a> {
    pub(crate) part: &'a SupernodePartition,
    pub(crate) partition: &'a ForestPartition,
    pub(crate) factored: &'a FactoredMatrix,
    pub(crate) ucol_map: UpperColMap,
    pub(crate) comms: &'a ProcessComms,
    pub(crate) shape: GridShape,
    pub(crate) nrhs: usize,
    /// Solution blocks for locally owned block rows.
    pub(crate) x: BlockVec,
    /// Partial row sums for locally owned block rows.
    pub(crate) lsum: BlockVec,
    /// Column-replicated copies of solved blocks, by local block column.
    pub(crate) xt: BlockVec,
    pub(crate) stats: SolveStats,
}

impl<'a> Engine<'a> {
    fn new(input: &SolveInput<'a>, comms: &'a ProcessComms, nrhs: usize) -> Self {
        let shape = comms.shape;
        let ucol_map = UpperColMap::build(
            &input.factored.upper,
            &shape,
            input.part.num_supernodes(),
            comms.mycol,
        );
        Self {
            part: input.part,
            partition: input.partition,
            factored: input.factored,
            ucol_map,
            comms,
            shape,
            nrhs,
            x: BlockVec::for_rows(input.part, &shape, comms.myrow, nrhs),
            lsum: BlockVec::for_rows(input.part, &shape, comms.myrow, nrhs),
            xt: BlockVec::for_cols(input.part, &shape, comms.mycol, nrhs),
            stats: SolveStats::default(),
        }
    }

    fn finish(mut self) -> SolveStats {
        let words_sent = self.stats.data_sent_xy + self.stats.data_sent_z;
        self.stats.record(SolveEvent::SolveCompleted {
            flops: self.stats.solve_flops,
            words_sent,
        });
        info!(
            flops = self.stats.solve_flops,
            words_sent,
            rank = self.comms.world_rank(),
            "triangular solve finished"
        );
        self.stats
    }

    /// True if this layer still participates at hierarchy level `lvl`.
    #[inline]
    pub(crate) fn active_at(&self, lvl: usize) -> bool {
        self.comms.mylayer & ((1usize << lvl) - 1) == 0
    }

    /// Lower panel of supernode `k`, if this process column holds it.
    /// The returned reference outlives the engine borrow.
    pub(crate) fn lower_panel(&self, k: usize) -> Option<&'a LowerBlockColumn> {
        self.factored
            .lower
            .columns
            .get(self.shape.local_block_col(k))
            .and_then(|c| c.as_ref())
    }

    /// Note a structurally missing block: log it and record an event so the
    /// caller can audit skips after the fact.
    pub(crate) fn skip_block(&mut self, k: usize, side: FactorSide) {
        warn!(supernode = k, ?side, "missing factor block, skipping");
        self.stats.record(SolveEvent::BlockSkipped { supernode: k, side });
    }

    /// Point-to-point send within the 2D plane, with volume accounting.
    pub(crate) fn send_plane(
        &mut self,
        dest: usize,
        tag: MsgTag,
        supernode: usize,
        data: Vec<f64>,
    ) -> Result<(), SolveError> {
        let msg = Message { tag, supernode, data };
        self.stats.data_sent_xy += msg.wire_words();
        match tag {
            MsgTag::Xk => self.stats.xk_sent += 1,
            MsgTag::Lsum => self.stats.lsum_sent += 1,
        }
        self.comms.plane.send(dest, msg)
    }

    /// Point-to-point send along the depth dimension.
    pub(crate) fn send_z(
        &mut self,
        dest: usize,
        tag: MsgTag,
        supernode: usize,
        data: Vec<f64>,
    ) -> Result<(), SolveError> {
        let msg = Message { tag, supernode, data };
        self.stats.data_sent_z += msg.wire_words();
        self.comms.z_scope.send(dest, msg)
    }

    /// Blocking receive from a specific layer, with volume accounting.
    pub(crate) fn recv_z(&mut self, src: usize) -> Result<Message, SolveError> {
        let msg = self.comms.z_scope.recv_from(src)?;
        self.stats.data_recv_z += msg.wire_words();
        Ok(msg)
    }
}
