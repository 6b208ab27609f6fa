//! Message transport for the solve engine.
//!
//! The engine never talks to an interconnect directly; all point-to-point
//! and collective traffic goes through the [`Comm`] trait, one handle per
//! communicator scope (world, plane, row, column, depth). The shipped
//! implementation is [`ChannelFabric`], an in-memory fabric built on
//! `crossbeam-channel` where every process is a thread. A backend for a real
//! interconnect implements the same trait without touching the engine.
//!
//! # Wire layout
//!
//! Point-to-point messages are typed ([`Message`]): a tag, the supernode id,
//! and the payload values. There is no positional header word inside the
//! payload; the id travels in the envelope. Accounting still charges one
//! header word per message so volumes match the classic layout.
//!
//! Collectives are sequence-aligned: every rank in a scope executes the same
//! collective calls in the same order, and each call stamps its packets with
//! a per-scope sequence number. Receivers match on `(source, sequence)` and
//! stash early packets, so a rank that races ahead cannot corrupt a
//! neighbour's earlier collective.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::SolveError;
use crate::grid::{GridShape, ProcessComms};

/// How long a blocking receive waits before declaring the fabric dead.
///
/// A healthy solve never waits anywhere near this long; the timeout exists so
/// a bug surfaces as an error instead of a hung test run.
const RECV_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Tag distinguishing the two point-to-point message kinds of the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgTag {
    /// A solved supernode block `x_k`, broadcast down a process column.
    Xk,
    /// A partial row sum, sent along a process row to the diagonal owner.
    Lsum,
}

/// A typed point-to-point message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Kind of payload.
    pub tag: MsgTag,
    /// Supernode this payload belongs to.
    pub supernode: usize,
    /// Column-major payload values (`supernode size x nrhs`).
    pub data: Vec<f64>,
}

impl Message {
    /// Words this message occupies on the wire, including the header word.
    #[inline]
    pub fn wire_words(&self) -> u64 {
        self.data.len() as u64 + 1
    }
}

// ---------------------------------------------------------------------------
// Comm trait
// ---------------------------------------------------------------------------

/// One communicator scope: point-to-point messaging plus the collectives the
/// solve needs. Ranks are scope-local (a process's rank in its row scope is
/// its process column, and so on).
pub trait Comm: Send {
    /// This process's rank within the scope.
    fn rank(&self) -> usize;

    /// Number of processes in the scope.
    fn size(&self) -> usize;

    /// Send a message to `dest` (non-blocking, buffered).
    fn send(&self, dest: usize, msg: Message) -> Result<(), SolveError>;

    /// Blocking receive from any source. Returns the source rank and the
    /// message.
    fn recv(&self) -> Result<(usize, Message), SolveError>;

    /// Blocking receive from a specific source. Messages from other sources
    /// that arrive first are stashed and returned by later receives.
    fn recv_from(&self, src: usize) -> Result<Message, SolveError>;

    /// Synchronize all ranks in the scope.
    fn barrier(&self) -> Result<(), SolveError>;

    /// Element-wise sum-reduce `buf` to `root`. Only the root's buffer is
    /// updated; other ranks' buffers are left untouched.
    fn reduce_sum_f64(&self, buf: &mut [f64], root: usize) -> Result<(), SolveError>;

    /// Element-wise sum over all ranks, result returned on every rank.
    fn allreduce_sum_i64(&self, buf: &[i64]) -> Result<Vec<i64>, SolveError>;

    /// Broadcast `buf` from `root` to all ranks.
    fn bcast_f64(&self, buf: &mut [f64], root: usize) -> Result<(), SolveError>;

    /// Personalized all-to-all: rank `i` sends `ints[j]`/`floats[j]` to rank
    /// `j` and receives one int and one float vector from every rank.
    fn alltoallv(
        &self,
        ints: &[Vec<i64>],
        floats: &[Vec<f64>],
    ) -> Result<(Vec<Vec<i64>>, Vec<Vec<f64>>), SolveError>;
}

// ---------------------------------------------------------------------------
// In-memory fabric
// ---------------------------------------------------------------------------

/// Envelope for point-to-point traffic on the in-memory fabric.
struct Envelope {
    src: usize,
    msg: Message,
}

/// Packet for collective traffic, stamped with the sender and the scope-local
/// collective sequence number.
struct CollPacket {
    src: usize,
    seq: u64,
    ints: Vec<i64>,
    floats: Vec<f64>,
}

/// One scope handle on the in-memory fabric.
///
/// Interior mutability (`RefCell`/`Cell`) keeps the [`Comm`] surface `&self`;
/// each handle is owned by exactly one process thread.
pub struct ChannelComm {
    scope: &'static str,
    rank: usize,
    size: usize,
    data_tx: Vec<Sender<Envelope>>,
    data_rx: Receiver<Envelope>,
    coll_tx: Vec<Sender<CollPacket>>,
    coll_rx: Receiver<CollPacket>,
    stash: RefCell<VecDeque<Envelope>>,
    coll_stash: RefCell<Vec<CollPacket>>,
    seq: Cell<u64>,
}

impl ChannelComm {
    fn next_seq(&self) -> u64 {
        let s = self.seq.get();
        self.seq.set(s + 1);
        s
    }

    fn transport_err(&self, detail: impl Into<String>) -> SolveError {
        SolveError::Transport { scope: self.scope, detail: detail.into() }
    }

    fn send_coll(&self, dest: usize, seq: u64, ints: Vec<i64>, floats: Vec<f64>) -> Result<(), SolveError> {
        self.coll_tx[dest]
            .send(CollPacket { src: self.rank, seq, ints, floats })
            .map_err(|_| self.transport_err(format!("collective peer {dest} disconnected")))
    }

    /// Wait for the collective packet from `src` with sequence `seq`,
    /// stashing any other packets that arrive first.
    fn wait_coll(&self, src: usize, seq: u64) -> Result<CollPacket, SolveError> {
        let mut stash = self.coll_stash.borrow_mut();
        if let Some(pos) = stash.iter().position(|p| p.src == src && p.seq == seq) {
            return Ok(stash.swap_remove(pos));
        }
        loop {
            let pkt = self
                .coll_rx
                .recv_timeout(RECV_TIMEOUT)
                .map_err(|e| self.transport_err(format!("collective recv: {e}")))?;
            if pkt.src == src && pkt.seq == seq {
                return Ok(pkt);
            }
            stash.push(pkt);
        }
    }
}

impl Comm for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, msg: Message) -> Result<(), SolveError> {
        self.data_tx[dest]
            .send(Envelope { src: self.rank, msg })
            .map_err(|_| self.transport_err(format!("peer {dest} disconnected")))
    }

    fn recv(&self) -> Result<(usize, Message), SolveError> {
        if let Some(env) = self.stash.borrow_mut().pop_front() {
            return Ok((env.src, env.msg));
        }
        let env = self
            .data_rx
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|e| self.transport_err(format!("recv: {e}")))?;
        Ok((env.src, env.msg))
    }

    fn recv_from(&self, src: usize) -> Result<Message, SolveError> {
        let mut stash = self.stash.borrow_mut();
        if let Some(pos) = stash.iter().position(|e| e.src == src) {
            // VecDeque::remove preserves order of the rest.
            if let Some(env) = stash.remove(pos) {
                return Ok(env.msg);
            }
        }
        loop {
            let env = self
                .data_rx
                .recv_timeout(RECV_TIMEOUT)
                .map_err(|e| self.transport_err(format!("recv from {src}: {e}")))?;
            if env.src == src {
                return Ok(env.msg);
            }
            stash.push_back(env);
        }
    }

    fn barrier(&self) -> Result<(), SolveError> {
        let seq = self.next_seq();
        if self.size == 1 {
            return Ok(());
        }
        if self.rank == 0 {
            for peer in 1..self.size {
                self.wait_coll(peer, seq)?;
            }
            for peer in 1..self.size {
                self.send_coll(peer, seq, Vec::new(), Vec::new())?;
            }
        } else {
            self.send_coll(0, seq, Vec::new(), Vec::new())?;
            self.wait_coll(0, seq)?;
        }
        Ok(())
    }

    fn reduce_sum_f64(&self, buf: &mut [f64], root: usize) -> Result<(), SolveError> {
        let seq = self.next_seq();
        if self.size == 1 {
            return Ok(());
        }
        if self.rank == root {
            for peer in (0..self.size).filter(|&p| p != root) {
                let pkt = self.wait_coll(peer, seq)?;
                if pkt.floats.len() != buf.len() {
                    return Err(self.transport_err(format!(
                        "reduce length mismatch: {} vs {}",
                        pkt.floats.len(),
                        buf.len()
                    )));
                }
                for (dst, v) in buf.iter_mut().zip(pkt.floats.iter()) {
                    *dst += v;
                }
            }
        } else {
            self.send_coll(root, seq, Vec::new(), buf.to_vec())?;
        }
        Ok(())
    }

    fn allreduce_sum_i64(&self, buf: &[i64]) -> Result<Vec<i64>, SolveError> {
        let seq = self.next_seq();
        let mut acc = buf.to_vec();
        if self.size == 1 {
            return Ok(acc);
        }
        if self.rank == 0 {
            for peer in 1..self.size {
                let pkt = self.wait_coll(peer, seq)?;
                for (dst, v) in acc.iter_mut().zip(pkt.ints.iter()) {
                    *dst += v;
                }
            }
            for peer in 1..self.size {
                self.send_coll(peer, seq, acc.clone(), Vec::new())?;
            }
        } else {
            self.send_coll(0, seq, buf.to_vec(), Vec::new())?;
            acc = self.wait_coll(0, seq)?.ints;
        }
        Ok(acc)
    }

    fn bcast_f64(&self, buf: &mut [f64], root: usize) -> Result<(), SolveError> {
        let seq = self.next_seq();
        if self.size == 1 {
            return Ok(());
        }
        if self.rank == root {
            for peer in (0..self.size).filter(|&p| p != root) {
                self.send_coll(peer, seq, Vec::new(), buf.to_vec())?;
            }
        } else {
            let pkt = self.wait_coll(root, seq)?;
            if pkt.floats.len() != buf.len() {
                return Err(self.transport_err(format!(
                    "bcast length mismatch: {} vs {}",
                    pkt.floats.len(),
                    buf.len()
                )));
            }
            buf.copy_from_slice(&pkt.floats);
        }
        Ok(())
    }

    fn alltoallv(
        &self,
        ints: &[Vec<i64>],
        floats: &[Vec<f64>],
    ) -> Result<(Vec<Vec<i64>>, Vec<Vec<f64>>), SolveError> {
        let seq = self.next_seq();
        for dest in 0..self.size {
            self.send_coll(dest, seq, ints[dest].clone(), floats[dest].clone())?;
        }
        let mut recv_ints = vec![Vec::new(); self.size];
        let mut recv_floats = vec![Vec::new(); self.size];
        for src in 0..self.size {
            let pkt = self.wait_coll(src, seq)?;
            recv_ints[src] = pkt.ints;
            recv_floats[src] = pkt.floats;
        }
        Ok((recv_ints, recv_floats))
    }
}

// ---------------------------------------------------------------------------
// Fabric construction
// ---------------------------------------------------------------------------

/// Builder for the in-memory fabric: constructs all scope handles for every
/// process of a [`GridShape`] at once. The returned bundles are indexed by
/// flat world rank (`layer * nprow * npcol + prow * npcol + pcol`) and are
/// meant to be moved into one thread each.
pub struct ChannelFabric;

impl ChannelFabric {
    /// Build communicator bundles for every process in `shape`.
    pub fn build(shape: GridShape) -> Vec<ProcessComms> {
        let nprow = shape.nprow;
        let npcol = shape.npcol;
        let depth = shape.depth;
        let plane_size = nprow * npcol;
        let nprocs = shape.num_procs();

        let mut world = build_group("world", nprocs);
        let mut planes: Vec<Vec<ChannelComm>> =
            (0..depth).map(|_| build_group("plane", plane_size)).collect();
        let mut rows: Vec<Vec<ChannelComm>> =
            (0..depth * nprow).map(|_| build_group("row", npcol)).collect();
        let mut cols: Vec<Vec<ChannelComm>> =
            (0..depth * npcol).map(|_| build_group("col", nprow)).collect();
        let mut zs: Vec<Vec<ChannelComm>> =
            (0..plane_size).map(|_| build_group("z", depth)).collect();

        let mut bundles = Vec::with_capacity(nprocs);
        // Pop in reverse so remove-from-back keeps indices stable.
        for layer in (0..depth).rev() {
            for prow in (0..nprow).rev() {
                for pcol in (0..npcol).rev() {
                    let bundle = ProcessComms {
                        world: Box::new(world.remove(layer * plane_size + prow * npcol + pcol)),
                        plane: Box::new(planes[layer].remove(prow * npcol + pcol)),
                        row_scope: Box::new(rows[layer * nprow + prow].remove(pcol)),
                        col_scope: Box::new(cols[layer * npcol + pcol].remove(prow)),
                        z_scope: Box::new(zs[prow * npcol + pcol].remove(layer)),
                        shape,
                        myrow: prow,
                        mycol: pcol,
                        mylayer: layer,
                    };
                    bundles.push(bundle);
                }
            }
        }
        bundles.reverse();
        bundles
    }
}

/// Create `n` scope handles wired to each other.
fn build_group(scope: &'static str, n: usize) -> Vec<ChannelComm> {
    let mut data_txs = Vec::with_capacity(n);
    let mut data_rxs = Vec::with_capacity(n);
    let mut coll_txs = Vec::with_capacity(n);
    let mut coll_rxs = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = unbounded::<Envelope>();
        data_txs.push(tx);
        data_rxs.push(rx);
        let (tx, rx) = unbounded::<CollPacket>();
        coll_txs.push(tx);
        coll_rxs.push(rx);
    }
    data_rxs
        .into_iter()
        .zip(coll_rxs)
        .enumerate()
        .map(|(rank, (data_rx, coll_rx))| ChannelComm {
            scope,
            rank,
            size: n,
            data_tx: data_txs.clone(),
            data_rx,
            coll_tx: coll_txs.clone(),
            coll_rx,
            stash: RefCell::new(VecDeque::new()),
            coll_stash: RefCell::new(Vec::new()),
            seq: Cell::new(0),
        })
        .collect()
}
