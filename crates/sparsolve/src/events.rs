//! Structured event records emitted during a solve.
//!
//! Events are serializable so that a host application can ship them to a
//! log pipeline or assert on them in tests. They complement the `tracing`
//! output: tracing is for humans, events are for machines.

use serde::{Deserialize, Serialize};

/// Solve direction tag used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Forward substitution (`L * y = b`).
    Forward,
    /// Backward substitution (`U * x = y`).
    Backward,
}

/// Which factor store a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorSide {
    /// The lower-triangular block-column store.
    Lower,
    /// The upper-triangular block-row store.
    Upper,
}

/// Events recorded into [`crate::types::SolveStats::events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SolveEvent {
    /// A solve was requested on this process.
    SolveRequested {
        /// Matrix dimension.
        n: usize,
        /// Number of right-hand sides.
        nrhs: usize,
        /// Number of supernodes.
        nsupers: usize,
        /// Flat rank of this process in the 3D grid.
        rank: usize,
    },
    /// A forest level of one direction finished on this process.
    LevelCompleted {
        /// Direction of the substitution.
        direction: Direction,
        /// Level in the reduction hierarchy (0 = leaf).
        level: usize,
        /// Supernodes solved locally at this level.
        nodes_solved: usize,
    },
    /// A structurally expected block was absent and skipped.
    ///
    /// The engine tolerates missing blocks so a malformed structure cannot
    /// stall a collective phase, but every skip is recorded here so callers
    /// can audit the log and treat skips as errors.
    BlockSkipped {
        /// Supernode whose block was missing.
        supernode: usize,
        /// Which store was missing it.
        side: FactorSide,
    },
    /// The solve finished on this process.
    SolveCompleted {
        /// Total dense-kernel flops on this process.
        flops: u64,
        /// Total words sent (2D plane plus depth dimension).
        words_sent: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let ev = SolveEvent::LevelCompleted {
            direction: Direction::Forward,
            level: 1,
            nodes_solved: 3,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"level_completed\""));
        assert!(json.contains("\"direction\":\"forward\""));
    }

    #[test]
    fn block_skipped_roundtrip() {
        let ev = SolveEvent::BlockSkipped { supernode: 7, side: FactorSide::Lower };
        let json = serde_json::to_string(&ev).unwrap();
        let back: SolveEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
