//! # sparsolve
//!
//! Distributed supernodal triangular-solve engine over a 3D process grid.
//!
//! Given the `L` and `U` factors of a sparse LU factorization, distributed
//! block-cyclically over a `nprow x npcol` plane that is replicated `depth`
//! times, [`solve`] performs forward and backward substitution for multiple
//! right-hand sides. The depth dimension partitions the supernodal
//! elimination tree into sub-forests: each layer solves its own leaf forest
//! concurrently with asynchronous message-driven scheduling, and the layers
//! merge pairwise through a binary reduction hierarchy until the root forest
//! is solved on the surviving layer.
//!
//! Transport is pluggable through the [`transport::Comm`] trait. The crate
//! ships [`transport::ChannelFabric`], an in-memory fabric where every
//! process is a thread, which is what the test suite runs on; a backend for
//! a real interconnect implements the same trait.
//!
//! ## Example
//!
//! ```no_run
//! use sparsolve::{solve, SolveInput};
//! # fn run(input: SolveInput<'_>,
//! #        comms: sparsolve::grid::ProcessComms,
//! #        mut b: sparsolve::types::RhsMatrix) -> Result<(), sparsolve::SolveError> {
//! // One call per process; the call is collective across the grid.
//! let stats = solve(&input, &comms, &mut b, 1)?;
//! println!("flops: {}", stats.solve_flops);
//! # Ok(())
//! # }
//! ```

mod backward;
pub mod dense;
pub mod driver;
pub mod error;
pub mod events;
pub mod factor;
pub mod forest;
mod forward;
pub mod grid;
mod redist;
mod reduce3d;
pub mod tracker;
pub mod transport;
pub mod types;
pub mod validation;
pub mod vectors;

pub use driver::{solve, SolveInput};
pub use error::{SolveError, ValidationError};
pub use events::{Direction, FactorSide, SolveEvent};
pub use factor::{FactoredMatrix, LowerFactor, UpperFactor};
pub use forest::{ForestPartition, SubForest};
pub use grid::{GridShape, ProcessComms};
pub use transport::{ChannelFabric, Comm, Message, MsgTag};
pub use types::{Permutation, RhsMatrix, SolveStats, SupernodePartition};
