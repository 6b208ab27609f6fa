//! Eager input validation.
//!
//! Every check runs before any computation or communication, so a bad input
//! surfaces as a clear [`ValidationError`] on every process instead of a
//! stalled collective halfway through the solve.

use crate::driver::SolveInput;
use crate::error::{SolveError, ValidationError};
use crate::grid::ProcessComms;
use crate::types::RhsMatrix;

/// Validate one process's view of the solve inputs.
pub fn validate(
    input: &SolveInput<'_>,
    comms: &ProcessComms,
    b: &RhsMatrix,
    nrhs: usize,
) -> Result<(), SolveError> {
    check_grid(comms)?;
    check_nrhs(nrhs)?;
    check_partition_boundaries(input)?;
    check_permutations(input)?;
    check_forests(input, comms)?;
    check_rhs(input, comms, b, nrhs)?;
    Ok(())
}

fn check_grid(comms: &ProcessComms) -> Result<(), ValidationError> {
    let shape = comms.shape;
    if shape.nprow == 0 || shape.npcol == 0 || shape.depth == 0 {
        return Err(ValidationError::ParameterOutOfRange {
            name: "grid shape".into(),
            value: format!("{} x {} x {}", shape.nprow, shape.npcol, shape.depth),
            expected: "all dimensions >= 1".into(),
        });
    }
    if !shape.depth.is_power_of_two() {
        return Err(ValidationError::DepthNotPowerOfTwo { depth: shape.depth });
    }
    Ok(())
}

fn check_nrhs(nrhs: usize) -> Result<(), ValidationError> {
    if nrhs == 0 {
        return Err(ValidationError::ParameterOutOfRange {
            name: "nrhs".into(),
            value: "0".into(),
            expected: ">= 1".into(),
        });
    }
    Ok(())
}

fn check_partition_boundaries(input: &SolveInput<'_>) -> Result<(), ValidationError> {
    let part = input.part;
    if part.xsup.is_empty() || part.xsup[0] != 0 {
        return Err(ValidationError::NonMonotonicBoundaries { position: 0 });
    }
    for i in 1..part.xsup.len() {
        if part.xsup[i] <= part.xsup[i - 1] {
            return Err(ValidationError::NonMonotonicBoundaries { position: i });
        }
    }
    let n = part.dim();
    if part.supno.len() != n {
        return Err(ValidationError::DimensionMismatch(format!(
            "supno has {} entries for dimension {}",
            part.supno.len(),
            n
        )));
    }
    for k in 0..part.num_supernodes() {
        if part.supno[part.first_row(k)] != k {
            return Err(ValidationError::DimensionMismatch(format!(
                "supno disagrees with boundaries at supernode {k}"
            )));
        }
    }
    Ok(())
}

fn check_permutations(input: &SolveInput<'_>) -> Result<(), ValidationError> {
    let n = input.part.dim();
    for (name, p) in [("perm_r", &input.perm.perm_r), ("perm_c", &input.perm.perm_c)] {
        if p.len() != n {
            return Err(ValidationError::DimensionMismatch(format!(
                "{name} has {} entries for dimension {n}",
                p.len()
            )));
        }
        let mut seen = vec![false; n];
        for &v in p {
            if v >= n || seen[v] {
                return Err(ValidationError::ParameterOutOfRange {
                    name: name.into(),
                    value: v.to_string(),
                    expected: format!("a permutation of 0..{n}"),
                });
            }
            seen[v] = true;
        }
    }
    Ok(())
}

fn check_forests(input: &SolveInput<'_>, comms: &ProcessComms) -> Result<(), ValidationError> {
    let nsupers = input.part.num_supernodes();
    let expected_trees = 2 * comms.shape.depth - 1;
    if input.partition.forests.len() != expected_trees {
        return Err(ValidationError::DimensionMismatch(format!(
            "forest partition has {} trees for depth {} (expected {})",
            input.partition.forests.len(),
            comms.shape.depth,
            expected_trees
        )));
    }
    if input.partition.supernode_tree.len() != nsupers {
        return Err(ValidationError::DimensionMismatch(format!(
            "supernode-tree map has {} entries for {} supernodes",
            input.partition.supernode_tree.len(),
            nsupers
        )));
    }
    for (k, t) in input.partition.supernode_tree.iter().enumerate() {
        if let Some(t) = t {
            if *t >= expected_trees {
                return Err(ValidationError::ParameterOutOfRange {
                    name: format!("supernode_tree[{k}]"),
                    value: t.to_string(),
                    expected: format!("< {expected_trees}"),
                });
            }
        }
    }
    Ok(())
}

fn check_rhs(
    input: &SolveInput<'_>,
    comms: &ProcessComms,
    b: &RhsMatrix,
    nrhs: usize,
) -> Result<(), ValidationError> {
    let n = input.part.dim();
    if b.ldb < b.m_loc.max(1) {
        return Err(ValidationError::DimensionMismatch(format!(
            "leading dimension {} below local row count {}",
            b.ldb, b.m_loc
        )));
    }
    if b.m_loc > 0 && b.values.len() < b.ldb * nrhs {
        return Err(ValidationError::DimensionMismatch(format!(
            "rhs buffer holds {} values, needs at least {}",
            b.values.len(),
            b.ldb * nrhs
        )));
    }
    for i in 0..b.m_loc {
        for j in 0..nrhs {
            if !b.get(i, j).is_finite() {
                return Err(ValidationError::NonFiniteValue(format!(
                    "rhs entry at local row {i}, column {j}"
                )));
            }
        }
    }

    let starts = input.b_row_starts;
    let plane_size = comms.shape.nprow * comms.shape.npcol;
    if starts.len() != plane_size + 1 {
        return Err(ValidationError::DimensionMismatch(format!(
            "row-start table has {} entries for plane size {plane_size}",
            starts.len()
        )));
    }
    if starts[0] != 0 || starts[plane_size] != n {
        return Err(ValidationError::DimensionMismatch(format!(
            "row-start table spans {}..{} for dimension {n}",
            starts[0], starts[plane_size]
        )));
    }
    for i in 1..starts.len() {
        if starts[i] < starts[i - 1] {
            return Err(ValidationError::NonMonotonicBoundaries { position: i });
        }
    }
    if comms.mylayer == 0 {
        let prank = comms.shape.plane_rank(comms.myrow, comms.mycol);
        if b.fst_row != starts[prank] || b.m_loc != starts[prank + 1] - starts[prank] {
            return Err(ValidationError::DimensionMismatch(format!(
                "local rhs slice {}..{} disagrees with row-start table {}..{}",
                b.fst_row,
                b.fst_row + b.m_loc,
                starts[prank],
                starts[prank + 1]
            )));
        }
    }
    Ok(())
}
