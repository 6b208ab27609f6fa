//! Dense kernels of the supernodal solve.
//!
//! All panels are column-major. The diagonal block of a supernode stores the
//! strictly-lower part of `L` (unit diagonal implied) together with the
//! upper part of `U` including the diagonal, so both triangular solves read
//! the same block. Kernels return the flop count they performed.

use crate::factor::UpperBlock;

/// Solve `L * y = b` in place against the unit-lower triangle of a diagonal
/// block. `x` is `n x nrhs` with leading dimension `ldx`.
pub fn trsm_lower_unit(diag: &[f64], lda: usize, n: usize, x: &mut [f64], ldx: usize, nrhs: usize) -> u64 {
    for j in 0..nrhs {
        for c in 0..n {
            let xc = x[c + j * ldx];
            for r in (c + 1)..n {
                x[r + j * ldx] -= diag[r + c * lda] * xc;
            }
        }
    }
    (n * n.saturating_sub(1) * nrhs) as u64
}

/// Solve `U * x = y` in place against the upper triangle (diagonal included)
/// of a diagonal block.
pub fn trsm_upper(diag: &[f64], lda: usize, n: usize, x: &mut [f64], ldx: usize, nrhs: usize) -> u64 {
    for j in 0..nrhs {
        for c in (0..n).rev() {
            let xc = x[c + j * ldx] / diag[c + c * lda];
            x[c + j * ldx] = xc;
            for r in 0..c {
                x[r + j * ldx] -= diag[r + c * lda] * xc;
            }
        }
    }
    (n * (n + 1) * nrhs) as u64
}

/// `y -= A * x` for a packed panel slice.
///
/// `A` is the `m x k` slice of a column-major panel starting at packed row
/// `row_offset` (leading dimension `lda`); `x` is `k x nrhs` with leading
/// dimension `ldx`, `y` is `m x nrhs` with leading dimension `ldy`.
pub fn gemm_minus(
    a: &[f64],
    lda: usize,
    row_offset: usize,
    m: usize,
    k: usize,
    x: &[f64],
    ldx: usize,
    y: &mut [f64],
    ldy: usize,
    nrhs: usize,
) -> u64 {
    for j in 0..nrhs {
        for c in 0..k {
            let xc = x[c + j * ldx];
            if xc == 0.0 {
                continue;
            }
            let col = &a[row_offset + c * lda..row_offset + c * lda + m];
            for (r, av) in col.iter().enumerate() {
                y[r + j * ldy] -= av * xc;
            }
        }
    }
    (2 * m * k * nrhs) as u64
}

/// Tallest column segment of an upper block targeting a row supernode ending
/// at global row `k_end` (exclusive). Zero means the block is structurally
/// empty.
pub fn upper_block_ldu(blk: &UpperBlock, k_end: usize) -> usize {
    blk.col_first_nz.iter().map(|&fnz| k_end - fnz).max().unwrap_or(0)
}

/// Apply one upper block to a local row sum: `lsum_k -= U(k, jb) * x_jb`.
///
/// Segments are bottom-aligned: the packed update has height `ldu` (the
/// tallest segment) and lands in the last `ldu` rows of the `knsupc x nrhs`
/// target block. Columns with empty segments are skipped entirely, so the
/// inner product only touches structurally active columns.
pub fn upper_block_update(
    blk: &UpperBlock,
    k_end: usize,
    knsupc: usize,
    xj: &[f64],
    jb_size: usize,
    lsum: &mut [f64],
    nrhs: usize,
) -> u64 {
    let ldu = upper_block_ldu(blk, k_end);
    if ldu == 0 {
        return 0;
    }
    let base = knsupc - ldu;
    let mut flops = 0u64;
    let mut off = 0usize;
    for (col, &fnz) in blk.col_first_nz.iter().enumerate() {
        let seg = k_end - fnz;
        if seg == 0 {
            continue;
        }
        let top = ldu - seg;
        for j in 0..nrhs {
            let xc = xj[col + j * jb_size];
            if xc != 0.0 {
                for r in 0..seg {
                    lsum[base + top + r + j * knsupc] -= blk.values[off + r] * xc;
                }
            }
        }
        flops += (2 * seg * nrhs) as u64;
        off += seg;
    }
    flops
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lower_unit_solve() {
        // L = [[1, 0], [2, 1]] stored in a dense 2x2 block (upper half is U).
        let diag = vec![9.0, 2.0, 9.0, 9.0];
        let mut x = vec![1.0, 4.0];
        trsm_lower_unit(&diag, 2, 2, &mut x, 2, 1);
        assert_relative_eq!(x[0], 1.0);
        assert_relative_eq!(x[1], 2.0);
    }

    #[test]
    fn upper_solve() {
        // U = [[2, 1], [0, 4]].
        let diag = vec![2.0, 7.0, 1.0, 4.0];
        let mut x = vec![3.0, 8.0];
        trsm_upper(&diag, 2, 2, &mut x, 2, 1);
        assert_relative_eq!(x[1], 2.0);
        assert_relative_eq!(x[0], 0.5);
    }

    #[test]
    fn gemm_subtracts_product() {
        // A = [[1, 2], [3, 4]], x = [1, 1], y starts at [10, 10].
        let a = vec![1.0, 3.0, 2.0, 4.0];
        let mut y = vec![10.0, 10.0];
        let flops = gemm_minus(&a, 2, 0, 2, 2, &[1.0, 1.0], 2, &mut y, 2, 1);
        assert_relative_eq!(y[0], 7.0);
        assert_relative_eq!(y[1], 3.0);
        assert_eq!(flops, 8);
    }

    #[test]
    fn upper_update_bottom_aligned() {
        // Row supernode k covers rows 2..5 (knsupc = 3), block column jb has
        // 2 columns. Column 0 segment starts at row 3 (len 2), column 1 is
        // empty.
        let blk = UpperBlock {
            block_col: 9,
            col_first_nz: vec![3, 5],
            values: vec![2.0, 3.0],
        };
        let xj = vec![1.0, 100.0]; // jb_size = 2, nrhs = 1
        let mut lsum = vec![0.0; 3];
        let flops = upper_block_update(&blk, 5, 3, &xj, 2, &mut lsum, 1);
        assert_relative_eq!(lsum[0], 0.0);
        assert_relative_eq!(lsum[1], -2.0);
        assert_relative_eq!(lsum[2], -3.0);
        assert_eq!(flops, 4);
    }
}
