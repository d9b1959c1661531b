#![allow(clippy::needless_range_loop)]

pub const fn ceil_div_usize(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Computes `ceil(log_2(n))`.
#[must_use]
pub fn log2_ceil(n: usize) -> usize {
    (usize::BITS - n.saturating_sub(1).leading_zeros()) as usize
}

/// Splits a sorted slice around `target`.
///
/// Returns `(p, found)` with `xi[..p] < target <= xi[p..]`. When `found` is
/// true, additionally `xi[p] == target`. `p == xi.len()` means every element
/// is below `target`.
#[inline]
pub fn split_binary_search(target: i64, xi: &[i64]) -> (usize, bool) {
    let mut lo = 0;
    let mut hi = xi.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if xi[mid] < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (lo, lo < xi.len() && xi[lo] == target)
}

/// Replaces `p[0..n]` (counts, where `n = p.len() - 1`) with its exclusive
/// prefix sum and stores the total in `p[n]`. Returns the total.
pub fn cumsum(p: &mut [i64]) -> i64 {
    let n = p.len() - 1;
    let mut total = 0;
    for k in 0..n {
        let c = p[k];
        p[k] = total;
        total += c;
    }
    p[n] = total;
    total
}

/// Partitions the nondecreasing offset array `p` (length `nvec + 1`) into
/// `ntasks` contiguous ranges of vectors with roughly equal `p`-mass.
///
/// Returns `ntasks + 1` boundaries `k0 = 0 <= k1 <= ... <= k_ntasks = nvec`;
/// task `t` owns vectors `boundaries[t]..boundaries[t + 1]`.
pub fn partition_offsets(p: &[i64], ntasks: usize) -> Vec<usize> {
    let nvec = p.len() - 1;
    let total = p[nvec];
    let mut boundaries = Vec::with_capacity(ntasks + 1);
    boundaries.push(0);
    for t in 1..ntasks {
        let target = total * t as i64 / ntasks as i64;
        // First vector whose cumulative offset reaches the target.
        let k = p.partition_point(|&off| off < target);
        boundaries.push(k.min(nvec).max(*boundaries.last().unwrap()));
    }
    boundaries.push(nvec);
    boundaries
}
