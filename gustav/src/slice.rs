//! Work-balanced splitting of paired vector slices.
//!
//! `A(:,kA)` and `B(:,kB)` are two long vectors about to be combined
//! entry-wise, and the work must be cut into tasks of roughly equal cost.
//! `slice_vector` finds a row `i` so that the tail work
//! `nnz(A(i:end,kA)) + nnz(B(i:end,kB))` lands within 0.01% of
//! `target_work`, by binary search on `i` with an inner split search per
//! probe. Cost is `O(log(vlen) * (log(anz) + log(bnz)))`.
//!
//! The mask position is located once after the split is chosen; mask
//! entries do not count toward the balance.

use gustav_util::split_binary_search;

/// Where a subtask starts: row `i`, and the positions of the first entry
/// `>= i` in each slice (`-1` for an empty slice).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorSlice {
    pub i: i64,
    pub p_m: i64,
    pub p_a: i64,
    pub p_b: i64,
}

/// Splits `A(:,kA)`, `B(:,kB)` and optionally `M(:,kM)` at a row `i` whose
/// tail work approximates `target_work`.
///
/// `ai[pa_start..pa_end]` holds the (sorted) indices of `A(:,kA)`, and
/// likewise for `bi` and `mi`; the slices may be empty. The function is
/// pure and allocation-free.
#[allow(clippy::too_many_arguments)]
pub fn slice_vector(
    mi: Option<&[i64]>,
    pm_start: i64,
    pm_end: i64,
    ai: &[i64],
    pa_start: i64,
    pa_end: i64,
    bi: &[i64],
    pb_start: i64,
    pb_end: i64,
    vlen: i64,
    target_work: f64,
) -> VectorSlice {
    let aknz = pa_end - pa_start;
    let bknz = pb_end - pb_start;
    let mknz = pm_end - pm_start; // zero when M is absent

    let a_empty = aknz == 0;
    let b_empty = bknz == 0;
    let m_empty = mknz == 0;

    let mut i: i64 = 0;
    let mut p_a = if a_empty { -1 } else { pa_start };
    let mut p_b = if b_empty { -1 } else { pb_start };

    // Search for the split row in ileft..=iright.
    let mut ileft: i64 = 0;
    let mut iright: i64 = vlen - 1;

    while ileft < iright {
        i = (ileft + iright) / 2;

        // Find where i appears in A(:,kA).
        if a_empty {
            p_a = -1;
        } else if aknz == vlen {
            // Dense: entry for row i sits exactly i entries in.
            p_a = pa_start + i;
            debug_assert_eq!(ai[p_a as usize], i);
        } else {
            let (off, _) = split_binary_search(i, &ai[pa_start as usize..pa_end as usize]);
            p_a = pa_start + off as i64;
        }
        debug_assert!(p_a <= pa_start || p_a >= pa_end || ai[p_a as usize - 1] < i);
        debug_assert!(p_a < pa_start || p_a >= pa_end || ai[p_a as usize] >= i);

        // Find where i appears in B(:,kB).
        if b_empty {
            p_b = -1;
        } else if bknz == vlen {
            p_b = pb_start + i;
            debug_assert_eq!(bi[p_b as usize], i);
        } else {
            let (off, _) = split_binary_search(i, &bi[pb_start as usize..pb_end as usize]);
            p_b = pb_start + off as i64;
        }
        debug_assert!(p_b <= pb_start || p_b >= pb_end || bi[p_b as usize - 1] < i);
        debug_assert!(p_b < pb_start || p_b >= pb_end || bi[p_b as usize] >= i);

        // Tail work if the subtask starts at row i.
        let work = (if a_empty { 0 } else { pa_end - p_a }
            + if b_empty { 0 } else { pb_end - p_b }) as f64;

        if work < 0.9999 * target_work {
            // Too little tail work: i is too high.
            iright = i;
        } else if work > 1.0001 * target_work {
            // Too much: i is too low.
            ileft = i + 1;
        } else {
            break;
        }
    }

    // Locate the mask once, at the chosen split.
    let p_m = if m_empty {
        -1
    } else if mknz == vlen {
        pm_start + i
    } else {
        let mi = mi.unwrap_or(&[]);
        let (off, _) = split_binary_search(i, &mi[pm_start as usize..pm_end as usize]);
        pm_start + off as i64
    };

    debug_assert!((0..=vlen).contains(&i));
    debug_assert!(p_a == -1 || (pa_start <= p_a && p_a <= pa_end));
    debug_assert!(p_b == -1 || (pb_start <= p_b && p_b <= pb_end));
    debug_assert!(p_m == -1 || (pm_start <= p_m && p_m <= pm_end));

    VectorSlice { i, p_m, p_a, p_b }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_boundaries(xi: &[i64], p_start: i64, p_end: i64, p: i64, i: i64) {
        if p > p_start && p < p_end {
            assert!(xi[p as usize - 1] < i);
        }
        if p >= p_start && p < p_end && p > p_start {
            assert!(xi[p as usize] >= i);
        }
    }

    #[test]
    fn balances_two_even_columns() {
        // Two columns of a million-row vector, 1e5 entries each, evenly
        // spread; ask for 50000 units of tail work.
        let vlen: i64 = 1_000_000;
        let ai: Vec<i64> = (0..100_000).map(|t| t * 10).collect();
        let bi = ai.clone();
        let s = slice_vector(
            None, 0, 0, &ai, 0, 100_000, &bi, 0, 100_000, vlen, 50_000.0,
        );
        let work = (100_000 - s.p_a) + (100_000 - s.p_b);
        assert!(
            (49_995..=50_005).contains(&work),
            "work {work} at i={}",
            s.i
        );
        assert_eq!(s.p_m, -1);
        check_boundaries(&ai, 0, 100_000, s.p_a, s.i);
        check_boundaries(&bi, 0, 100_000, s.p_b, s.i);
    }

    #[test]
    fn empty_slices_get_sentinels() {
        let s = slice_vector(None, 0, 0, &[], 0, 0, &[], 0, 0, 100, 10.0);
        assert_eq!(s.p_a, -1);
        assert_eq!(s.p_b, -1);
        assert_eq!(s.p_m, -1);
    }

    #[test]
    fn one_empty_one_dense() {
        // B dense over vlen=8, A empty: dense shortcut must position pB
        // without a search.
        let bi: Vec<i64> = (0..8).collect();
        let s = slice_vector(None, 0, 0, &[], 0, 0, &bi, 0, 8, 8, 4.0);
        assert_eq!(s.p_a, -1);
        assert_eq!(s.p_b, s.i);
        let work = 8 - s.p_b;
        assert!((3..=5).contains(&work), "work {work}");
    }

    #[test]
    fn mask_position_follows_split() {
        let ai: Vec<i64> = (0..64).map(|t| t * 2).collect(); // rows 0,2,..126
        let bi: Vec<i64> = (0..64).map(|t| t * 2 + 1).collect();
        let mi: Vec<i64> = vec![1, 5, 40, 90, 127];
        let s = slice_vector(
            Some(&mi),
            0,
            5,
            &ai,
            0,
            64,
            &bi,
            0,
            64,
            128,
            64.0,
        );
        // pM is the first mask entry at or past the split row.
        assert!(s.p_m >= 0 && s.p_m <= 5);
        if s.p_m > 0 && s.p_m < 5 {
            assert!(mi[s.p_m as usize - 1] < s.i);
            assert!(mi[s.p_m as usize] >= s.i);
        }
    }

    #[test]
    fn positions_inside_global_arrays() {
        // Slices are windows of larger arrays; positions must be global.
        let xi: Vec<i64> = vec![9, 9, 9, 0, 3, 5, 7, 9, 9];
        let s = slice_vector(None, 0, 0, &xi, 3, 8, &xi, 3, 8, 10, 5.0);
        assert!(s.p_a >= 3 && s.p_a <= 8);
        assert!(s.p_b >= 3 && s.p_b <= 8);
    }

    #[test]
    fn whole_tail_when_target_huge() {
        let ai: Vec<i64> = (0..10).collect();
        let s = slice_vector(None, 0, 0, &ai, 0, 10, &[], 0, 0, 10, 1e9);
        // Interval collapses; positions stay inside bounds.
        assert!(s.p_a >= 0 && s.p_a <= 10);
        assert_eq!(s.p_b, -1);
    }
}
