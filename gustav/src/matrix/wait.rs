//! Finishing deferred work: zombie reclamation, vector sorting, and the
//! pending-tuple merge. Runs in three steps so each one sees a simpler
//! matrix than the last: compaction first, then sorting, then the merge
//! against fully sorted vectors.

use gustav_ring::{BinaryOp, Scalar};
use itertools::{merge_join_by, EitherOrBoth};

use crate::burble::burble_log;
use crate::error::{reserve, Result};
use crate::matrix::pending::is_zombie;
use crate::matrix::{Matrix, Store};

impl<T: Scalar> Matrix<T> {
    /// Finishes all deferred work, coalescing duplicate pending tuples with
    /// `D` (in insertion order). A pending tuple beats a stored entry at the
    /// same position.
    pub(crate) fn wait_with<D>(&mut self) -> Result<()>
    where
        D: BinaryOp<X = T, Y = T, Z = T>,
    {
        let vdim = self.vdim();
        match &mut self.store {
            Store::Bitmap { .. } | Store::Full { .. } => Ok(()),
            Store::Sparse { p, i, x, pending } => {
                if pending.is_clean() {
                    return Ok(());
                }
                burble_log!(
                    "wait: sparse, {} zombies, jumbled={}, {} pending tuples",
                    pending.nzombies,
                    pending.jumbled,
                    pending.ntuples()
                );
                if pending.nzombies > 0 {
                    compact_zombies(p, i, x);
                    pending.nzombies = 0;
                }
                if pending.jumbled {
                    sort_vectors(p, i, x);
                    pending.jumbled = false;
                }
                if pending.ntuples() > 0 {
                    let tuples = coalesce::<T, D>(pending.take_tuples());
                    let (np, ni, nx) = merge_sparse(vdim, p, i, x, &tuples)?;
                    *p = np;
                    *i = ni;
                    *x = nx;
                }
                debug_assert!(pending.is_clean());
                Ok(())
            }
            Store::Hyper {
                h, p, i, x, pending,
            } => {
                if pending.is_clean() {
                    return Ok(());
                }
                burble_log!(
                    "wait: hyper, {} zombies, jumbled={}, {} pending tuples",
                    pending.nzombies,
                    pending.jumbled,
                    pending.ntuples()
                );
                if pending.nzombies > 0 {
                    compact_zombies(p, i, x);
                    pending.nzombies = 0;
                    prune_empty_vectors(h, p);
                }
                if pending.jumbled {
                    sort_vectors(p, i, x);
                    pending.jumbled = false;
                }
                if pending.ntuples() > 0 {
                    let tuples = coalesce::<T, D>(pending.take_tuples());
                    let (nh, np, ni, nx) = merge_hyper(h, p, i, x, &tuples)?;
                    *h = nh;
                    *p = np;
                    *i = ni;
                    *x = nx;
                }
                debug_assert!(pending.is_clean());
                Ok(())
            }
        }
    }
}

/// Removes zombies in place and rewrites the offsets. Live order is
/// preserved (zombies hold their decoded sort position, so a sorted vector
/// stays sorted).
fn compact_zombies<T: Copy>(p: &mut [i64], i: &mut Vec<i64>, x: &mut Vec<T>) {
    let nvec = p.len() - 1;
    let mut w = 0usize;
    let mut lo = p[0] as usize;
    for k in 0..nvec {
        let hi = p[k + 1] as usize;
        p[k] = w as i64;
        for pos in lo..hi {
            if !is_zombie(i[pos]) {
                i[w] = i[pos];
                x[w] = x[pos];
                w += 1;
            }
        }
        lo = hi;
    }
    p[nvec] = w as i64;
    i.truncate(w);
    x.truncate(w);
}

/// Restores ascending index order inside each vector.
fn sort_vectors<T: Copy>(p: &[i64], i: &mut [i64], x: &mut [T]) {
    let nvec = p.len() - 1;
    for k in 0..nvec {
        let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
        if i[lo..hi].windows(2).all(|w| w[0] < w[1]) {
            continue;
        }
        let mut pairs: Vec<(i64, T)> = i[lo..hi].iter().copied().zip(x[lo..hi].iter().copied()).collect();
        pairs.sort_unstable_by_key(|&(idx, _)| idx);
        for (off, (idx, val)) in pairs.into_iter().enumerate() {
            i[lo + off] = idx;
            x[lo + off] = val;
        }
    }
}

/// Drops vectors whose stored range became empty.
fn prune_empty_vectors(h: &mut Vec<i64>, p: &mut Vec<i64>) {
    let nvec = p.len() - 1;
    let mut w = 0usize;
    for k in 0..nvec {
        if p[k] < p[k + 1] {
            h[w] = h[k];
            p[w] = p[k];
            w += 1;
        }
    }
    p[w] = p[nvec];
    // Rebuild offsets so they stay cumulative over the surviving vectors.
    let mut run = 0;
    for k in 0..w {
        let len = p[k + 1] - p[k];
        p[k] = run;
        run += len;
    }
    h.truncate(w);
    p.truncate(w + 1);
    p[w] = run;
}

/// Sorts the tuple buffer by (vector, index) and folds duplicates with `D`
/// in insertion order.
fn coalesce<T: Scalar, D>(buf: (Vec<i64>, Vec<i64>, Vec<T>)) -> Vec<(i64, i64, T)>
where
    D: BinaryOp<X = T, Y = T, Z = T>,
{
    let (idxs, vecs, vals) = buf;
    let mut order: Vec<usize> = (0..idxs.len()).collect();
    order.sort_unstable_by_key(|&t| (vecs[t], idxs[t], t));

    let mut out: Vec<(i64, i64, T)> = Vec::with_capacity(order.len());
    for t in order {
        match out.last_mut() {
            Some((vec, idx, acc)) if *vec == vecs[t] && *idx == idxs[t] => {
                *acc = D::apply(*acc, vals[t]);
            }
            _ => out.push((vecs[t], idxs[t], vals[t])),
        }
    }
    out
}

/// Merges sorted unique tuples into a sparse store. On a position collision
/// the tuple wins.
fn merge_sparse<T: Scalar>(
    vdim: usize,
    p: &[i64],
    i: &[i64],
    x: &[T],
    tuples: &[(i64, i64, T)],
) -> Result<(Vec<i64>, Vec<i64>, Vec<T>)> {
    let mut np = Vec::new();
    reserve(&mut np, vdim + 1)?;
    let mut ni = Vec::new();
    let mut nx = Vec::new();
    reserve(&mut ni, i.len() + tuples.len())?;
    reserve(&mut nx, i.len() + tuples.len())?;

    let mut t = 0usize;
    np.push(0);
    for k in 0..vdim {
        let (lo, hi) = (p[k] as usize, p[k + 1] as usize);
        let tend = advance_group(tuples, t, k as i64);
        merge_vector(
            &i[lo..hi],
            &x[lo..hi],
            &tuples[t..tend],
            &mut ni,
            &mut nx,
        );
        t = tend;
        np.push(ni.len() as i64);
    }
    Ok((np, ni, nx))
}

/// Merges sorted unique tuples into a hypersparse store, inserting vectors
/// the store has never seen.
#[allow(clippy::type_complexity)]
fn merge_hyper<T: Scalar>(
    h: &[i64],
    p: &[i64],
    i: &[i64],
    x: &[T],
    tuples: &[(i64, i64, T)],
) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>, Vec<T>)> {
    let mut nh = Vec::new();
    let mut np = Vec::new();
    let mut ni = Vec::new();
    let mut nx = Vec::new();
    reserve(&mut ni, i.len() + tuples.len())?;
    reserve(&mut nx, i.len() + tuples.len())?;

    np.push(0);
    let mut k = 0usize;
    let mut t = 0usize;
    while k < h.len() || t < tuples.len() {
        let jh = if k < h.len() { h[k] } else { i64::MAX };
        let jt = if t < tuples.len() { tuples[t].0 } else { i64::MAX };
        let j = jh.min(jt);
        let (lo, hi) = if jh == j {
            let r = (p[k] as usize, p[k + 1] as usize);
            k += 1;
            r
        } else {
            (0, 0)
        };
        let tend = if jt == j {
            advance_group(tuples, t, j)
        } else {
            t
        };
        merge_vector(&i[lo..hi], &x[lo..hi], &tuples[t..tend], &mut ni, &mut nx);
        t = tend;
        nh.push(j);
        np.push(ni.len() as i64);
    }
    Ok((nh, np, ni, nx))
}

/// End of the run of `tuples` whose vector id is `j`, starting at `t`.
fn advance_group<T>(tuples: &[(i64, i64, T)], t: usize, j: i64) -> usize {
    let mut e = t;
    while e < tuples.len() && tuples[e].0 == j {
        e += 1;
    }
    e
}

/// Sorted union of one vector and one tuple run; the tuple value wins a
/// collision.
fn merge_vector<T: Scalar>(
    vi: &[i64],
    vx: &[T],
    tup: &[(i64, i64, T)],
    ni: &mut Vec<i64>,
    nx: &mut Vec<T>,
) {
    let stored = vi.iter().copied().zip(vx.iter().copied());
    let incoming = tup.iter().map(|&(_, idx, val)| (idx, val));
    for pair in merge_join_by(stored, incoming, |a, b| a.0.cmp(&b.0)) {
        let (idx, val) = match pair {
            EitherOrBoth::Left(entry) => entry,
            EitherOrBoth::Right(tuple) | EitherOrBoth::Both(_, tuple) => tuple,
        };
        ni.push(idx);
        nx.push(val);
    }
}

#[cfg(test)]
mod tests {
    use gustav_ring::binop::{Plus, Second};

    use super::*;
    use crate::matrix::Orientation;

    #[test]
    fn compact_preserves_order() {
        let mut p = vec![0i64, 3, 5];
        let mut i = vec![0i64, -2, 4, -1, 3];
        let mut x = vec![10, 20, 30, 40, 50];
        compact_zombies(&mut p, &mut i, &mut x);
        assert_eq!(p, vec![0, 2, 3]);
        assert_eq!(i, vec![0, 4, 3]);
        assert_eq!(x, vec![10, 30, 50]);
    }

    #[test]
    fn unjumble_sorts_each_vector() {
        let p = vec![0i64, 3, 4];
        let mut i = vec![5i64, 1, 3, 0];
        let mut x = vec![50, 10, 30, 0];
        sort_vectors(&p, &mut i, &mut x);
        assert_eq!(i, vec![1, 3, 5, 0]);
        assert_eq!(x, vec![10, 30, 50, 0]);
    }

    #[test]
    fn coalesce_orders_and_folds() {
        let buf = (vec![3i64, 1, 3], vec![0i64, 0, 0], vec![5i32, 2, 7]);
        let out = coalesce::<i32, Plus<i32>>(buf);
        assert_eq!(out, vec![(0, 1, 2), (0, 3, 12)]);

        let buf = (vec![3i64, 3], vec![0i64, 0], vec![5i32, 7]);
        let out = coalesce::<i32, Second<i32>>(buf);
        assert_eq!(out, vec![(0, 3, 7)]);
    }

    #[test]
    fn pending_tuple_beats_stored_entry() {
        let mut a = Matrix::<i32>::new(4, 1, Orientation::ByCol).unwrap();
        a.set_element(1, 0, 5).unwrap();
        a.wait().unwrap();
        // A fresh tuple for the same cell, still unmerged.
        a.remove_element(2, 0).unwrap(); // no-op, keeps store clean
        a.set_element(3, 0, 1).unwrap();
        a.set_element(1, 0, 9).unwrap(); // in-place overwrite path
        a.wait().unwrap();
        assert_eq!(a.get_element(1, 0).unwrap(), Some(9));
        assert_eq!(a.get_element(3, 0).unwrap(), Some(1));
        a.check_invariants().unwrap();
    }

    #[test]
    fn hyper_merge_inserts_new_vectors() {
        let h = vec![2i64];
        let p = vec![0i64, 2];
        let i = vec![0i64, 3];
        let x = vec![1i32, 2];
        let tuples = vec![(0i64, 1i64, 10i32), (2, 1, 20), (5, 0, 30)];
        let (nh, np, ni, nx) = merge_hyper(&h, &p, &i, &x, &tuples).unwrap();
        assert_eq!(nh, vec![0, 2, 5]);
        assert_eq!(np, vec![0, 1, 4, 5]);
        assert_eq!(ni, vec![1, 0, 1, 3, 0]);
        assert_eq!(nx, vec![10, 1, 20, 2, 30]);
    }
}
