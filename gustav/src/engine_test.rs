//! End-to-end exercises of the whole engine: multiply over every storage
//! format, conform under realistic populations, masked and accumulated
//! write-backs, and the pending-tuple lifecycle.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ring::binop::{Plus, Second};
use crate::ring::semiring::{MaxRMinus, PlusTimes};
use crate::ring::unary::AInv;
use crate::{
    apply, assign, ewise_add, ewise_mult, extract, mxm, AccumWith, AxbMethod, Context, Descriptor,
    Error, Format, Matrix, NoAccum, Orientation, Sparsity,
};

fn ctx() -> Context {
    Context::new(4, 64)
}

fn from_tuples<T: crate::ring::Scalar>(
    nrows: usize,
    ncols: usize,
    orientation: Orientation,
    tuples: &[(usize, usize, T)],
) -> Matrix<T> {
    let mut m = Matrix::<T>::new(nrows, ncols, orientation).unwrap();
    m.build::<Second<T>>(tuples).unwrap();
    m
}

fn dense_read<T: crate::ring::Scalar + Default>(m: &mut Matrix<T>) -> Vec<Vec<T>> {
    let (nr, nc) = (m.nrows(), m.ncols());
    let mut out = vec![vec![T::default(); nc]; nr];
    for r in 0..nr {
        for c in 0..nc {
            if let Some(v) = m.get_element(r, c).unwrap() {
                out[r][c] = v;
            }
        }
    }
    out
}

fn sorted_tuples<T: crate::ring::Scalar>(m: &mut Matrix<T>) -> Vec<(usize, usize, T)> {
    let mut t = m.extract_tuples().unwrap();
    t.sort_by_key(|&(r, c, _)| (r, c));
    t
}

/// Plus-times on 3x3 ints, with the first operand carried through every
/// storage format.
#[test]
fn plus_times_3x3_all_formats() {
    let ctx = ctx();
    let entries = [
        (0, 0, 1),
        (0, 2, 2),
        (1, 1, 3),
        (2, 0, 4),
        (2, 2, 5),
    ];
    let expected = vec![vec![9, 0, 12], vec![0, 9, 0], vec![24, 0, 33]];

    for variant in ["hyper", "sparse", "bitmap", "full"] {
        let mut a = from_tuples(3, 3, Orientation::ByCol, &entries);
        match variant {
            "hyper" => a.to_hyper().unwrap(),
            "sparse" => a.to_sparse().unwrap(),
            "bitmap" => a.to_bitmap().unwrap(),
            _ => {
                // A full operand stores the zeros explicitly; the numbers
                // still agree.
                for r in 0..3 {
                    for c in 0..3 {
                        if a.get_element(r, c).unwrap().is_none() {
                            a.set_element(r, c, 0).unwrap();
                        }
                    }
                }
                a.to_full().unwrap();
            }
        }
        let b = a.clone();
        let mut c = Matrix::<i32>::new(3, 3, Orientation::ByCol).unwrap();
        mxm::<PlusTimes<i32>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new()).unwrap();
        assert_eq!(dense_read(&mut c), expected, "A stored {variant}");
        c.check_invariants().unwrap();
    }
}

/// Max-rminus over int64, including a product that saturates the monoid's
/// terminal value.
#[test]
fn max_rminus_terminal() {
    let ctx = ctx();
    let a = from_tuples(
        2,
        2,
        Orientation::ByCol,
        &[(0, 0, 3i64), (0, 1, 7), (1, 0, 2), (1, 1, i64::MAX - 1)],
    );
    let b = from_tuples(
        2,
        2,
        Orientation::ByCol,
        &[(0, 0, 1i64), (0, 1, 0), (1, 0, 4), (1, 1, 5)],
    );
    let mut c = Matrix::<i64>::new(2, 2, Orientation::ByCol).unwrap();
    mxm::<MaxRMinus<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new()).unwrap();
    assert_eq!(c.get_element(0, 0).unwrap(), Some(-2));
    assert_eq!(c.get_element(0, 1).unwrap(), Some(-2));
    assert_eq!(c.get_element(1, 0).unwrap(), Some(-1));
    assert_eq!(c.get_element(1, 1).unwrap(), Some(-2));

    // One contribution already reaches INT64_MAX; later ones cannot move
    // the reduction, in any algorithm family.
    let a = from_tuples(2, 1, Orientation::ByCol, &[(0, 0, -1i64), (1, 0, 100)]);
    let b = from_tuples(
        2,
        1,
        Orientation::ByCol,
        &[(0, 0, i64::MAX - 1), (1, 0, 1)],
    );
    for method in [AxbMethod::Dot, AxbMethod::Gustavson, AxbMethod::Heap] {
        let mut c = Matrix::<i64>::new(1, 1, Orientation::ByCol).unwrap();
        let desc = Descriptor::new().transpose_inp0().axb(method);
        mxm::<MaxRMinus<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &desc).unwrap();
        assert_eq!(c.get_element(0, 0).unwrap(), Some(i64::MAX), "{method:?}");
    }
}

/// A fully-populated matrix under AUTO conforms to full.
#[test]
fn conform_auto_dense_is_full() {
    let mut a = Matrix::<f64>::new(10, 10, Orientation::ByCol).unwrap();
    for r in 0..10 {
        for c in 0..10 {
            a.set_element(r, c, (r + c) as f64).unwrap();
        }
    }
    a.wait().unwrap();
    a.conform().unwrap();
    assert_eq!(a.format(), Format::Full);
}

/// One percent density under AUTO lands in hyper or sparse, never bitmap.
#[test]
fn conform_auto_one_percent_density() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut a = Matrix::<f64>::new(1000, 1000, Orientation::ByCol).unwrap();
    a.set_bitmap_switch(0.04).unwrap();
    for _ in 0..10_000 {
        let r = rng.gen_range(0..1000);
        let c = rng.gen_range(0..1000);
        a.set_element(r, c, rng.gen()).unwrap();
    }
    a.wait().unwrap();
    a.conform().unwrap();
    assert!(
        matches!(a.format(), Format::Hyper | Format::Sparse),
        "{:?}",
        a.format()
    );
}

/// Pending-tuple round trip: a thousand scattered insertions come back out
/// intact once merged.
#[test]
fn pending_tuple_round_trip() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut cells: Vec<(usize, usize)> = (0..100)
        .flat_map(|r| (0..100).map(move |c| (r, c)))
        .collect();
    // Shuffle by sorting on a random key; only the first thousand go in.
    let mut keyed: Vec<(u64, (usize, usize))> = cells.drain(..).map(|rc| (rng.gen(), rc)).collect();
    keyed.sort_unstable_by_key(|&(k, _)| k);

    let mut reference: Vec<(usize, usize, i64)> = Vec::new();
    let mut a = Matrix::<i64>::new(100, 100, Orientation::ByCol).unwrap();
    for (t, &(_, (r, c))) in keyed.iter().take(1000).enumerate() {
        a.set_element(r, c, t as i64).unwrap();
        reference.push((r, c, t as i64));
    }
    assert!(a.has_pending_work());
    reference.sort_by_key(|&(r, c, _)| (r, c));
    assert_eq!(sorted_tuples(&mut a), reference);
    assert!(!a.has_pending_work());
    a.check_invariants().unwrap();
}

/// The three general multiply families agree on random inputs.
#[test]
fn multiply_families_agree() {
    let ctx = ctx();
    let mut rng = StdRng::seed_from_u64(7);
    let mut a = Matrix::<i64>::new(30, 25, Orientation::ByCol).unwrap();
    let mut b = Matrix::<i64>::new(25, 40, Orientation::ByCol).unwrap();
    for _ in 0..150 {
        a.set_element(rng.gen_range(0..30), rng.gen_range(0..25), rng.gen_range(-9..9))
            .unwrap();
    }
    for _ in 0..200 {
        b.set_element(rng.gen_range(0..25), rng.gen_range(0..40), rng.gen_range(-9..9))
            .unwrap();
    }

    let mut reference = None;
    for method in [AxbMethod::Gustavson, AxbMethod::Dot, AxbMethod::Heap] {
        let mut c = Matrix::<i64>::new(30, 40, Orientation::ByCol).unwrap();
        let desc = Descriptor::new().axb(method);
        mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &desc).unwrap();
        c.check_invariants().unwrap();
        let t = sorted_tuples(&mut c);
        match &reference {
            None => reference = Some(t),
            Some(r) => assert_eq!(&t, r, "{method:?}"),
        }
    }
}

/// Row-oriented operands produce the same logical product.
#[test]
fn multiply_by_row_orientation() {
    let ctx = ctx();
    let entries_a = [(0, 0, 2i64), (0, 1, 3), (1, 1, 4)];
    let entries_b = [(0, 0, 5i64), (1, 0, 7), (1, 1, 1)];

    let a_col = from_tuples(2, 2, Orientation::ByCol, &entries_a);
    let b_col = from_tuples(2, 2, Orientation::ByCol, &entries_b);
    let mut c_col = Matrix::<i64>::new(2, 2, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c_col, None, &a_col, &b_col, &Descriptor::new())
        .unwrap();

    let a_row = from_tuples(2, 2, Orientation::ByRow, &entries_a);
    let b_row = from_tuples(2, 2, Orientation::ByRow, &entries_b);
    let mut c_row = Matrix::<i64>::new(2, 2, Orientation::ByRow).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c_row, None, &a_row, &b_row, &Descriptor::new())
        .unwrap();

    assert_eq!(sorted_tuples(&mut c_col), sorted_tuples(&mut c_row));
}

/// A diagonal operand routes through the scale kernels and matches the
/// general path.
#[test]
fn diagonal_scaling_matches_general() {
    let ctx = ctx();
    let a = from_tuples(
        3,
        3,
        Orientation::ByCol,
        &[(0, 0, 1i64), (1, 0, 2), (2, 1, 3), (0, 2, 4)],
    );
    let d = from_tuples(3, 3, Orientation::ByCol, &[(0, 0, 10i64), (2, 2, 30)]);

    // Default resolves to colscale for A*D and rowscale for D*A.
    let mut c1 = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c1, None, &a, &d, &Descriptor::new()).unwrap();
    let mut c2 = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(
        &ctx,
        &mut c2,
        None,
        &a,
        &d,
        &Descriptor::new().axb(AxbMethod::Gustavson),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c1), sorted_tuples(&mut c2));

    let mut c3 = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c3, None, &d, &a, &Descriptor::new()).unwrap();
    let mut c4 = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(
        &ctx,
        &mut c4,
        None,
        &d,
        &a,
        &Descriptor::new().axb(AxbMethod::Heap),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c3), sorted_tuples(&mut c4));
}

/// Element-wise add: commutative, and independent of operand formats.
#[test]
fn ewise_add_format_independence() {
    let ctx = ctx();
    let ea = [(0, 0, 1i64), (1, 2, 5), (3, 3, -2)];
    let eb = [(0, 0, 10i64), (2, 1, 7), (3, 3, 2)];

    let mut reference = None;
    for fa in 0..3 {
        for fb in 0..3 {
            let mut a = from_tuples(4, 4, Orientation::ByCol, &ea);
            let mut b = from_tuples(4, 4, Orientation::ByCol, &eb);
            match fa {
                0 => a.to_hyper().unwrap(),
                1 => a.to_bitmap().unwrap(),
                _ => {}
            }
            match fb {
                0 => b.to_hyper().unwrap(),
                1 => b.to_bitmap().unwrap(),
                _ => {}
            }
            let mut c = Matrix::<i64>::new(4, 4, Orientation::ByCol).unwrap();
            ewise_add::<Plus<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new())
                .unwrap();
            let mut d = Matrix::<i64>::new(4, 4, Orientation::ByCol).unwrap();
            ewise_add::<Plus<i64>, NoAccum>(&ctx, &mut d, None, &b, &a, &Descriptor::new())
                .unwrap();
            let tc = sorted_tuples(&mut c);
            assert_eq!(tc, sorted_tuples(&mut d), "commutativity {fa}/{fb}");
            match &reference {
                None => reference = Some(tc),
                Some(r) => assert_eq!(&tc, r, "formats {fa}/{fb}"),
            }
        }
    }
    assert_eq!(
        reference.unwrap(),
        vec![(0, 0, 11), (1, 2, 5), (2, 1, 7), (3, 3, 0)]
    );
}

#[test]
fn ewise_mult_intersects() {
    let ctx = ctx();
    let a = from_tuples(3, 3, Orientation::ByCol, &[(0, 0, 3i64), (1, 1, 4), (2, 2, 5)]);
    let b = from_tuples(3, 3, Orientation::ByCol, &[(1, 1, 10i64), (2, 2, 20), (0, 1, 9)]);
    let mut c = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    ewise_mult::<crate::ring::binop::Times<i64>, NoAccum>(
        &ctx,
        &mut c,
        None,
        &a,
        &b,
        &Descriptor::new(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(1, 1, 40), (2, 2, 100)]);
}

/// Fine slicing path: one huge column forces work-based splits.
#[test]
fn ewise_add_huge_column() {
    let ctx = Context::new(4, 32);
    let n = 5000usize;
    let ta: Vec<(usize, usize, i64)> = (0..n).map(|k| (2 * k, 0, k as i64)).collect();
    let tb: Vec<(usize, usize, i64)> = (0..n).map(|k| (2 * k + 1, 0, -(k as i64))).collect();
    let a = from_tuples(2 * n + 1, 1, Orientation::ByCol, &ta);
    let b = from_tuples(2 * n + 1, 1, Orientation::ByCol, &tb);
    let mut c = Matrix::<i64>::new(2 * n + 1, 1, Orientation::ByCol).unwrap();
    ewise_add::<Plus<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new()).unwrap();
    c.check_invariants().unwrap();
    assert_eq!(c.nvals().unwrap(), 2 * n);
    assert_eq!(c.get_element(0, 0).unwrap(), Some(0));
    assert_eq!(c.get_element(2 * n - 1, 0).unwrap(), Some(-(n as i64 - 1)));
}

#[test]
fn masked_assign_variants() {
    let ctx = ctx();
    let c0 = from_tuples(2, 2, Orientation::ByCol, &[(0, 0, 1i64), (1, 1, 2)]);
    let a = from_tuples(2, 2, Orientation::ByCol, &[(0, 0, 10i64), (0, 1, 20), (1, 1, 30)]);
    let mask = from_tuples(2, 2, Orientation::ByCol, &[(0, 1, true), (1, 1, false)]);

    // Valued mask: only (0,1) is allowed; the rest of C survives.
    let mut c = c0.clone();
    assign::<i64, NoAccum>(&ctx, &mut c, Some(&mask), &a, &Descriptor::new()).unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(0, 0, 1), (0, 1, 20), (1, 1, 2)]);

    // Structural: (1,1) counts too even though its value is false.
    let mut c = c0.clone();
    assign::<i64, NoAccum>(
        &ctx,
        &mut c,
        Some(&mask),
        &a,
        &Descriptor::new().structural_mask(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(0, 0, 1), (0, 1, 20), (1, 1, 30)]);

    // Complement: only cells outside the mask pattern are written.
    let mut c = c0.clone();
    assign::<i64, NoAccum>(
        &ctx,
        &mut c,
        Some(&mask),
        &a,
        &Descriptor::new().structural_mask().complement_mask(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(0, 0, 10), (1, 1, 2)]);

    // Replace: disallowed cells are dropped instead of kept.
    let mut c = c0.clone();
    assign::<i64, NoAccum>(
        &ctx,
        &mut c,
        Some(&mask),
        &a,
        &Descriptor::new().structural_mask().replace(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(0, 1, 20), (1, 1, 30)]);
}

#[test]
fn accumulated_multiply() {
    let ctx = ctx();
    let a = from_tuples(2, 2, Orientation::ByCol, &[(0, 0, 2i64), (1, 1, 3)]);
    let mut c = from_tuples(2, 2, Orientation::ByCol, &[(0, 0, 100i64), (0, 1, 50)]);
    mxm::<PlusTimes<i64>, AccumWith<Plus<i64>>>(
        &ctx,
        &mut c,
        None,
        &a,
        &a,
        &Descriptor::new(),
    )
    .unwrap();
    // C += A*A: (0,0) gets 100+4, (1,1) appears with 9, (0,1) survives.
    assert_eq!(
        sorted_tuples(&mut c),
        vec![(0, 0, 104), (0, 1, 50), (1, 1, 9)]
    );
}

#[test]
fn apply_and_transpose_descriptor() {
    let ctx = ctx();
    let a = from_tuples(2, 3, Orientation::ByCol, &[(0, 1, 5i64), (1, 2, -7)]);
    let mut c = Matrix::<i64>::new(3, 2, Orientation::ByCol).unwrap();
    apply::<AInv<i64>, NoAccum>(
        &ctx,
        &mut c,
        None,
        &a,
        &Descriptor::new().transpose_inp0(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(1, 0, -5), (2, 1, 7)]);
}

#[test]
fn extract_submatrix() {
    let ctx = ctx();
    let a = from_tuples(
        4,
        4,
        Orientation::ByCol,
        &[(0, 1, 1i64), (2, 1, 2), (2, 3, 3), (3, 3, 4), (1, 0, 9)],
    );
    let mut c = Matrix::<i64>::new(2, 2, Orientation::ByCol).unwrap();
    extract::<i64, NoAccum>(
        &ctx,
        &mut c,
        None,
        &a,
        Some(&[0, 2]),
        Some(&[1, 3]),
        &Descriptor::new(),
    )
    .unwrap();
    assert_eq!(sorted_tuples(&mut c), vec![(0, 0, 1), (1, 0, 2), (1, 1, 3)]);

    // Unsorted selections are rejected.
    let mut bad = Matrix::<i64>::new(2, 2, Orientation::ByCol).unwrap();
    let err = extract::<i64, NoAccum>(
        &ctx,
        &mut bad,
        None,
        &a,
        Some(&[2, 0]),
        Some(&[1, 3]),
        &Descriptor::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadInput(_)));
}

#[test]
fn dimension_mismatches_are_reported() {
    let ctx = ctx();
    let a = Matrix::<i64>::new(2, 3, Orientation::ByCol).unwrap();
    let b = Matrix::<i64>::new(2, 3, Orientation::ByCol).unwrap();
    let mut c = Matrix::<i64>::new(2, 2, Orientation::ByCol).unwrap();
    let err = mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new())
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch(_)));
    // The failed output is cleared but valid.
    c.check_invariants().unwrap();
    assert_eq!(c.nvals().unwrap(), 0);
}

#[test]
fn conform_policy_respected_after_ops() {
    let ctx = ctx();
    let a = from_tuples(3, 3, Orientation::ByCol, &[(0, 0, 1i64), (1, 1, 1), (2, 2, 1)]);
    let mut c = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    c.set_sparsity_control(Sparsity::BITMAP);
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c, None, &a, &a, &Descriptor::new()).unwrap();
    assert_eq!(c.format(), Format::Bitmap);
    assert_eq!(c.get_element(1, 1).unwrap(), Some(1));
}

#[test]
fn hyper_operands_yield_hyper_pattern() {
    let ctx = ctx();
    let mut a = Matrix::<i64>::new(500, 500, Orientation::ByCol).unwrap();
    a.set_element(3, 100, 7).unwrap();
    a.set_element(400, 100, 8).unwrap();
    a.to_hyper().unwrap();
    let mut b = Matrix::<i64>::new(500, 500, Orientation::ByCol).unwrap();
    b.set_element(3, 100, 1).unwrap();
    b.set_element(9, 402, 2).unwrap();
    b.to_hyper().unwrap();

    let mut c = Matrix::<i64>::new(500, 500, Orientation::ByCol).unwrap();
    ewise_add::<Plus<i64>, NoAccum>(&ctx, &mut c, None, &a, &b, &Descriptor::new()).unwrap();
    assert_eq!(
        sorted_tuples(&mut c),
        vec![(3, 100, 8), (9, 402, 2), (400, 100, 8)]
    );
}

#[test]
fn burble_traces_through_log() {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = ctx();
    let prev = crate::set_burble(true);
    assert!(crate::burble());
    // Run one conversion-heavy operation with tracing on; decisions go to
    // the log facade, results are unaffected.
    let a = from_tuples(3, 3, Orientation::ByCol, &[(0, 0, 1i64), (2, 2, 2)]);
    let mut c = Matrix::<i64>::new(3, 3, Orientation::ByCol).unwrap();
    mxm::<PlusTimes<i64>, NoAccum>(&ctx, &mut c, None, &a, &a, &Descriptor::new()).unwrap();
    assert_eq!(c.get_element(0, 0).unwrap(), Some(1));
    crate::set_burble(prev);
}
