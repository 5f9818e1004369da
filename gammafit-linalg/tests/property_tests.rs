//! Property-based tests using proptest.
//!
//! Invariants that must hold for all generated inputs:
//!   - Sparse Cholesky solves SPD systems to near machine precision
//!   - Solutions do not depend on a symmetric permutation of the system
//!   - Vector norms are zero exactly for zero vectors across the f64 range
//!   - Permutations round trip
//!   - Sparse products agree with dense and sprs references
//!   - Random insertion order keeps the compressed storage consistent

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use gammafit_linalg::{
    iperm, perm, Ordering, SparseCholesky, SparseMatrix, SymbolicCholesky, Vector,
};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// Random `rows x cols` sparse matrix with roughly `fill` density.
fn random_sparse(rng: &mut ChaCha8Rng, rows: usize, cols: usize, fill: f64) -> SparseMatrix {
    let mut r = Vec::new();
    let mut c = Vec::new();
    let mut v = Vec::new();
    for j in 0..cols {
        for i in 0..rows {
            if rng.gen::<f64>() < fill {
                r.push(i);
                c.push(j);
                v.push(rng.gen_range(-1.0..1.0));
            }
        }
    }
    SparseMatrix::from_triplets(rows, cols, &r, &c, &v).unwrap()
}

/// `M' M + eps I` for a random sparse `M`.
fn random_spd(rng: &mut ChaCha8Rng, n: usize, fill: f64, eps: f64) -> SparseMatrix {
    let m = random_sparse(rng, n, n, fill);
    let mtm = m.transpose().mul(&m).unwrap();
    mtm.add(&SparseMatrix::identity(n).scale(eps)).unwrap()
}

fn random_vector(rng: &mut ChaCha8Rng, n: usize) -> Vector {
    (0..n).map(|_| rng.gen_range(-10.0..10.0)).collect()
}

fn random_permutation(rng: &mut ChaCha8Rng, n: usize) -> Vec<usize> {
    let mut p: Vec<usize> = (0..n).collect();
    p.shuffle(rng);
    p
}

/// `B(i, j) = A(p[i], p[j])`.
fn permute_symmetric(a: &SparseMatrix, p: &[usize]) -> SparseMatrix {
    let mut pinv = vec![0; p.len()];
    for (i, &k) in p.iter().enumerate() {
        pinv[k] = i;
    }
    let mut r = Vec::new();
    let mut c = Vec::new();
    let mut v = Vec::new();
    for (row, col, val) in a.triplets() {
        r.push(pinv[row]);
        c.push(pinv[col]);
        v.push(val);
    }
    SparseMatrix::from_triplets(a.rows(), a.cols(), &r, &c, &v).unwrap()
}

fn relative_residual(a: &SparseMatrix, x: &Vector, b: &Vector) -> f64 {
    let r = a.mul_vec(x).unwrap().sub(b).unwrap();
    r.norm() / b.norm().max(1e-300)
}

// ---------------------------------------------------------------------------
// 1. Cholesky solve of M'M + eps I reproduces b
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_cholesky_solve_residual(
        n in 1usize..40,
        fill in 0.05f64..0.4,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_spd(&mut rng, n, fill, 0.5);
        let b = random_vector(&mut rng, n);
        let x = a.cholesky_solve(&b, false).unwrap();
        let res = relative_residual(&a, &x, &b);
        prop_assert!(res < 1e-9, "relative residual {} for n={}", res, n);
    }

    #[test]
    fn prop_orderings_agree(
        n in 1usize..30,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_spd(&mut rng, n, 0.15, 1.0);
        let b = random_vector(&mut rng, n);
        let x1 = SparseCholesky::new(Ordering::Natural).with_compression(false).solve(&a, &b).unwrap();
        let x2 = SparseCholesky::new(Ordering::MinimumDegree).with_compression(false).solve(&a, &b).unwrap();
        for i in 0..n {
            prop_assert!((x1[i] - x2[i]).abs() < 1e-8 * (1.0 + x1[i].abs()));
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Permutation invariance of the solved system
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_permutation_invariance(
        n in 1usize..30,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_spd(&mut rng, n, 0.2, 1.0);
        let b = random_vector(&mut rng, n);
        let p = random_permutation(&mut rng, n);

        let x = a.cholesky_solve(&b, false).unwrap();
        let pa = permute_symmetric(&a, &p);
        let pb = perm(&b, Some(&p)).unwrap();
        let y = pa.cholesky_solve(&pb, false).unwrap();
        let back = iperm(&y, Some(&p)).unwrap();

        for i in 0..n {
            prop_assert!(
                (back[i] - x[i]).abs() < 1e-8 * (1.0 + x[i].abs()),
                "x[{}] = {} vs permuted {}", i, x[i], back[i]
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Vector norm and permutation round trip
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_norm_non_negative(
        parts in prop::collection::vec((-1.0f64..1.0, -300i32..300), 0..50),
    ) {
        let values: Vec<f64> = parts.iter().map(|&(m, e)| m * 10f64.powi(e)).collect();
        let v = Vector::from(values.clone());
        let norm = v.norm();
        prop_assert!(norm >= 0.0);
        prop_assert!(norm.is_finite());
        let largest = values.iter().fold(0.0f64, |a, &x| a.max(x.abs()));
        prop_assert!(norm >= largest);
        let all_zero = values.iter().all(|&x| x == 0.0);
        prop_assert_eq!(norm == 0.0, all_zero);
    }

    #[test]
    fn prop_perm_iperm_round_trip(
        n in 0usize..60,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let v = random_vector(&mut rng, n);
        let p = random_permutation(&mut rng, n);
        let there = iperm(&v, Some(&p)).unwrap();
        let back = perm(&there, Some(&p)).unwrap();
        prop_assert_eq!(back, v);
    }
}

// ---------------------------------------------------------------------------
// 4. Sparse products agree with dense and sprs references
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_mul_vec_matches_dense(
        rows in 1usize..40,
        cols in 1usize..40,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_sparse(&mut rng, rows, cols, 0.1);
        let x = random_vector(&mut rng, cols);
        let ys = a.mul_vec(&x).unwrap();
        let yd = a.to_dense().mul_vec(&x).unwrap();
        for i in 0..rows {
            prop_assert!((ys[i] - yd[i]).abs() < 1e-10, "row {}: {} vs {}", i, ys[i], yd[i]);
        }
    }

    #[test]
    fn prop_mul_matches_sprs(
        n in 1usize..25,
        k in 1usize..25,
        m in 1usize..25,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_sparse(&mut rng, n, k, 0.2);
        let b = random_sparse(&mut rng, k, m, 0.2);
        let ours = a.mul(&b).unwrap();
        let reference = SparseMatrix::from_sprs(&(&a.to_sprs() * &b.to_sprs()));
        prop_assert!(ours.check_consistency().is_ok());
        for i in 0..n {
            for j in 0..m {
                prop_assert!((ours.get(i, j) - reference.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn prop_transpose_involution(
        rows in 1usize..30,
        cols in 1usize..30,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_sparse(&mut rng, rows, cols, 0.2);
        let tt = a.transpose().transpose();
        prop_assert_eq!(tt.triplets(), a.triplets());
    }
}

// ---------------------------------------------------------------------------
// 5. Out-of-order insertion keeps storage consistent
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_out_of_order_insertion(
        rows in 1usize..20,
        cols in 1usize..20,
        count in 1usize..80,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut m = SparseMatrix::new(rows, cols).with_mem_block(3);
        let mut reference = vec![vec![0.0; cols]; rows];
        for _ in 0..count {
            let i = rng.gen_range(0..rows);
            let j = rng.gen_range(0..cols);
            let v: f64 = rng.gen_range(-5.0..5.0);
            if rng.gen::<bool>() {
                m.set(i, j, v).unwrap();
                reference[i][j] = v;
            } else {
                m.add_to(i, j, v).unwrap();
                reference[i][j] += v;
            }
        }
        // column-wise pushes after element insertion
        let col = rng.gen_range(0..cols);
        let dense: Vector = (0..rows).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        m.add_col(&dense, col).unwrap();
        for i in (0..rows).step_by(2) {
            reference[i][col] += 1.0;
        }

        prop_assert!(m.check_consistency().is_ok());
        let pattern = m.pattern();
        for j in 0..cols {
            let r = pattern.column(j);
            prop_assert!(r.windows(2).all(|w| w[0] < w[1]), "column {} unsorted", j);
        }
        prop_assert!(pattern.colptr().windows(2).all(|w| w[0] <= w[1]));
        for i in 0..rows {
            for j in 0..cols {
                prop_assert!((m.get(i, j) - reference[i][j]).abs() < 1e-12);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 6. Symbolic analysis depends on the pattern only
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_symbolic_reuse_across_values(
        n in 1usize..25,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = random_spd(&mut rng, n, 0.2, 1.0);
        let symbolic = SymbolicCholesky::analyze(&a.pattern(), Ordering::MinimumDegree).unwrap();
        let scaled = a.scale(3.0);
        prop_assert!(symbolic.matches(&scaled.pattern()));

        let mut solver = SparseCholesky::new(Ordering::MinimumDegree).with_compression(false);
        let b = random_vector(&mut rng, n);
        let x1 = solver.solve(&a, &b).unwrap();
        let x3 = solver.solve(&scaled, &b).unwrap();
        prop_assert_eq!(solver.analyses(), 1);
        for i in 0..n {
            prop_assert!((x1[i] - 3.0 * x3[i]).abs() < 1e-8 * (1.0 + x1[i].abs()));
        }
    }
}
