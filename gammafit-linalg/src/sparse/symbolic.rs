#![allow(clippy::needless_range_loop)]
//! Symbolic phase of the sparse Cholesky factorisation.
//!
//! Works on a [`SparsityPattern`] only: computes a fill-reducing
//! ordering, the elimination tree of the permuted matrix, its postorder
//! and the column counts of `L`. The result is reusable for any matrix
//! with the same pattern.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pattern::SparsityPattern;
use crate::error::{LinalgError, Result};

/// Fill-reducing ordering applied before factorisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ordering {
    /// Factorise in the given column order.
    Natural,
    /// Minimum degree on the graph of `A + A'`.
    #[default]
    MinimumDegree,
}

/// Pattern-only analysis shared by all numeric factorisations of
/// matrices with the same structure.
#[derive(Debug, Clone)]
pub struct SymbolicCholesky {
    n: usize,
    ordering: Ordering,
    pattern: SparsityPattern,
    /// `perm[k]`: original index eliminated at step k.
    perm: Option<Vec<usize>>,
    /// `pinv[i]`: elimination step of original index i.
    pinv: Option<Vec<usize>>,
    parent: Vec<Option<usize>>,
    postorder: Vec<usize>,
    lcolptr: Vec<usize>,
}

impl SymbolicCholesky {
    /// Analyse a square pattern. Only the upper triangle is read.
    pub fn analyze(pattern: &SparsityPattern, ordering: Ordering) -> Result<Self> {
        if pattern.nrows() != pattern.ncols() {
            return Err(LinalgError::NotSquare {
                rows: pattern.nrows(),
                cols: pattern.ncols(),
            });
        }
        let n = pattern.ncols();
        let perm = match ordering {
            Ordering::Natural => None,
            Ordering::MinimumDegree => Some(minimum_degree(pattern)),
        };
        let pinv = perm.as_deref().map(invert_permutation);

        let (cp, ci, _) = symperm_upper(n, pattern.colptr(), pattern.rowind(), None, pinv.as_deref());
        let parent = etree(n, &cp, &ci);
        let postorder = postorder(&parent);
        let counts = column_counts(n, &cp, &ci, &parent);

        let mut lcolptr = Vec::with_capacity(n + 1);
        lcolptr.push(0);
        for c in &counts {
            lcolptr.push(lcolptr[lcolptr.len() - 1] + c);
        }

        debug!(
            "Symbolic Cholesky: n={}, nnz(A)={}, nnz(L)={}, ordering={:?}",
            n,
            pattern.nnz(),
            lcolptr[n],
            ordering
        );

        Ok(Self {
            n,
            ordering,
            pattern: pattern.clone(),
            perm,
            pinv,
            parent,
            postorder,
            lcolptr,
        })
    }

    /// Whether this analysis applies to a matrix with `pattern`.
    pub fn matches(&self, pattern: &SparsityPattern) -> bool {
        self.pattern == *pattern
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn perm(&self) -> Option<&[usize]> {
        self.perm.as_deref()
    }

    pub fn pinv(&self) -> Option<&[usize]> {
        self.pinv.as_deref()
    }

    /// Elimination tree of the permuted matrix; `None` marks a root.
    pub fn parent(&self) -> &[Option<usize>] {
        &self.parent
    }

    pub fn postorder(&self) -> &[usize] {
        &self.postorder
    }

    /// Number of non-zeros in `L`, diagonal included.
    pub fn lnz(&self) -> usize {
        self.lcolptr[self.n]
    }

    pub fn col_counts(&self) -> Vec<usize> {
        self.lcolptr.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub(crate) fn lcolptr(&self) -> &[usize] {
        &self.lcolptr
    }

    /// Original index of the column eliminated at step `k`.
    pub fn original_index(&self, k: usize) -> usize {
        self.perm.as_ref().map_or(k, |p| p[k])
    }
}

pub(crate) fn invert_permutation(p: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; p.len()];
    for (k, &i) in p.iter().enumerate() {
        inv[i] = k;
    }
    inv
}

/// Upper triangle of `P A P'` from the upper triangle of `A`.
///
/// Row indices inside a column come out unsorted. Values are carried
/// along when given.
pub(crate) fn symperm_upper(
    n: usize,
    colptr: &[usize],
    rowind: &[usize],
    values: Option<&[f64]>,
    pinv: Option<&[usize]>,
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let map = |i: usize| pinv.map_or(i, |p| p[i]);

    let mut next = vec![0usize; n + 1];
    for j in 0..n {
        let j2 = map(j);
        for p in colptr[j]..colptr[j + 1] {
            let i = rowind[p];
            if i > j {
                continue;
            }
            next[map(i).max(j2) + 1] += 1;
        }
    }
    for k in 0..n {
        next[k + 1] += next[k];
    }
    let cp = next.clone();
    let nnz = cp[n];
    let mut ci = vec![0; nnz];
    let mut cx = if values.is_some() {
        vec![0.0; nnz]
    } else {
        Vec::new()
    };
    for j in 0..n {
        let j2 = map(j);
        for p in colptr[j]..colptr[j + 1] {
            let i = rowind[p];
            if i > j {
                continue;
            }
            let i2 = map(i);
            let col = i2.max(j2);
            let q = next[col];
            next[col] += 1;
            ci[q] = i2.min(j2);
            if let Some(v) = values {
                cx[q] = v[p];
            }
        }
    }
    (cp, ci, cx)
}

/// Elimination tree of a symmetric matrix given by its upper triangle,
/// using path compression through an ancestor array.
pub(crate) fn etree(n: usize, cp: &[usize], ci: &[usize]) -> Vec<Option<usize>> {
    let mut parent = vec![None; n];
    let mut ancestor: Vec<Option<usize>> = vec![None; n];
    for k in 0..n {
        for p in cp[k]..cp[k + 1] {
            let mut i = Some(ci[p]);
            while let Some(node) = i {
                if node >= k {
                    break;
                }
                let next = ancestor[node];
                ancestor[node] = Some(k);
                if next.is_none() {
                    parent[node] = Some(k);
                }
                i = next;
            }
        }
    }
    parent
}

/// Non-zero pattern of row `k` of `L` (excluding the diagonal), in an
/// order where every node precedes its ancestors in the elimination tree.
///
/// `marks` must hold values different from `stamp` for all nodes on entry;
/// using the row index as stamp keeps successive calls independent.
#[allow(clippy::too_many_arguments)]
pub(crate) fn ereach(
    cp: &[usize],
    ci: &[usize],
    k: usize,
    parent: &[Option<usize>],
    marks: &mut [usize],
    stamp: usize,
    path: &mut Vec<usize>,
    out: &mut Vec<usize>,
) {
    out.clear();
    marks[k] = stamp;
    for p in cp[k]..cp[k + 1] {
        let mut i = ci[p];
        if i > k {
            continue;
        }
        path.clear();
        while marks[i] != stamp {
            path.push(i);
            marks[i] = stamp;
            match parent[i] {
                Some(up) => i = up,
                None => break,
            }
        }
        out.extend(path.iter().rev());
    }
    out.reverse();
}

/// Column counts of `L` from the row subtrees.
fn column_counts(n: usize, cp: &[usize], ci: &[usize], parent: &[Option<usize>]) -> Vec<usize> {
    let mut counts = vec![1usize; n];
    let mut marks = vec![usize::MAX; n];
    let mut path = Vec::new();
    let mut reach = Vec::new();
    for k in 0..n {
        ereach(cp, ci, k, parent, &mut marks, k, &mut path, &mut reach);
        for &i in &reach {
            counts[i] += 1;
        }
    }
    counts
}

/// Depth-first postorder of a forest; children are visited in index order.
pub fn postorder(parent: &[Option<usize>]) -> Vec<usize> {
    let n = parent.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for j in 0..n {
        if let Some(p) = parent[j] {
            children[p].push(j);
        }
    }
    let mut post = Vec::with_capacity(n);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for root in (0..n).filter(|&j| parent[j].is_none()) {
        stack.push((root, 0));
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if next < children[node].len() {
                top.1 += 1;
                stack.push((children[node][next], 0));
            } else {
                post.push(node);
                stack.pop();
            }
        }
    }
    post
}

/// Minimum-degree ordering of the graph of `A + A'`.
///
/// Exact elimination-graph variant: the node of smallest current degree
/// (lowest index on ties) is eliminated and its neighbours become a
/// clique. Rows denser than `max(16, 10 sqrt(n))` are ordered last.
pub fn minimum_degree(pattern: &SparsityPattern) -> Vec<usize> {
    let n = pattern.ncols().min(pattern.nrows());
    let mut adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for j in 0..n {
        for &i in pattern.column(j) {
            if i != j && i < n {
                adj[i].insert(j);
                adj[j].insert(i);
            }
        }
    }

    let threshold = 16usize.max((10.0 * (n as f64).sqrt()) as usize);
    let dense: Vec<usize> = (0..n).filter(|&i| adj[i].len() > threshold).collect();
    for &d in &dense {
        let nbrs = std::mem::take(&mut adj[d]);
        for u in nbrs {
            adj[u].remove(&d);
        }
    }
    let mut is_dense = vec![false; n];
    for &d in &dense {
        is_dense[d] = true;
    }

    let mut queue: BTreeSet<(usize, usize)> = (0..n)
        .filter(|&i| !is_dense[i])
        .map(|i| (adj[i].len(), i))
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some((_, v)) = queue.pop_first() {
        order.push(v);
        let nbrs: Vec<usize> = std::mem::take(&mut adj[v]).into_iter().collect();
        for &u in &nbrs {
            queue.remove(&(adj[u].len(), u));
            adj[u].remove(&v);
        }
        for &u in &nbrs {
            for &w in &nbrs {
                if w != u {
                    adj[u].insert(w);
                }
            }
        }
        for &u in &nbrs {
            queue.insert((adj[u].len(), u));
        }
    }
    order.extend(dense);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseMatrix;

    /// Arrow matrix: dense first row/column plus diagonal.
    fn arrow(n: usize) -> SparsityPattern {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for i in 0..n {
            rows.push(i);
            cols.push(i);
            if i > 0 {
                rows.push(0);
                cols.push(i);
                rows.push(i);
                cols.push(0);
            }
        }
        let vals = vec![1.0; rows.len()];
        SparseMatrix::from_triplets(n, n, &rows, &cols, &vals)
            .unwrap()
            .pattern()
    }

    #[test]
    fn test_etree_tridiagonal() {
        let n = 5;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for i in 0..n {
            rows.push(i);
            cols.push(i);
            if i + 1 < n {
                rows.push(i);
                cols.push(i + 1);
            }
        }
        let vals = vec![1.0; rows.len()];
        let p = SparseMatrix::from_triplets(n, n, &rows, &cols, &vals)
            .unwrap()
            .pattern();
        let s = SymbolicCholesky::analyze(&p, Ordering::Natural).unwrap();
        assert_eq!(
            s.parent(),
            &[Some(1), Some(2), Some(3), Some(4), None]
        );
        assert_eq!(s.lnz(), 2 * n - 1);
        assert_eq!(s.postorder(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_arrow_natural_fills_in() {
        let n = 6;
        let s = SymbolicCholesky::analyze(&arrow(n), Ordering::Natural).unwrap();
        // eliminating the hub first makes L dense
        assert_eq!(s.lnz(), n * (n + 1) / 2);
    }

    #[test]
    fn test_arrow_minimum_degree_avoids_fill() {
        let n = 6;
        let s = SymbolicCholesky::analyze(&arrow(n), Ordering::MinimumDegree).unwrap();
        assert_eq!(s.lnz(), 2 * n - 1);
        // the hub waits until only one other node is left
        assert!(s.original_index(n - 1) == 0 || s.original_index(n - 2) == 0);
        let pinv = s.pinv().unwrap();
        let perm = s.perm().unwrap();
        for k in 0..n {
            assert_eq!(pinv[perm[k]], k);
        }
    }

    #[test]
    fn test_postorder_children_first() {
        let parent = vec![Some(2), Some(2), Some(4), Some(4), None, None];
        let post = postorder(&parent);
        assert_eq!(post.len(), parent.len());
        let mut position = vec![0; parent.len()];
        for (k, &j) in post.iter().enumerate() {
            position[j] = k;
        }
        for j in 0..parent.len() {
            if let Some(p) = parent[j] {
                assert!(position[j] < position[p]);
            }
        }
    }

    #[test]
    fn test_matches_pattern() {
        let p = arrow(4);
        let s = SymbolicCholesky::analyze(&p, Ordering::MinimumDegree).unwrap();
        assert!(s.matches(&p));
        assert!(!s.matches(&arrow(5)));
    }

    #[test]
    fn test_empty_pattern() {
        let p = SparseMatrix::new(0, 0).pattern();
        let s = SymbolicCholesky::analyze(&p, Ordering::MinimumDegree).unwrap();
        assert_eq!(s.n(), 0);
        assert_eq!(s.lnz(), 0);
    }

    #[test]
    fn test_rejects_rectangular() {
        let p = SparseMatrix::new(2, 3).pattern();
        assert!(matches!(
            SymbolicCholesky::analyze(&p, Ordering::Natural),
            Err(LinalgError::NotSquare { rows: 2, cols: 3 })
        ));
    }
}
