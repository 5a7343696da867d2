use core::cmp::Ordering;
use core::fmt::Debug;
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use thiserror::Error;

use crate::domains::{JoinSemiLattice, Lattice};

/// The order of a finite lattice given by its Hasse diagram, partially based on:
/// ```txt
///   H. Aït-Kaci, R. Boyer, P. Lincoln, R. Nasr. Efficient implementation of
///   lattice operations. In ACM Transactions on Programming Languages and
///   Systems (TOPLAS), Volume 11, Issue 1, Jan. 1989, pages 115-146.
/// ```
///
/// Property kinds with a non-linear order (e.g., escape information where
/// "escapes via parameter" and "escapes via return" are incomparable) can
/// use [`FiniteElement`] as their value type. The elements share the order
/// through an [`Arc`], so comparisons do not need a context, which is what
/// the property store relies on.
#[derive(Debug)]
pub struct FiniteLattice<T> {
    elements: Vec<T>,
    // above[i] contains j iff elements[i] <= elements[j].
    above: Vec<FixedBitSet>,
    joins: Vec<usize>,
    meets: Vec<usize>,
    top: usize,
    bottom: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FiniteLatticeError {
    #[error("elements {0} and {1} have no least upper bound")]
    NoLeastUpperBound(usize, usize),
    #[error("elements {0} and {1} have no greatest lower bound")]
    NoGreatestLowerBound(usize, usize),
    #[error("elements {0} and {1} are on a cycle of the order")]
    NotAntisymmetric(usize, usize),
    #[error("a lattice needs at least two elements")]
    LatticeTooSmall,
    #[error("the same element is listed twice")]
    HasDuplicateElements,
    #[error("an edge refers to an element outside of the lattice")]
    NonExistentEdge,
}

impl<T: Clone + Debug + PartialEq> FiniteLattice<T> {
    /// Creating a lattice based on the Hasse diagram:
    ///
    /// ```txt
    ///        GlobalEscape
    ///         /       \
    ///   ViaParameter  ViaReturn
    ///         \       /
    ///          NoEscape
    /// ```
    ///
    /// Would be encoded as:
    /// ```
    /// use propstore::domains::FiniteLattice;
    /// #[derive(Debug, Clone, PartialEq)]
    /// enum Escape { NoEscape, ViaParameter, ViaReturn, GlobalEscape }
    /// use Escape::*;
    /// let lattice = FiniteLattice::new(
    ///   &[GlobalEscape, ViaParameter, ViaReturn, NoEscape],
    ///   &[(NoEscape, ViaParameter), (NoEscape, ViaReturn),
    ///     (ViaParameter, GlobalEscape), (ViaReturn, GlobalEscape)]).unwrap();
    /// let param = lattice.element(&ViaParameter).unwrap();
    /// let ret = lattice.element(&ViaReturn).unwrap();
    /// assert_eq!(param.partial_cmp(&ret), None);
    /// ```
    ///
    /// # Parameters
    ///
    /// * `elements`: List of lattice elements, in any order.
    /// * `less`: pairs of elements, the first element is smaller (more precise)
    ///   than the second.
    pub fn new(elements: &[T], less: &[(T, T)]) -> Result<Arc<Self>, FiniteLatticeError> {
        let mut less_indices = Vec::with_capacity(less.len());

        for (x, y) in less {
            let Some(from) = elements.iter().position(|i| i == x) else {
                return Err(FiniteLatticeError::NonExistentEdge);
            };
            let Some(to) = elements.iter().position(|i| i == y) else {
                return Err(FiniteLatticeError::NonExistentEdge);
            };

            less_indices.push((from, to));
        }

        Self::new_idx(elements, &less_indices)
    }

    /// Similar to [`FiniteLattice::new`], but edges are defined by indices
    /// into the first parameter.
    pub fn new_idx(
        elements: &[T],
        less: &[(usize, usize)],
    ) -> Result<Arc<Self>, FiniteLatticeError> {
        let n = elements.len();
        if n < 2 {
            return Err(FiniteLatticeError::LatticeTooSmall);
        }
        if (1..n).any(|i| elements[i..].contains(&elements[i - 1])) {
            return Err(FiniteLatticeError::HasDuplicateElements);
        }
        if less.iter().any(|&(x, y)| x >= n || y >= n) {
            return Err(FiniteLatticeError::NonExistentEdge);
        }

        let mut above = vec![FixedBitSet::with_capacity(n); n];
        for &(from, to) in less {
            above[from].insert(to);
        }
        reflexive_closure(&mut above);
        transitive_closure(&mut above);

        for i in 0..n {
            for j in (i + 1)..n {
                if above[i].contains(j) && above[j].contains(i) {
                    return Err(FiniteLatticeError::NotAntisymmetric(i, j));
                }
            }
        }

        let below = transpose(&above);
        let mut joins = vec![0; n * n];
        let mut meets = vec![0; n * n];
        for i in 0..n {
            for j in i..n {
                let mut upper = above[i].clone();
                upper.intersect_with(&above[j]);
                let lub = least_of(&upper, &above)
                    .ok_or(FiniteLatticeError::NoLeastUpperBound(i, j))?;
                let mut lower = below[i].clone();
                lower.intersect_with(&below[j]);
                let glb = least_of(&lower, &below)
                    .ok_or(FiniteLatticeError::NoGreatestLowerBound(i, j))?;
                joins[i * n + j] = lub;
                joins[j * n + i] = lub;
                meets[i * n + j] = glb;
                meets[j * n + i] = glb;
            }
        }

        let top = (1..n).fold(0, |acc, i| joins[acc * n + i]);
        let bottom = (1..n).fold(0, |acc, i| meets[acc * n + i]);

        Ok(Arc::new(Self {
            elements: elements.to_vec(),
            above,
            joins,
            meets,
            top,
            bottom,
        }))
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    /// Encodes a value, returns `None` when it is not part of the lattice.
    pub fn element(self: &Arc<Self>, value: &T) -> Option<FiniteElement<T>> {
        let index = self.elements.iter().position(|e| e == value)?;
        Some(self.at(index))
    }

    pub fn top_element(self: &Arc<Self>) -> FiniteElement<T> {
        self.at(self.top)
    }

    pub fn bottom_element(self: &Arc<Self>) -> FiniteElement<T> {
        self.at(self.bottom)
    }

    fn at(self: &Arc<Self>, index: usize) -> FiniteElement<T> {
        FiniteElement {
            index,
            lattice: Arc::clone(self),
        }
    }

    fn leq(&self, lhs: usize, rhs: usize) -> bool {
        self.above[lhs].contains(rhs)
    }

    fn join_idx(&self, lhs: usize, rhs: usize) -> usize {
        self.joins[lhs * self.elements.len() + rhs]
    }

    fn meet_idx(&self, lhs: usize, rhs: usize) -> usize {
        self.meets[lhs * self.elements.len() + rhs]
    }
}

/// An element of a [`FiniteLattice`]. Elements of different lattices are
/// never equal and never comparable.
#[derive(Clone)]
pub struct FiniteElement<T> {
    index: usize,
    lattice: Arc<FiniteLattice<T>>,
}

impl<T> FiniteElement<T> {
    pub fn value(&self) -> &T {
        &self.lattice.elements[self.index]
    }
}

impl<T> PartialEq for FiniteElement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && Arc::ptr_eq(&self.lattice, &other.lattice)
    }
}

impl<T> Eq for FiniteElement<T> {}

impl<T: Clone + Debug + PartialEq> PartialOrd for FiniteElement<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !Arc::ptr_eq(&self.lattice, &other.lattice) {
            return None;
        }
        match (
            self.lattice.leq(self.index, other.index),
            self.lattice.leq(other.index, self.index),
        ) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl<T: Debug> Debug for FiniteElement<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.lattice.elements[self.index])
    }
}

impl<T: Clone + Debug + PartialEq> JoinSemiLattice for FiniteElement<T> {
    type LatticeContext = Arc<FiniteLattice<T>>;

    fn bottom(ctx: &Self::LatticeContext) -> Self {
        ctx.bottom_element()
    }

    fn join(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        self.lattice.at(self.lattice.join_idx(self.index, other.index))
    }
}

impl<T: Clone + Debug + PartialEq> Lattice for FiniteElement<T> {
    fn top(ctx: &Self::LatticeContext) -> Self {
        ctx.top_element()
    }

    fn meet(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        self.lattice.at(self.lattice.meet_idx(self.index, other.index))
    }
}

// Returns the element of `candidates` that is below all other candidates
// according to `order`.
fn least_of(candidates: &FixedBitSet, order: &[FixedBitSet]) -> Option<usize> {
    candidates
        .ones()
        .find(|&c| candidates.is_subset(&order[c]))
}

fn reflexive_closure(bool_matrix: &mut [FixedBitSet]) {
    for (i, item) in bool_matrix.iter_mut().enumerate() {
        item.insert(i);
    }
}

fn transitive_closure(bool_matrix: &mut [FixedBitSet]) {
    let n = bool_matrix.len();
    for k in 0..n {
        for i in 0..n {
            if bool_matrix[i].contains(k) {
                let row = bool_matrix[k].clone();
                bool_matrix[i].union_with(&row);
            }
        }
    }
}

fn transpose(from: &[FixedBitSet]) -> Vec<FixedBitSet> {
    let n = from.len();
    let mut to = vec![FixedBitSet::with_capacity(n); n];
    for (i, row) in from.iter().enumerate() {
        for j in row.ones() {
            to[j].insert(i);
        }
    }
    to
}
