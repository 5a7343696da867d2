use core::cmp::Ordering;
use core::fmt::Debug;

/////////////////////////
// Traits for domains. //
/////////////////////////

/// A join semi-lattice is a partially ordered set where the least upper
/// bound exists for every subset. The ordering relation is read as "safe
/// approximation": `a <= b` means `b` describes everything `a` describes,
/// so `a` is at least as precise as `b`. For property values, Top is the
/// least precise answer (usually the fallback a kind falls back to when no
/// analysis can tell better), Bottom is the most precise one.
///
/// The property store itself only relies on [`PartialOrd`]; the lattice
/// operations are for analyses that combine facts, e.g., the purity of a
/// method is the join of its own effect and the purity of its callees.
pub trait JoinSemiLattice: PartialEq + PartialOrd + Clone + Debug {
    /// A type to hold some information about the lattice on the side.
    ///
    /// For some lattices, like the finite lattices built from a Hasse
    /// diagram, we need to store the order somewhere. When we need no such
    /// values, set this to unit.
    type LatticeContext;

    /// The unit element of the join operation, the most precise element.
    ///
    /// Required to be the smallest element according to the ordering.
    fn bottom(ctx: &Self::LatticeContext) -> Self;

    /// Computes the least upper bound of the two arguments. Combining
    /// two facts about an entity into a single safe description of both
    /// uses this operation.
    ///
    /// Requirements:
    /// * Reflexive: a.join(a, ctx) == a
    /// * Commutative: a.join(b, ctx) == b.join(a, ctx)
    /// * Bottom is unit: bottom.join(b, ctx) == b
    /// * Upper bound: a.join(b, ctx) >= a and a.join(b, ctx) >= b
    /// * Ordering is respected: a <= b => a.join(b, ctx) == b
    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self;
}

pub trait JoinSemiLatticeNoContext: JoinSemiLattice {
    /// See [JoinSemiLattice::bottom] for details. This version does not
    /// require a context.
    fn bottom_() -> Self;

    /// See [JoinSemiLattice::join] for details. This version does not
    /// require a context.
    fn join_(&self, other: &Self) -> Self;
}

impl<L: JoinSemiLattice<LatticeContext = ()>> JoinSemiLatticeNoContext for L {
    fn bottom_() -> Self {
        <L as JoinSemiLattice>::bottom(&())
    }

    fn join_(&self, other: &Self) -> Self {
        self.join(other, &())
    }
}

/// A lattice is a join semi-lattice that is also a meet semi-lattice, i.e.,
/// the greatest lower bound (meet) also exists for all subsets.
pub trait Lattice: JoinSemiLattice {
    /// The unit element of the meet operation, the largest (least precise)
    /// element of the lattice.
    fn top(ctx: &Self::LatticeContext) -> Self;

    /// Computes the greatest lower bound. Analyses use it to intersect
    /// independent pieces of evidence about the same entity.
    ///
    /// * Reflexive: a.meet(a, ctx) == a
    /// * Commutative: a.meet(b, ctx) == b.meet(a, ctx)
    /// * Top is unit: top.meet(b, ctx) == b
    /// * Lower bound: a.meet(b, ctx) <= a and a.meet(b, ctx) <= b
    /// * Ordering is respected: a <= b => a.meet(b, ctx) == a
    fn meet(&self, other: &Self, ctx: &Self::LatticeContext) -> Self;
}

pub trait LatticeNoContext: Lattice {
    /// See [Lattice::top] for details. This version does not
    /// require a context.
    fn top_() -> Self;

    /// See [Lattice::meet] for details. This version does not
    /// require a context.
    fn meet_(&self, other: &Self) -> Self;
}

impl<L: Lattice<LatticeContext = ()>> LatticeNoContext for L {
    fn top_() -> Self {
        <L as Lattice>::top(&())
    }

    fn meet_(&self, other: &Self) -> Self {
        self.meet(other, &())
    }
}

/// Joins all the elements, returns bottom for an empty iterator.
pub fn join_all<'a, L, I>(elements: I, ctx: &L::LatticeContext) -> L
where
    L: JoinSemiLattice + 'a,
    I: IntoIterator<Item = &'a L>,
{
    elements
        .into_iter()
        .fold(L::bottom(ctx), |acc, e| acc.join(e, ctx))
}

/// Returns true if `a <= b` holds, i.e., the values are comparable and
/// `a` is at least as precise as `b`.
pub fn is_at_least_as_precise<T: PartialOrd>(a: &T, b: &T) -> bool {
    matches!(a.partial_cmp(b), Some(Ordering::Less | Ordering::Equal))
}

/////////////////////////////////////
// Concrete domain implementations //
/////////////////////////////////////

/// The unit lattice is useful for testing, or as a placeholder for
/// properties that only record that something was computed.
impl JoinSemiLattice for () {
    type LatticeContext = ();

    fn bottom(&(): &Self::LatticeContext) -> Self {}

    fn join(&self, &(): &Self, &(): &Self::LatticeContext) -> Self {}
}

impl Lattice for () {
    fn top(&(): &Self::LatticeContext) -> Self {}

    fn meet(&self, &(): &Self, &(): &Self::LatticeContext) -> Self {}
}

/// Bool is a lattice, where false is bottom and true is top,
/// join is or, meet is and. Handy for "may" facts like "may escape".
impl JoinSemiLattice for bool {
    type LatticeContext = ();

    fn bottom(_ctx: &Self::LatticeContext) -> Self {
        false
    }

    fn join(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        *self || *other
    }
}

impl Lattice for bool {
    fn top(_ctx: &Self::LatticeContext) -> Self {
        true
    }

    fn meet(&self, other: &Self, _ctx: &Self::LatticeContext) -> Self {
        *self && *other
    }
}

mod finite;
pub use finite::*;

#[cfg(test)]
mod domains_tests;
