use core::cmp::Ordering;
use core::fmt::{self, Debug, Display};
use core::hash::Hash;

use crate::domains::is_at_least_as_precise;

/// Anything a property can be about: a method, a field, a class, an
/// allocation site. The store only needs value equality and hashing, and
/// interns every entity into a dense [`EntityId`].
pub trait Entity: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> Entity for T {}

/// The values stored in a [`crate::store::PropertyStore`]. One type covers
/// all property kinds of a run (typically an enum with one variant per
/// kind); [`PropertyValue::kind`] tells them apart.
///
/// The [`PartialOrd`] implementation is the precision order of the kind:
/// `a <= b` means `a` is at least as precise as `b`. Values of different
/// kinds must be incomparable.
pub trait PropertyValue: Clone + Debug + PartialEq + PartialOrd + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Dense handle of an interned entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

/// Dense handle of a registered property kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId(pub(crate) u16);

/// Handle of an (entity, kind) pair, the key of the slot table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpkId {
    pub entity: EntityId,
    pub kind: KindId,
}

impl Display for EpkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}", self.entity.0, self.kind.0)
    }
}

/// What the store currently knows about an (entity, kind) pair.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyState<P> {
    /// Nothing computed yet. Returned while a lazy computation is pending.
    NoValue,
    /// A refinable estimate. `optimistic` is the most precise value that is
    /// still possible (the upper bound in "better-than" terms), `pessimistic`
    /// the most conservative one (the lower bound). The real value lies
    /// between them: `optimistic <= pessimistic`.
    Interim { pessimistic: P, optimistic: P },
    /// Cannot change any more.
    Final(P),
}

impl<P> PropertyState<P> {
    pub fn is_final(&self) -> bool {
        matches!(self, PropertyState::Final(_))
    }

    pub fn has_value(&self) -> bool {
        !matches!(self, PropertyState::NoValue)
    }

    pub fn final_value(&self) -> Option<&P> {
        match self {
            PropertyState::Final(p) => Some(p),
            _ => None,
        }
    }

    /// The most precise value still possible. For final properties, the value.
    pub fn optimistic(&self) -> Option<&P> {
        match self {
            PropertyState::NoValue => None,
            PropertyState::Interim { optimistic, .. } => Some(optimistic),
            PropertyState::Final(p) => Some(p),
        }
    }

    /// The most conservative value still possible. For final properties, the value.
    pub fn pessimistic(&self) -> Option<&P> {
        match self {
            PropertyState::NoValue => None,
            PropertyState::Interim { pessimistic, .. } => Some(pessimistic),
            PropertyState::Final(p) => Some(p),
        }
    }
}

impl<P: Debug> Display for PropertyState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyState::NoValue => write!(f, "<no value>"),
            PropertyState::Interim {
                pessimistic,
                optimistic,
            } => write!(f, "Interim({optimistic:?}..{pessimistic:?})"),
            PropertyState::Final(p) => write!(f, "Final({p:?})"),
        }
    }
}

/// Entity, kind and state: the unit exchanged between the store and the
/// computations. Dependees of an interim result are given as the `Eps`
/// the computation based its result on.
#[derive(Clone, Debug, PartialEq)]
pub struct Eps<E, P: PropertyValue> {
    pub entity: E,
    pub kind: P::Kind,
    pub state: PropertyState<P>,
}

impl<E, P: PropertyValue> Eps<E, P> {
    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn has_value(&self) -> bool {
        self.state.has_value()
    }

    pub fn final_value(&self) -> Option<&P> {
        self.state.final_value()
    }

    pub fn optimistic(&self) -> Option<&P> {
        self.state.optimistic()
    }

    pub fn pessimistic(&self) -> Option<&P> {
        self.state.pessimistic()
    }
}

impl<E: Debug, P: PropertyValue> Display for Eps<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:?}: {}", self.entity, self.kind, self.state)
    }
}

/// Why a property was resolved to a fallback instead of by an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// No analysis (eager or lazy) was registered for the kind.
    NoAnalysisScheduled,
    /// Some analysis exists for the kind, but it never produced a value for
    /// the entity.
    NotComputed,
    /// The entity took part in a cycle of interim results that could not be
    /// resolved by the analyses themselves.
    Cycle,
}

impl Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoAnalysisScheduled => write!(f, "no analysis scheduled"),
            FallbackReason::NotComputed => write!(f, "not computed"),
            FallbackReason::Cycle => write!(f, "cyclic dependency"),
        }
    }
}

/// How to turn an interim property into a final one when it is stuck on a
/// dependency cycle. Which one is sound depends on the analysis, so every
/// kind picks one explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleResolution {
    /// Commit the optimistic bound. Sound for analyses whose optimistic
    /// assumption is the greatest fixpoint, e.g., "all methods on the cycle
    /// are pure unless something on it is not".
    Optimistic,
    /// Commit the pessimistic bound.
    Pessimistic,
    /// Ignore the bounds and use the kind's fallback value.
    Fallback,
}

/// Registration data of a property kind.
#[derive(Clone, Debug)]
pub struct KindSpec<P: PropertyValue> {
    pub kind: P::Kind,
    pub name: &'static str,
    pub fallback: P,
    pub cycle_resolution: CycleResolution,
}

impl<P: PropertyValue> KindSpec<P> {
    pub fn new(
        name: &'static str,
        fallback: P,
        cycle_resolution: CycleResolution,
    ) -> Self {
        Self {
            kind: fallback.kind(),
            name,
            fallback,
            cycle_resolution,
        }
    }

    /// The value committed for a slot that is stuck in `state`.
    pub(crate) fn resolve(&self, state: &PropertyState<P>) -> (P, FallbackReason) {
        match state {
            PropertyState::Final(p) => (p.clone(), FallbackReason::Cycle),
            PropertyState::NoValue => (self.fallback.clone(), FallbackReason::NotComputed),
            PropertyState::Interim {
                pessimistic,
                optimistic,
            } => {
                let value = match self.cycle_resolution {
                    CycleResolution::Optimistic => optimistic.clone(),
                    CycleResolution::Pessimistic => pessimistic.clone(),
                    CycleResolution::Fallback => self.fallback.clone(),
                };
                (value, FallbackReason::Cycle)
            }
        }
    }
}

/// Outcome of checking an update against the stored state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Refinement {
    Changed,
    Unchanged,
}

/// Checks that `new` may replace `old`: interim bounds in order and only
/// moving towards each other, final values within the previous bounds,
/// final values never changing. The error is a human readable description
/// of the violated rule.
pub(crate) fn check_refinement<P: PartialOrd + Debug>(
    old: &PropertyState<P>,
    new: &PropertyState<P>,
) -> Result<Refinement, String> {
    use PropertyState::*;

    if let Interim {
        pessimistic,
        optimistic,
    } = new
    {
        if !is_at_least_as_precise(optimistic, pessimistic) {
            return Err(format!(
                "optimistic bound {optimistic:?} is not below pessimistic bound {pessimistic:?}"
            ));
        }
    }

    match (old, new) {
        (_, NoValue) => Err("a property cannot be reset".to_owned()),
        (NoValue, _) => Ok(Refinement::Changed),
        (Final(before), Final(after)) => {
            if before.partial_cmp(after) == Some(Ordering::Equal) {
                Ok(Refinement::Unchanged)
            } else {
                Err(format!(
                    "final property {before:?} cannot change to {after:?}"
                ))
            }
        }
        (Final(before), Interim { .. }) => Err(format!(
            "final property {before:?} cannot become interim again"
        )),
        (
            Interim {
                pessimistic: old_pes,
                optimistic: old_opt,
            },
            Interim {
                pessimistic,
                optimistic,
            },
        ) => {
            if !is_at_least_as_precise(old_opt, optimistic) {
                return Err(format!(
                    "optimistic bound regressed from {old_opt:?} to {optimistic:?}"
                ));
            }
            if !is_at_least_as_precise(pessimistic, old_pes) {
                return Err(format!(
                    "pessimistic bound regressed from {old_pes:?} to {pessimistic:?}"
                ));
            }
            if old_opt.partial_cmp(optimistic) == Some(Ordering::Equal)
                && old_pes.partial_cmp(pessimistic) == Some(Ordering::Equal)
            {
                Ok(Refinement::Unchanged)
            } else {
                Ok(Refinement::Changed)
            }
        }
        (
            Interim {
                pessimistic,
                optimistic,
            },
            Final(value),
        ) => {
            if is_at_least_as_precise(optimistic, value) && is_at_least_as_precise(value, pessimistic)
            {
                Ok(Refinement::Changed)
            } else {
                Err(format!(
                    "final value {value:?} is outside of the bounds {optimistic:?}..{pessimistic:?}"
                ))
            }
        }
    }
}
