use core::cmp::Ordering;
use core::fmt::Display;
use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use propstore::{
    context::AnalysisContext,
    domains::{JoinSemiLattice, Lattice},
    error::{PhaseError, StoreError},
    property::{CycleResolution, FallbackReason, KindSpec, PropertyValue},
    scheduler::PhaseReport,
    store::PropertyStore,
};
use tracing::info;

use crate::program::{Entity, FactSource};

pub mod class_immutability;
pub mod field_mutability;
pub mod purity;

#[cfg(test)]
mod analysis_tests;

/// How much a method may affect or depend on the heap. Listed from the most
/// to the least precise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purity {
    /// Reads only fields that never change after construction.
    Pure,
    /// Does not change the heap, but may read mutable state or allocate.
    SideEffectFree,
    Impure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldMutability {
    DeclaredFinal,
    /// Not declared final, but only written by constructors of its class.
    EffectivelyFinal,
    Mutable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassImmutability {
    Immutable,
    Mutable,
}

macro_rules! chain_lattice {
    ($name:ident, $bottom:expr, $top:expr) => {
        impl JoinSemiLattice for $name {
            type LatticeContext = ();

            fn bottom(_: &()) -> Self {
                $bottom
            }

            fn join(&self, other: &Self, _: &()) -> Self {
                (*self).max(*other)
            }
        }

        impl Lattice for $name {
            fn top(_: &()) -> Self {
                $top
            }

            fn meet(&self, other: &Self, _: &()) -> Self {
                (*self).min(*other)
            }
        }
    };
}

chain_lattice!(Purity, Purity::Pure, Purity::Impure);
chain_lattice!(
    FieldMutability,
    FieldMutability::DeclaredFinal,
    FieldMutability::Mutable
);
chain_lattice!(
    ClassImmutability,
    ClassImmutability::Immutable,
    ClassImmutability::Mutable
);

impl Display for Purity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Purity::Pure => write!(f, "pure"),
            Purity::SideEffectFree => write!(f, "side-effect free"),
            Purity::Impure => write!(f, "impure"),
        }
    }
}

impl Display for FieldMutability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FieldMutability::DeclaredFinal => write!(f, "declared final"),
            FieldMutability::EffectivelyFinal => write!(f, "effectively final"),
            FieldMutability::Mutable => write!(f, "mutable"),
        }
    }
}

impl Display for ClassImmutability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClassImmutability::Immutable => write!(f, "immutable"),
            ClassImmutability::Mutable => write!(f, "mutable"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKind {
    Purity,
    FieldMutability,
    ClassImmutability,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Purity(Purity),
    FieldMutability(FieldMutability),
    ClassImmutability(ClassImmutability),
}

impl PartialOrd for Property {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Property::Purity(lhs), Property::Purity(rhs)) => lhs.partial_cmp(rhs),
            (Property::FieldMutability(lhs), Property::FieldMutability(rhs)) => {
                lhs.partial_cmp(rhs)
            }
            (Property::ClassImmutability(lhs), Property::ClassImmutability(rhs)) => {
                lhs.partial_cmp(rhs)
            }
            _ => None,
        }
    }
}

impl PropertyValue for Property {
    type Kind = PropertyKind;

    fn kind(&self) -> PropertyKind {
        match self {
            Property::Purity(_) => PropertyKind::Purity,
            Property::FieldMutability(_) => PropertyKind::FieldMutability,
            Property::ClassImmutability(_) => PropertyKind::ClassImmutability,
        }
    }
}

impl Display for Property {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Property::Purity(p) => write!(f, "{p}"),
            Property::FieldMutability(m) => write!(f, "{m}"),
            Property::ClassImmutability(i) => write!(f, "{i}"),
        }
    }
}

pub type Store<'ctx> = PropertyStore<'ctx, Entity, Property>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Analyses {
    Purity,
    FieldMutability,
    ClassImmutability,
    All,
}

impl Analyses {
    fn reports(self, kind: PropertyKind) -> bool {
        match self {
            Analyses::All => true,
            Analyses::Purity => kind == PropertyKind::Purity,
            Analyses::FieldMutability => kind == PropertyKind::FieldMutability,
            Analyses::ClassImmutability => kind == PropertyKind::ClassImmutability,
        }
    }
}

/// The final properties of a run, rendered as `<entity>: <property>` lines
/// sorted by kind, then by name.
#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub lines: Vec<String>,
    pub report: PhaseReport,
}

/// Registers the three property kinds on a fresh store.
pub fn new_store(ctx: &AnalysisContext) -> Result<Store<'_>, StoreError> {
    let mut store = PropertyStore::new(ctx);
    let kinds = [
        KindSpec::new(
            "purity",
            Property::Purity(Purity::Impure),
            CycleResolution::Optimistic,
        ),
        KindSpec::new(
            "field mutability",
            Property::FieldMutability(FieldMutability::Mutable),
            CycleResolution::Pessimistic,
        ),
        KindSpec::new(
            "class immutability",
            Property::ClassImmutability(ClassImmutability::Mutable),
            CycleResolution::Pessimistic,
        ),
    ];
    for spec in kinds {
        store.register_kind(spec)?;
    }
    Ok(store)
}

/// Runs the selected analyses (and whatever they depend on) to completion.
pub fn run_analyses(
    facts: Arc<dyn FactSource>,
    ctx: &AnalysisContext,
    selection: Analyses,
) -> Result<AnalysisResults, PhaseError<Entity>> {
    let mut store = new_store(ctx)?;
    let report_fields = selection.reports(PropertyKind::FieldMutability);
    field_mutability::register(&mut store, Arc::clone(&facts), report_fields)?;
    if selection.reports(PropertyKind::Purity) {
        purity::schedule(&mut store, Arc::clone(&facts))?;
    }
    if selection.reports(PropertyKind::ClassImmutability) {
        class_immutability::schedule(&mut store, Arc::clone(&facts))?;
    }

    let report = store.wait_on_phase_completion()?;
    info!(
        tasks = report.tasks_executed,
        fallbacks = report.fallbacks,
        cycles = report.cycles_resolved,
        "analyses finished"
    );

    let fallbacks: HashMap<_, _> = store
        .fallback_log()
        .into_iter()
        .map(|(entity, kind, reason)| ((entity, kind), reason))
        .collect();
    let mut lines = Vec::new();
    for kind in [
        PropertyKind::Purity,
        PropertyKind::FieldMutability,
        PropertyKind::ClassImmutability,
    ] {
        if !selection.reports(kind) {
            continue;
        }
        let rendered = store
            .entities(kind)
            .into_iter()
            .map(|(entity, value)| {
                let name = facts.describe(entity);
                match fallbacks.get(&(entity, kind)) {
                    Some(reason) => format!("{name}: {value} ({})", fallback_note(*reason)),
                    None => format!("{name}: {value}"),
                }
            })
            .sorted();
        lines.extend(rendered);
    }
    Ok(AnalysisResults { lines, report })
}

fn fallback_note(reason: FallbackReason) -> &'static str {
    match reason {
        FallbackReason::NoAnalysisScheduled | FallbackReason::NotComputed => "fallback",
        FallbackReason::Cycle => "cycle",
    }
}
