use core::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::context::{AnalysisContext, Config};
use crate::domains::{FiniteElement, FiniteLattice, JoinSemiLatticeNoContext};
use crate::error::ComputationError;
use crate::property::{CycleResolution, Entity, Eps, KindSpec, PropertyValue};
use crate::result::{
    ComputationFn, ComputationResult, Continuation, ContinuationFn, PropertyComputation,
};
use crate::store::PropertyStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purity {
    Pure,
    SideEffectFree,
    Impure,
}

impl crate::domains::JoinSemiLattice for Purity {
    type LatticeContext = ();

    fn bottom(_: &()) -> Self {
        Purity::Pure
    }

    fn join(&self, other: &Self, _: &()) -> Self {
        (*self).max(*other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Escape {
    NoEscape,
    ViaParameter,
    ViaReturn,
    GlobalEscape,
}

static ESCAPE: LazyLock<Arc<FiniteLattice<Escape>>> = LazyLock::new(|| {
    use Escape::*;
    FiniteLattice::new(
        &[GlobalEscape, ViaParameter, ViaReturn, NoEscape],
        &[
            (NoEscape, ViaParameter),
            (NoEscape, ViaReturn),
            (ViaParameter, GlobalEscape),
            (ViaReturn, GlobalEscape),
        ],
    )
    .unwrap()
});

/// Elements of one lattice only compare to each other, so every test
/// shares this instance.
pub fn escape(value: Escape) -> Prop {
    Prop::Escape(ESCAPE.element(&value).unwrap())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Purity,
    Count,
    Escape,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Prop {
    Purity(Purity),
    /// Smaller is more precise.
    Count(u32),
    Escape(FiniteElement<Escape>),
}

impl PartialOrd for Prop {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Prop::Purity(lhs), Prop::Purity(rhs)) => lhs.partial_cmp(rhs),
            (Prop::Count(lhs), Prop::Count(rhs)) => lhs.partial_cmp(rhs),
            (Prop::Escape(lhs), Prop::Escape(rhs)) => lhs.partial_cmp(rhs),
            _ => None,
        }
    }
}

impl PropertyValue for Prop {
    type Kind = Kind;

    fn kind(&self) -> Kind {
        match self {
            Prop::Purity(_) => Kind::Purity,
            Prop::Count(_) => Kind::Count,
            Prop::Escape(_) => Kind::Escape,
        }
    }
}

pub fn context(threads: usize) -> AnalysisContext {
    AnalysisContext::new(
        Config::default()
            .with_cpu_threads(threads)
            .with_io_threads(1),
    )
    .unwrap()
}

pub fn new_store<E: Entity>(
    ctx: &AnalysisContext,
    cycles: CycleResolution,
) -> PropertyStore<'_, E, Prop> {
    let mut store = PropertyStore::new(ctx);
    store
        .register_kind(KindSpec::new("purity", Prop::Purity(Purity::Impure), cycles))
        .unwrap();
    store
        .register_kind(KindSpec::new(
            "count",
            Prop::Count(u32::MAX),
            CycleResolution::Pessimistic,
        ))
        .unwrap();
    store
        .register_kind(KindSpec::new(
            "escape",
            escape(Escape::GlobalEscape),
            CycleResolution::Fallback,
        ))
        .unwrap();
    store
}

pub type Store<'ctx> = PropertyStore<'ctx, &'static str, Prop>;

pub type Outcome = Result<ComputationResult<&'static str, Prop>, ComputationError>;

pub fn computation<F>(func: F) -> ComputationFn<F, &'static str, Prop>
where
    F: Fn(&&'static str, &Store<'_>) -> Outcome + Send + Sync,
{
    ComputationFn::new(func)
}

pub fn continuation<F>(name: &'static str, func: F) -> ContinuationFn<F, &'static str, Prop>
where
    F: FnMut(&Eps<&'static str, Prop>, &Store<'_>) -> Outcome + Send + Sync,
{
    ContinuationFn::new(name, func)
}

pub fn final_purity(entity: &'static str, purity: Purity) -> Outcome {
    Ok(ComputationResult::final_result(entity, Prop::Purity(purity)))
}

pub fn purity_of(eps: &Eps<impl Entity, Prop>) -> Option<Purity> {
    match eps.final_value() {
        Some(Prop::Purity(purity)) => Some(*purity),
        _ => None,
    }
}

fn optimistic_purity<E: Entity>(eps: &Eps<E, Prop>) -> Purity {
    match eps.optimistic() {
        Some(Prop::Purity(purity)) => *purity,
        _ => Purity::Pure,
    }
}

/// Purity over a call graph: a method is as pure as the join of its own
/// effect and the purity of everything it calls.
#[derive(Clone, Debug)]
pub struct CallGraph<E: Entity> {
    pub calls: Arc<HashMap<E, Vec<E>>>,
    pub own: Arc<HashMap<E, Purity>>,
}

impl<E: Entity> CallGraph<E> {
    pub fn new(edges: &[(E, E)], own: &[(E, Purity)]) -> Self {
        let mut calls: HashMap<E, Vec<E>> = HashMap::new();
        for (caller, callee) in edges {
            calls.entry(caller.clone()).or_default().push(callee.clone());
        }
        Self {
            calls: Arc::new(calls),
            own: Arc::new(own.iter().cloned().collect()),
        }
    }

    pub fn methods(&self) -> Vec<E> {
        let mut seen = HashSet::new();
        let mut methods = Vec::new();
        let callees = self.calls.iter().flat_map(|(m, cs)| std::iter::once(m).chain(cs));
        for method in self.own.keys().chain(callees) {
            if seen.insert(method.clone()) {
                methods.push(method.clone());
            }
        }
        methods
    }

    /// The join of the own effects of everything reachable from `method`.
    pub fn expected(&self, method: &E) -> Purity {
        let mut seen = HashSet::from([method.clone()]);
        let mut stack = vec![method.clone()];
        let mut purity = Purity::Pure;
        while let Some(current) = stack.pop() {
            purity = purity.join_(self.own.get(&current).unwrap_or(&Purity::Pure));
            for callee in self.calls.get(&current).into_iter().flatten() {
                if seen.insert(callee.clone()) {
                    stack.push(callee.clone());
                }
            }
        }
        purity
    }
}

impl<E: Entity> PropertyComputation<E, Prop> for CallGraph<E> {
    fn compute(
        &self,
        method: &E,
        store: &PropertyStore<'_, E, Prop>,
    ) -> Result<ComputationResult<E, Prop>, ComputationError> {
        let mut state = PurityState {
            method: method.clone(),
            known: *self.own.get(method).unwrap_or(&Purity::Pure),
            dependees: Vec::new(),
        };
        for callee in self.calls.get(method).into_iter().flatten() {
            let eps = store.get(callee, Kind::Purity);
            match purity_of(&eps) {
                Some(purity) => state.known = state.known.join_(&purity),
                None => state.dependees.push(eps),
            }
        }
        Ok(state.result())
    }
}

/// A method waiting for the purity of some of its callees.
#[derive(Debug)]
pub struct PurityState<E: Entity> {
    method: E,
    /// Join of the own effect and all final callees.
    known: Purity,
    dependees: Vec<Eps<E, Prop>>,
}

impl<E: Entity> PurityState<E> {
    fn optimistic(&self) -> Purity {
        self.dependees
            .iter()
            .fold(self.known, |acc, eps| acc.join_(&optimistic_purity(eps)))
    }

    fn result(self) -> ComputationResult<E, Prop> {
        if self.known == Purity::Impure || self.dependees.is_empty() {
            return ComputationResult::final_result(self.method, Prop::Purity(self.known));
        }
        ComputationResult::interim(
            self.method.clone(),
            Prop::Purity(Purity::Impure),
            Prop::Purity(self.optimistic()),
            self.dependees.clone(),
            self,
        )
    }
}

impl<E: Entity> Continuation<E, Prop> for PurityState<E> {
    fn resume(
        &mut self,
        updated: &Eps<E, Prop>,
        _store: &PropertyStore<'_, E, Prop>,
    ) -> Result<ComputationResult<E, Prop>, ComputationError> {
        let before = self.optimistic();
        let Some(index) = self
            .dependees
            .iter()
            .position(|eps| eps.entity == updated.entity)
        else {
            return Err(ComputationError::msg("woken by an unknown dependee"));
        };
        match purity_of(updated) {
            Some(purity) => {
                self.known = self.known.join_(&purity);
                self.dependees.remove(index);
            }
            None => self.dependees[index] = updated.clone(),
        }
        if !updated.is_final() && self.optimistic() == before {
            return Ok(ComputationResult::NoResult);
        }
        let state = PurityState {
            method: self.method.clone(),
            known: self.known,
            dependees: std::mem::take(&mut self.dependees),
        };
        Ok(state.result())
    }
}
