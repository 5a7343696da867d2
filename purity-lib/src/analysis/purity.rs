use std::sync::Arc;

use propstore::{
    domains::JoinSemiLatticeNoContext,
    error::{ComputationError, StoreError},
    property::Eps,
    result::{ComputationResult, Continuation, PropertyComputation},
};

use super::{FieldMutability, Property, PropertyKind, Purity, Store};
use crate::program::{Entity, FactSource, MethodId, Statement};

type Outcome = Result<ComputationResult<Entity, Property>, ComputationError>;

/// Schedules the purity analysis for every method of the program.
pub fn schedule(store: &mut Store<'_>, facts: Arc<dyn FactSource>) -> Result<(), StoreError> {
    let methods = facts.methods().into_iter().map(Entity::Method);
    store.schedule_eager(PropertyKind::Purity, methods, PurityAnalysis { facts })
}

/// What a property of a callee or of a read field means for the caller.
fn impact(property: &Property) -> Purity {
    match property {
        Property::Purity(purity) => *purity,
        Property::FieldMutability(FieldMutability::Mutable) => Purity::SideEffectFree,
        Property::FieldMutability(_) => Purity::Pure,
        // Never a dependee of purity.
        Property::ClassImmutability(_) => Purity::Impure,
    }
}

/// A method is as pure as the least pure thing it does. Writes and native
/// code make it impure, allocations and reads of mutable fields make it
/// side-effect free, calls inherit the purity of the callee.
pub struct PurityAnalysis {
    pub facts: Arc<dyn FactSource>,
}

impl PropertyComputation<Entity, Property> for PurityAnalysis {
    fn compute(&self, entity: &Entity, store: &Store<'_>) -> Outcome {
        let Entity::Method(method) = *entity else {
            return Err(ComputationError::msg(format!(
                "purity is only defined for methods, not {entity:?}"
            )));
        };

        let mut state = PurityState {
            method,
            known: Purity::Pure,
            dependees: Vec::new(),
        };
        for stmt in self.facts.statements(method) {
            match *stmt {
                Statement::Write(_) | Statement::Native => state.known = Purity::Impure,
                Statement::Alloc => state.known = state.known.join_(&Purity::SideEffectFree),
                Statement::Read(field) => {
                    state.observe(store.get(&Entity::Field(field), PropertyKind::FieldMutability));
                }
                // Recursion does not change the result.
                Statement::Call(callee) if callee == method => {}
                Statement::Call(callee) => {
                    state.observe(store.get(&Entity::Method(callee), PropertyKind::Purity));
                }
            }
            if state.known == Purity::Impure {
                break;
            }
        }
        Ok(state.result())
    }
}

/// A method waiting for the purity of some callees or the mutability of
/// some fields it reads.
#[derive(Debug)]
pub struct PurityState {
    method: MethodId,
    /// Join over the own effects and every final dependee.
    known: Purity,
    dependees: Vec<Eps<Entity, Property>>,
}

impl PurityState {
    fn observe(&mut self, eps: Eps<Entity, Property>) {
        if let Some(value) = eps.final_value() {
            self.known = self.known.join_(&impact(value));
            return;
        }
        let position = self
            .dependees
            .iter()
            .position(|d| d.entity == eps.entity && d.kind == eps.kind);
        match position {
            Some(i) => self.dependees[i] = eps,
            None => self.dependees.push(eps),
        }
    }

    /// Missing values are assumed to be as good as they can be.
    fn optimistic(&self) -> Purity {
        self.dependees.iter().fold(self.known, |acc, eps| {
            acc.join_(&eps.optimistic().map_or(Purity::Pure, impact))
        })
    }

    fn result(self) -> ComputationResult<Entity, Property> {
        let optimistic = self.optimistic();
        if optimistic == Purity::Impure || self.dependees.is_empty() {
            return ComputationResult::final_result(
                Entity::Method(self.method),
                Property::Purity(optimistic),
            );
        }
        ComputationResult::interim(
            Entity::Method(self.method),
            Property::Purity(Purity::Impure),
            Property::Purity(optimistic),
            self.dependees.clone(),
            self,
        )
    }
}

impl Continuation<Entity, Property> for PurityState {
    fn resume(&mut self, updated: &Eps<Entity, Property>, _store: &Store<'_>) -> Outcome {
        let Some(index) = self
            .dependees
            .iter()
            .position(|d| d.entity == updated.entity && d.kind == updated.kind)
        else {
            return Err(ComputationError::msg(format!(
                "woken by {updated}, which is not a dependee"
            )));
        };

        let before = self.optimistic();
        self.dependees.remove(index);
        self.observe(updated.clone());
        if !updated.is_final() && self.optimistic() == before {
            return Ok(ComputationResult::NoResult);
        }
        let state = PurityState {
            method: self.method,
            known: self.known,
            dependees: std::mem::take(&mut self.dependees),
        };
        Ok(state.result())
    }
}
