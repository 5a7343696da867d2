use std::sync::Arc;

use propstore::{
    error::{ComputationError, StoreError},
    property::Eps,
    result::{ComputationResult, Continuation, PropertyComputation},
};

use super::{ClassImmutability, FieldMutability, Property, PropertyKind, Store};
use crate::program::{ClassId, Entity, FactSource};

type Outcome = Result<ComputationResult<Entity, Property>, ComputationError>;

/// Schedules the class immutability analysis for every class.
pub fn schedule(store: &mut Store<'_>, facts: Arc<dyn FactSource>) -> Result<(), StoreError> {
    let classes = facts.classes().into_iter().map(Entity::Class);
    store.schedule_eager(
        PropertyKind::ClassImmutability,
        classes,
        ClassImmutabilityAnalysis { facts },
    )
}

/// A class is immutable if none of its fields can change after
/// construction, the objects its fields refer to are immutable, and so is
/// its superclass.
pub struct ClassImmutabilityAnalysis {
    pub facts: Arc<dyn FactSource>,
}

fn is_mutable(property: &Property) -> bool {
    matches!(
        property,
        Property::FieldMutability(FieldMutability::Mutable)
            | Property::ClassImmutability(ClassImmutability::Mutable)
    )
}

impl PropertyComputation<Entity, Property> for ClassImmutabilityAnalysis {
    fn compute(&self, entity: &Entity, store: &Store<'_>) -> Outcome {
        let Entity::Class(class) = *entity else {
            return Err(ComputationError::msg(format!(
                "class immutability is only defined for classes, not {entity:?}"
            )));
        };

        let mut dependees = Vec::new();
        for &field in self.facts.fields_of(class) {
            dependees.push(store.get(&Entity::Field(field), PropertyKind::FieldMutability));
            if let Some(ty) = self.facts.field_type(field) {
                dependees.push(store.get(&Entity::Class(ty), PropertyKind::ClassImmutability));
            }
        }
        if let Some(superclass) = self.facts.superclass(class) {
            dependees.push(store.get(&Entity::Class(superclass), PropertyKind::ClassImmutability));
        }

        let mut state = ClassState {
            class,
            dependees: Vec::new(),
        };
        for eps in dependees {
            // A class referring to itself only depends on its other parts.
            if eps.entity == *entity && eps.kind == PropertyKind::ClassImmutability {
                continue;
            }
            if eps.final_value().is_some_and(is_mutable) {
                return Ok(state.mutable());
            }
            let duplicate = state
                .dependees
                .iter()
                .any(|d: &Eps<Entity, Property>| d.entity == eps.entity && d.kind == eps.kind);
            if !eps.is_final() && !duplicate {
                state.dependees.push(eps);
            }
        }
        Ok(state.result())
    }
}

/// A class waiting for the mutability of its fields and referenced classes.
/// It stays optimistically immutable until one of them turns out mutable.
#[derive(Debug)]
pub struct ClassState {
    class: ClassId,
    dependees: Vec<Eps<Entity, Property>>,
}

impl ClassState {
    fn mutable(&self) -> ComputationResult<Entity, Property> {
        ComputationResult::final_result(
            Entity::Class(self.class),
            Property::ClassImmutability(ClassImmutability::Mutable),
        )
    }

    fn result(self) -> ComputationResult<Entity, Property> {
        if self.dependees.is_empty() {
            return ComputationResult::final_result(
                Entity::Class(self.class),
                Property::ClassImmutability(ClassImmutability::Immutable),
            );
        }
        ComputationResult::interim(
            Entity::Class(self.class),
            Property::ClassImmutability(ClassImmutability::Mutable),
            Property::ClassImmutability(ClassImmutability::Immutable),
            self.dependees.clone(),
            self,
        )
    }
}

impl Continuation<Entity, Property> for ClassState {
    fn resume(&mut self, updated: &Eps<Entity, Property>, _store: &Store<'_>) -> Outcome {
        if updated.optimistic().is_some_and(is_mutable) {
            return Ok(self.mutable());
        }
        let Some(index) = self
            .dependees
            .iter()
            .position(|d| d.entity == updated.entity && d.kind == updated.kind)
        else {
            return Err(ComputationError::msg(format!(
                "woken by {updated}, which is not a dependee"
            )));
        };
        if !updated.is_final() {
            self.dependees[index] = updated.clone();
            return Ok(ComputationResult::NoResult);
        }
        self.dependees.remove(index);
        let state = ClassState {
            class: self.class,
            dependees: std::mem::take(&mut self.dependees),
        };
        Ok(state.result())
    }
}
