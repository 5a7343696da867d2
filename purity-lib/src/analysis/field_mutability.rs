use std::sync::Arc;

use propstore::{
    error::{ComputationError, StoreError},
    result::{ComputationResult, PropertyComputation},
};

use super::{FieldMutability, Property, PropertyKind, Store};
use crate::program::{Entity, FactSource, FieldId};

/// Registers the field mutability analysis as the lazy computation of its
/// kind. With `report_all`, it is also started for every class that has
/// fields, so the result covers fields nobody asked about.
pub fn register(
    store: &mut Store<'_>,
    facts: Arc<dyn FactSource>,
    report_all: bool,
) -> Result<(), StoreError> {
    let analysis = FieldMutabilityAnalysis {
        facts: Arc::clone(&facts),
    };
    store.register_lazy(PropertyKind::FieldMutability, analysis)?;
    if report_all {
        // One field per class is enough, the result covers all of them.
        let representatives: Vec<Entity> = facts
            .classes()
            .into_iter()
            .filter_map(|class| facts.fields_of(class).first().copied())
            .map(Entity::Field)
            .collect();
        store.schedule_eager(
            PropertyKind::FieldMutability,
            representatives,
            FieldMutabilityAnalysis { facts },
        )?;
    }
    Ok(())
}

/// Decides the mutability of all fields of a class at once. Only the
/// writers of the fields matter: a field that only constructors of its own
/// class write is effectively final.
pub struct FieldMutabilityAnalysis {
    pub facts: Arc<dyn FactSource>,
}

impl FieldMutabilityAnalysis {
    pub fn mutability(&self, field: FieldId) -> FieldMutability {
        if self.facts.is_declared_final(field) {
            return FieldMutability::DeclaredFinal;
        }
        let owner = self.facts.field_class(field);
        let constructor_only = self.facts.writers_of(field).iter().all(|&writer| {
            self.facts.is_constructor(writer) && self.facts.method_class(writer) == owner
        });
        if constructor_only {
            FieldMutability::EffectivelyFinal
        } else {
            FieldMutability::Mutable
        }
    }
}

impl PropertyComputation<Entity, Property> for FieldMutabilityAnalysis {
    fn compute(
        &self,
        entity: &Entity,
        _store: &Store<'_>,
    ) -> Result<ComputationResult<Entity, Property>, ComputationError> {
        let Entity::Field(field) = *entity else {
            return Err(ComputationError::msg(format!(
                "field mutability is only defined for fields, not {entity:?}"
            )));
        };
        let class = self.facts.field_class(field);
        Ok(ComputationResult::multi(
            self.facts.fields_of(class).iter().map(|&f| {
                (
                    Entity::Field(f),
                    Property::FieldMutability(self.mutability(f)),
                )
            }),
        ))
    }
}
