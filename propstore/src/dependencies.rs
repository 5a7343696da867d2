use core::mem;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::property::{
    check_refinement, Entity, EntityId, EpkId, FallbackReason, KindId, PropertyState,
    PropertyValue, Refinement,
};
use crate::result::Continuation;

/// A continuation parked on its dependees. The id distinguishes it from
/// earlier suspensions of the same slot: edges carrying an older id are
/// stale and ignored when they fire.
pub(crate) struct Suspension<E: Entity, P: PropertyValue> {
    pub(crate) id: u64,
    pub(crate) continuation: Box<dyn Continuation<E, P>>,
    /// Dependees with the state the continuation last saw.
    pub(crate) dependees: Vec<(EpkId, PropertyState<P>)>,
}

/// A suspension taken out of its slot together with the dependee update that
/// woke it up. Owning the suspension is what allows running it.
pub(crate) struct Wakeup<E: Entity, P: PropertyValue> {
    pub(crate) depender: EpkId,
    pub(crate) suspension: Suspension<E, P>,
    pub(crate) trigger: EpkId,
    pub(crate) trigger_state: PropertyState<P>,
}

pub(crate) struct Slot<E: Entity, P: PropertyValue> {
    pub(crate) state: PropertyState<P>,
    dependers: Vec<(EpkId, u64)>,
    suspension: Option<Suspension<E, P>>,
    pub(crate) queried: bool,
    pub(crate) lazy_triggered: bool,
    pub(crate) eager_scheduled: bool,
    pub(crate) fallback: Option<FallbackReason>,
}

impl<E: Entity, P: PropertyValue> Default for Slot<E, P> {
    fn default() -> Self {
        Self {
            state: PropertyState::NoValue,
            dependers: Vec::new(),
            suspension: None,
            queried: false,
            lazy_triggered: false,
            eager_scheduled: false,
            fallback: None,
        }
    }
}

/// A state change requested for one slot.
pub(crate) struct SlotWrite<E: Entity, P: PropertyValue> {
    pub(crate) state: PropertyState<P>,
    /// Continuation and dependee snapshots of an interim result.
    pub(crate) suspension: Option<(Box<dyn Continuation<E, P>>, Vec<(EpkId, PropertyState<P>)>)>,
    /// Set when the value is committed by the store rather than computed.
    pub(crate) fallback: Option<FallbackReason>,
}

impl<E: Entity, P: PropertyValue> SlotWrite<E, P> {
    pub(crate) fn computed(state: PropertyState<P>) -> Self {
        Self {
            state,
            suspension: None,
            fallback: None,
        }
    }

    pub(crate) fn forced(value: P, reason: FallbackReason) -> Self {
        Self {
            state: PropertyState::Final(value),
            suspension: None,
            fallback: Some(reason),
        }
    }
}

/// Arena of everything the store knows: interned entities and one slot per
/// (entity, kind) pair. Dependency edges live in the dependee's slot and
/// suspensions in the depender's, so both share the slot table's per-key
/// locking. No method holds two slot locks at the same time.
pub(crate) struct Registry<E: Entity, P: PropertyValue> {
    ids: DashMap<E, EntityId>,
    entities: RwLock<Vec<E>>,
    slots: DashMap<EpkId, Slot<E, P>>,
    next_suspension: AtomicU64,
}

impl<E: Entity, P: PropertyValue> Registry<E, P> {
    pub(crate) fn new() -> Self {
        Self {
            ids: DashMap::new(),
            entities: RwLock::new(Vec::new()),
            slots: DashMap::new(),
            next_suspension: AtomicU64::new(0),
        }
    }

    pub(crate) fn intern(&self, entity: &E) -> EntityId {
        if let Some(id) = self.ids.get(entity) {
            return *id;
        }
        *self.ids.entry(entity.clone()).or_insert_with(|| {
            let mut entities = self.entities.write();
            entities.push(entity.clone());
            EntityId(entities.len() - 1)
        })
    }

    pub(crate) fn entity(&self, id: EntityId) -> E {
        self.entities.read()[id.0].clone()
    }

    pub(crate) fn epk(&self, entity: &E, kind: KindId) -> EpkId {
        EpkId {
            entity: self.intern(entity),
            kind,
        }
    }

    /// Looks at a slot without creating it.
    pub(crate) fn state(&self, epk: EpkId) -> PropertyState<P> {
        self.slots
            .get(&epk)
            .map_or(PropertyState::NoValue, |slot| slot.state.clone())
    }

    pub(crate) fn inspect<R>(&self, epk: EpkId, f: impl FnOnce(&Slot<E, P>) -> R) -> Option<R> {
        self.slots.get(&epk).map(|slot| f(&slot))
    }

    /// Runs `f` on the slot, creating it if needed, and returns the state
    /// the slot has afterwards.
    pub(crate) fn with_slot<R>(
        &self,
        epk: EpkId,
        f: impl FnOnce(&mut Slot<E, P>) -> R,
    ) -> (PropertyState<P>, R) {
        let mut slot = self.slots.entry(epk).or_default();
        let result = f(&mut slot);
        (slot.state.clone(), result)
    }

    /// Applies a write to a slot: checks the refinement, stores the new
    /// state and suspension, and hands back every suspension that has to run
    /// because of it.
    pub(crate) fn update(
        &self,
        epk: EpkId,
        write: SlotWrite<E, P>,
    ) -> Result<Vec<Wakeup<E, P>>, String> {
        let (dependers, state, registered) = {
            let mut slot = self.slots.entry(epk).or_default();
            let refinement = match (&slot.state, &write.fallback) {
                // Forced commits only have to respect earlier final values.
                (PropertyState::Final(_), _) | (_, None) => {
                    check_refinement(&slot.state, &write.state)?
                }
                (_, Some(_)) => Refinement::Changed,
            };
            if refinement == Refinement::Changed {
                slot.state = write.state;
                if slot.state.is_final() {
                    slot.fallback = write.fallback;
                }
            }
            if slot.state.is_final() {
                slot.suspension = None;
            }
            let registered = match write.suspension {
                Some((continuation, dependees)) if !slot.state.is_final() => {
                    let id = self.next_suspension.fetch_add(1, Ordering::Relaxed);
                    slot.suspension = Some(Suspension {
                        id,
                        continuation,
                        dependees: dependees.clone(),
                    });
                    Some((id, dependees))
                }
                _ => None,
            };
            let dependers = match refinement {
                Refinement::Changed => mem::take(&mut slot.dependers),
                Refinement::Unchanged => Vec::new(),
            };
            (dependers, slot.state.clone(), registered)
        };

        let mut wakeups = self.wake(epk, &state, dependers);
        if let Some((id, dependees)) = registered {
            wakeups.extend(self.register_edges(epk, id, &dependees));
        }
        Ok(wakeups)
    }

    /// Parks a suspension again after its continuation had nothing new to
    /// say. The snapshot of the dependee that woke it is refreshed so the
    /// same update does not wake it twice. A suspension that has seen all of
    /// its dependees final can never be woken again and is rejected.
    pub(crate) fn resuspend(
        &self,
        epk: EpkId,
        mut suspension: Suspension<E, P>,
        trigger: EpkId,
        trigger_state: PropertyState<P>,
    ) -> Result<Vec<Wakeup<E, P>>, String> {
        for (dependee, snapshot) in &mut suspension.dependees {
            if *dependee == trigger {
                *snapshot = trigger_state.clone();
            }
        }
        let exhausted = suspension
            .dependees
            .iter()
            .all(|(_, snapshot)| snapshot.is_final());
        let registered = {
            let mut slot = self.slots.entry(epk).or_default();
            if slot.state.is_final() || slot.suspension.is_some() {
                None
            } else if exhausted {
                return Err(
                    "continuation returned no result after all its dependees became final"
                        .to_owned(),
                );
            } else {
                let id = self.next_suspension.fetch_add(1, Ordering::Relaxed);
                let dependees = suspension.dependees.clone();
                slot.suspension = Some(Suspension { id, ..suspension });
                Some((id, dependees))
            }
        };
        Ok(match registered {
            Some((id, dependees)) => self.register_edges(epk, id, &dependees),
            None => Vec::new(),
        })
    }

    /// Drops the suspension of a slot, turning all edges pointing to it
    /// stale.
    pub(crate) fn cancel_suspension(&self, epk: EpkId) {
        if let Some(mut slot) = self.slots.get_mut(&epk) {
            slot.suspension = None;
        }
    }

    fn claim(&self, depender: EpkId, id: u64) -> Option<Suspension<E, P>> {
        let mut slot = self.slots.get_mut(&depender)?;
        if slot.suspension.as_ref().is_some_and(|s| s.id == id) {
            slot.suspension.take()
        } else {
            None
        }
    }

    fn wake(
        &self,
        trigger: EpkId,
        state: &PropertyState<P>,
        dependers: Vec<(EpkId, u64)>,
    ) -> Vec<Wakeup<E, P>> {
        dependers
            .into_iter()
            .filter_map(|(depender, id)| {
                self.claim(depender, id).map(|suspension| Wakeup {
                    depender,
                    suspension,
                    trigger,
                    trigger_state: state.clone(),
                })
            })
            .collect()
    }

    /// Adds the edges of a fresh suspension. A dependee that already moved
    /// past the snapshot wakes the suspension right away; the edges added
    /// before that point are stale from then on.
    fn register_edges(
        &self,
        depender: EpkId,
        id: u64,
        dependees: &[(EpkId, PropertyState<P>)],
    ) -> Vec<Wakeup<E, P>> {
        for (dependee, snapshot) in dependees {
            let moved_on = {
                let mut slot = self.slots.entry(*dependee).or_default();
                if slot.state == *snapshot {
                    slot.dependers.push((depender, id));
                    None
                } else {
                    Some(slot.state.clone())
                }
            };
            if let Some(current) = moved_on {
                return self.wake(*dependee, &current, vec![(depender, id)]);
            }
        }
        Vec::new()
    }

    /// Slots that never got a value even though somebody asked for one.
    pub(crate) fn placeholders(&self) -> Vec<EpkId> {
        let mut found: Vec<EpkId> = self
            .slots
            .iter()
            .filter(|slot| {
                !slot.state.has_value()
                    && (slot.queried
                        || slot.eager_scheduled
                        || slot.lazy_triggered
                        || !slot.dependers.is_empty())
            })
            .map(|slot| *slot.key())
            .collect();
        found.sort();
        found
    }

    /// Strongly connected components of interim slots that only wait on
    /// each other. Nothing outside such a component can ever wake it up.
    pub(crate) fn closed_cycles(&self) -> Vec<Vec<EpkId>> {
        let mut graph = DiGraphMap::<EpkId, ()>::new();
        let mut open = HashSet::new();
        let mut edges = Vec::new();
        for slot in self.slots.iter() {
            if !matches!(slot.state, PropertyState::Interim { .. }) {
                continue;
            }
            graph.add_node(*slot.key());
            match &slot.suspension {
                Some(suspension) => {
                    edges.extend(suspension.dependees.iter().map(|(d, _)| (*slot.key(), *d)))
                }
                // Claimed by a wakeup that has not been applied.
                None => {
                    open.insert(*slot.key());
                }
            }
        }
        for (from, to) in edges {
            if graph.contains_node(to) {
                graph.add_edge(from, to, ());
            } else if !self.state(to).is_final() {
                open.insert(from);
            }
        }

        let mut cycles: Vec<Vec<EpkId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                let members: HashSet<_> = component.iter().copied().collect();
                component.iter().all(|epk| {
                    !open.contains(epk) && graph.neighbors(*epk).all(|n| members.contains(&n))
                })
            })
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Every non-final slot of a kind.
    pub(crate) fn unresolved(&self, kind: KindId) -> Vec<(EpkId, PropertyState<P>)> {
        let mut found: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| slot.key().kind == kind && !slot.state.is_final())
            .map(|slot| (*slot.key(), slot.state.clone()))
            .collect();
        found.sort_by_key(|(epk, _)| *epk);
        found
    }

    pub(crate) fn states_of_kind(&self, kind: KindId) -> Vec<(EntityId, PropertyState<P>)> {
        self.slots
            .iter()
            .filter(|slot| slot.key().kind == kind && slot.state.has_value())
            .map(|slot| (slot.key().entity, slot.state.clone()))
            .collect()
    }

    pub(crate) fn states_of_entity(&self, entity: EntityId) -> Vec<(KindId, PropertyState<P>)> {
        let mut found: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| slot.key().entity == entity && slot.state.has_value())
            .map(|slot| (slot.key().kind, slot.state.clone()))
            .collect();
        found.sort_by_key(|(kind, _)| *kind);
        found
    }

    pub(crate) fn fallbacks(&self) -> Vec<(EpkId, FallbackReason)> {
        let mut found: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| slot.fallback.map(|reason| (*slot.key(), reason)))
            .collect();
        found.sort_by_key(|(epk, _)| *epk);
        found
    }

    pub(crate) fn lookup(&self, entity: &E) -> Option<EntityId> {
        self.ids.get(entity).map(|id| *id)
    }
}
