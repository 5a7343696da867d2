use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::context::AnalysisContext;
use crate::dependencies::{Registry, SlotWrite, Wakeup};
use crate::error::{PhaseError, StoreError};
use crate::property::{
    Entity, EpkId, Eps, FallbackReason, KindId, KindSpec, PropertyState, PropertyValue,
};
use crate::result::{ComputationResult, InterimResult, PropertyComputation};
use crate::scheduler::{PhaseState, Scheduler, Task};

pub(crate) struct KindEntry<E: Entity, P: PropertyValue> {
    pub(crate) spec: KindSpec<P>,
    pub(crate) lazy: Option<Arc<dyn PropertyComputation<E, P>>>,
    pub(crate) eager: bool,
}

/// The table of everything known about the entities of one analysis phase.
///
/// Kinds are registered up front, then analyses are scheduled eagerly for a
/// set of entities or registered lazily for a kind. Computations read other
/// properties with [`PropertyStore::get`] and report what they found as a
/// [`ComputationResult`]. [`PropertyStore::wait_on_phase_completion`] runs
/// everything to a fixpoint and resolves what the analyses left open.
///
/// ```
/// use propstore::context::{AnalysisContext, Config};
/// use propstore::property::{CycleResolution, KindSpec, PropertyValue};
/// use propstore::result::{ComputationFn, ComputationResult};
/// use propstore::store::PropertyStore;
///
/// #[derive(Clone, Debug, PartialEq, PartialOrd)]
/// struct Size(u32);
///
/// impl PropertyValue for Size {
///     type Kind = ();
///     fn kind(&self) {}
/// }
///
/// let ctx = AnalysisContext::new(Config::default().with_cpu_threads(2)).unwrap();
/// let mut store = PropertyStore::new(&ctx);
/// store
///     .register_kind(KindSpec::new("size", Size(u32::MAX), CycleResolution::Fallback))
///     .unwrap();
/// store
///     .schedule_eager(
///         (),
///         ["a", "bb"],
///         ComputationFn::new(|name: &&str, _store: &PropertyStore<'_, &str, Size>| {
///             Ok(ComputationResult::final_result(*name, Size(name.len() as u32)))
///         }),
///     )
///     .unwrap();
/// store.wait_on_phase_completion().unwrap();
/// assert_eq!(store.get(&"bb", ()).final_value(), Some(&Size(2)));
/// ```
pub struct PropertyStore<'ctx, E: Entity, P: PropertyValue> {
    pub(crate) ctx: &'ctx AnalysisContext,
    pub(crate) kinds: Vec<KindEntry<E, P>>,
    kind_ids: HashMap<P::Kind, KindId>,
    pub(crate) registry: Registry<E, P>,
    pub(crate) scheduler: Scheduler<E, P>,
}

impl<'ctx, E: Entity, P: PropertyValue> PropertyStore<'ctx, E, P> {
    pub fn new(ctx: &'ctx AnalysisContext) -> Self {
        Self {
            ctx,
            kinds: Vec::new(),
            kind_ids: HashMap::new(),
            registry: Registry::new(),
            scheduler: Scheduler::new(),
        }
    }

    pub fn context(&self) -> &'ctx AnalysisContext {
        self.ctx
    }

    pub fn phase_state(&self) -> PhaseState {
        self.scheduler.state()
    }

    pub fn register_kind(&mut self, spec: KindSpec<P>) -> Result<(), StoreError> {
        self.check_open("register a kind")?;
        if self.kind_ids.contains_key(&spec.kind) {
            return Err(StoreError::misuse(format!(
                "kind {} is already registered",
                spec.name
            )));
        }
        let id = u16::try_from(self.kinds.len())
            .map(KindId)
            .map_err(|_| StoreError::misuse(format!("too many kinds to register {}", spec.name)))?;
        debug!(kind = spec.name, "registered property kind");
        self.kind_ids.insert(spec.kind, id);
        self.kinds.push(KindEntry {
            spec,
            lazy: None,
            eager: false,
        });
        Ok(())
    }

    /// Registers the computation started by the first [`PropertyStore::get`]
    /// of an entity that has no value and is not scheduled eagerly.
    pub fn register_lazy<C>(&mut self, kind: P::Kind, computation: C) -> Result<(), StoreError>
    where
        C: PropertyComputation<E, P> + 'static,
    {
        self.check_open("register a lazy computation")?;
        let id = self.registered(kind)?;
        let entry = &mut self.kinds[usize::from(id.0)];
        if entry.lazy.is_some() {
            return Err(StoreError::misuse(format!(
                "kind {} already has a lazy computation",
                entry.spec.name
            )));
        }
        debug!(kind = entry.spec.name, "registered lazy computation");
        entry.lazy = Some(Arc::new(computation));
        Ok(())
    }

    /// Queues `computation` for each of `entities`. Nothing runs before
    /// [`PropertyStore::wait_on_phase_completion`].
    pub fn schedule_eager<C, I>(
        &mut self,
        kind: P::Kind,
        entities: I,
        computation: C,
    ) -> Result<(), StoreError>
    where
        C: PropertyComputation<E, P> + 'static,
        I: IntoIterator<Item = E>,
    {
        self.check_open("schedule a computation")?;
        let id = self.registered(kind)?;
        let name = self.kinds[usize::from(id.0)].spec.name;
        let computation: Arc<dyn PropertyComputation<E, P>> = Arc::new(computation);

        let entities: Vec<E> = entities.into_iter().collect();
        let mut seen = HashSet::new();
        for entity in &entities {
            let epk = self.registry.epk(entity, id);
            let flags = self.registry.inspect(epk, |slot| {
                (slot.eager_scheduled, slot.lazy_triggered, slot.state.has_value())
            });
            let problem = match flags {
                _ if !seen.insert(epk) => Some("is listed twice"),
                Some((true, _, _)) => Some("is already scheduled"),
                Some((_, true, _)) => Some("was already computed lazily"),
                Some((_, _, true)) => Some("already has a value"),
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(StoreError::misuse(format!(
                    "{entity:?} {problem} for kind {name}"
                )));
            }
        }

        let mut tasks = Vec::with_capacity(entities.len());
        for entity in &entities {
            let epk = self.registry.epk(entity, id);
            self.registry.with_slot(epk, |slot| slot.eager_scheduled = true);
            tasks.push(Task::Compute {
                entity: epk.entity,
                kind: id,
                computation: Arc::clone(&computation),
                eager: true,
            });
        }
        debug!(kind = name, entities = tasks.len(), "scheduled eager computation");
        self.kinds[usize::from(id.0)].eager = true;
        self.scheduler.push_all(tasks);
        Ok(())
    }

    /// The current state of a property.
    ///
    /// * If nothing is known yet and the kind has a lazy computation, the
    ///   computation is started and `NoValue` is returned. A computation
    ///   calling this should report the `NoValue` state as a dependee.
    /// * If the kind has no computation at all, the kind's fallback becomes
    ///   the final value.
    /// * After the phase is closed, missing values are resolved with the
    ///   fallback.
    ///
    /// # Panics
    ///
    /// If the kind was never registered. Inside a computation, the panic is
    /// caught and fails the phase. Use [`PropertyStore::try_get`] where an
    /// unknown kind has to be handled.
    pub fn get(&self, entity: &E, kind: P::Kind) -> Eps<E, P> {
        match self.try_get(entity, kind) {
            Ok(eps) => eps,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`PropertyStore::get`], but an unregistered kind is reported as
    /// [`StoreError::SchedulerMisuse`].
    pub fn try_get(&self, entity: &E, kind: P::Kind) -> Result<Eps<E, P>, StoreError> {
        let id = self.registered(kind)?;
        let entry = &self.kinds[usize::from(id.0)];
        let epk = self.registry.epk(entity, id);
        let phase = self.scheduler.state();

        let (state, start_lazy) = self.registry.with_slot(epk, |slot| {
            slot.queried = true;
            if slot.state.has_value() {
                return false;
            }
            if entry.lazy.is_none() && !entry.eager {
                slot.state = PropertyState::Final(entry.spec.fallback.clone());
                slot.fallback = Some(FallbackReason::NoAnalysisScheduled);
                return false;
            }
            if phase == PhaseState::Closed {
                slot.state = PropertyState::Final(entry.spec.fallback.clone());
                slot.fallback = Some(FallbackReason::NotComputed);
                return false;
            }
            if entry.lazy.is_some() && !slot.lazy_triggered && !slot.eager_scheduled {
                slot.lazy_triggered = true;
                return true;
            }
            false
        });

        if let Some(lazy) = entry.lazy.as_ref().filter(|_| start_lazy) {
            trace!(entity = ?entity, kind = entry.spec.name, "starting lazy computation");
            self.scheduler.push(Task::Compute {
                entity: epk.entity,
                kind: id,
                computation: Arc::clone(lazy),
                eager: false,
            });
        }
        Ok(Eps {
            entity: entity.clone(),
            kind,
            state,
        })
    }

    /// Like [`PropertyStore::get`], without side effects.
    pub fn peek(&self, entity: &E, kind: P::Kind) -> PropertyState<P> {
        match (self.registry.lookup(entity), self.kind_ids.get(&kind)) {
            (Some(entity), Some(&kind)) => self.registry.state(EpkId { entity, kind }),
            _ => PropertyState::NoValue,
        }
    }

    pub fn is_final(&self, entity: &E, kind: P::Kind) -> bool {
        self.peek(entity, kind).is_final()
    }

    /// Every entity with a value of the given kind.
    pub fn snapshot(&self, kind: P::Kind) -> HashMap<E, PropertyState<P>> {
        let Some(&id) = self.kind_ids.get(&kind) else {
            return HashMap::new();
        };
        self.registry
            .states_of_kind(id)
            .into_iter()
            .map(|(entity, state)| (self.registry.entity(entity), state))
            .collect()
    }

    /// The final values of a kind, for report generation after the phase.
    pub fn entities(&self, kind: P::Kind) -> Vec<(E, P)> {
        self.snapshot(kind)
            .into_iter()
            .filter_map(|(entity, state)| match state {
                PropertyState::Final(value) => Some((entity, value)),
                _ => None,
            })
            .collect()
    }

    pub fn properties_of(&self, entity: &E) -> Vec<Eps<E, P>> {
        let Some(id) = self.registry.lookup(entity) else {
            return Vec::new();
        };
        self.registry
            .states_of_entity(id)
            .into_iter()
            .map(|(kind, state)| Eps {
                entity: entity.clone(),
                kind: self.kinds[usize::from(kind.0)].spec.kind,
                state,
            })
            .collect()
    }

    /// Every property that was resolved by the store instead of by an
    /// analysis, and why.
    pub fn fallback_log(&self) -> Vec<(E, P::Kind, FallbackReason)> {
        self.registry
            .fallbacks()
            .into_iter()
            .map(|(epk, reason)| {
                (
                    self.registry.entity(epk.entity),
                    self.kinds[usize::from(epk.kind.0)].spec.kind,
                    reason,
                )
            })
            .collect()
    }

    pub fn kind_name(&self, kind: P::Kind) -> Option<&'static str> {
        self.kind_ids
            .get(&kind)
            .map(|id| self.kinds[usize::from(id.0)].spec.name)
    }

    /// Makes every non-final property of `kind` final: missing values become
    /// the fallback, interim ones are resolved by the kind's
    /// [`crate::property::CycleResolution`]. Returns how many properties were
    /// resolved. Only allowed after the phase reached quiescence.
    pub fn finalize_with_fallback(&self, kind: P::Kind) -> Result<usize, PhaseError<E>> {
        match self.scheduler.state() {
            PhaseState::Quiescent | PhaseState::Closed => {}
            state => {
                return Err(StoreError::misuse(format!(
                    "cannot finalize while the phase is {state:?}"
                ))
                .into());
            }
        }
        let id = self.registered(kind)?;
        let resolved = self.finalize_kind(id)?;
        if resolved > 0 {
            self.drain()?;
        }
        Ok(resolved)
    }

    pub(crate) fn finalize_kind(&self, kind: KindId) -> Result<usize, StoreError> {
        let unresolved = self.registry.unresolved(kind);
        for (epk, state) in &unresolved {
            let (value, reason) = self.kinds[usize::from(kind.0)].spec.resolve(state);
            self.force(*epk, value, reason)?;
        }
        Ok(unresolved.len())
    }

    /// Commits a value chosen by the store, not by an analysis.
    pub(crate) fn force(
        &self,
        epk: EpkId,
        value: P,
        reason: FallbackReason,
    ) -> Result<(), StoreError> {
        debug!(
            entity = ?self.registry.entity(epk.entity),
            kind = self.kind_spec(epk.kind).name,
            value = ?value,
            %reason,
            "resolved by fallback"
        );
        let wakeups = self
            .registry
            .update(epk, SlotWrite::forced(value, reason))
            .map_err(|message| self.violation(epk, message))?;
        self.schedule(wakeups);
        Ok(())
    }

    /// Interprets what a computation or continuation returned.
    pub(crate) fn apply(&self, result: ComputationResult<E, P>) -> Result<(), StoreError> {
        match result {
            ComputationResult::NoResult => Ok(()),
            ComputationResult::Final(ep) => {
                self.write(&ep.entity, SlotWrite::computed(PropertyState::Final(ep.value)))
            }
            ComputationResult::Multi(eps) => eps.into_iter().try_for_each(|ep| {
                self.write(&ep.entity, SlotWrite::computed(PropertyState::Final(ep.value)))
            }),
            ComputationResult::Results(results) => {
                results.into_iter().try_for_each(|result| self.apply(result))
            }
            ComputationResult::Interim(interim) => self.apply_interim(interim),
        }
    }

    fn apply_interim(&self, interim: InterimResult<E, P>) -> Result<(), StoreError> {
        let InterimResult {
            entity,
            pessimistic,
            optimistic,
            dependees,
            continuation,
        } = interim;
        let epk = EpkId {
            entity: self.registry.intern(&entity),
            kind: self.registered(optimistic.kind())?,
        };
        if dependees.is_empty() {
            return Err(self.violation(epk, "interim result without dependees".to_owned()));
        }

        let mut snapshots = Vec::with_capacity(dependees.len());
        for dependee in dependees {
            if dependee.is_final() {
                return Err(self.violation(
                    epk,
                    format!("interim result waits on final property {dependee}"),
                ));
            }
            let kind = self.registered(dependee.kind)?;
            snapshots.push((self.registry.epk(&dependee.entity, kind), dependee.state));
        }
        self.write(
            &entity,
            SlotWrite {
                state: PropertyState::Interim {
                    pessimistic,
                    optimistic,
                },
                suspension: Some((continuation, snapshots)),
                fallback: None,
            },
        )
    }

    fn write(&self, entity: &E, write: SlotWrite<E, P>) -> Result<(), StoreError> {
        let kind = match write.state.optimistic() {
            Some(value) => self.registered(value.kind())?,
            None => return Err(StoreError::misuse("a computation cannot write NoValue")),
        };
        let epk = self.registry.epk(entity, kind);
        trace!(entity = ?entity, kind = self.kind_spec(kind).name, state = %write.state, "update");
        let wakeups = self
            .registry
            .update(epk, write)
            .map_err(|message| self.violation(epk, message))?;
        self.schedule(wakeups);
        Ok(())
    }

    pub(crate) fn schedule(&self, wakeups: Vec<Wakeup<E, P>>) {
        if !wakeups.is_empty() {
            self.scheduler
                .push_all(wakeups.into_iter().map(Task::Resume).collect());
        }
    }

    pub(crate) fn eps(&self, epk: EpkId, state: PropertyState<P>) -> Eps<E, P> {
        Eps {
            entity: self.registry.entity(epk.entity),
            kind: self.kind_spec(epk.kind).kind,
            state,
        }
    }

    pub(crate) fn kind_spec(&self, kind: KindId) -> &KindSpec<P> {
        &self.kinds[usize::from(kind.0)].spec
    }

    fn registered(&self, kind: P::Kind) -> Result<KindId, StoreError> {
        self.kind_ids
            .get(&kind)
            .copied()
            .ok_or_else(|| StoreError::misuse(format!("kind {kind:?} is not registered")))
    }

    fn check_open(&self, what: &str) -> Result<(), StoreError> {
        match self.scheduler.state() {
            PhaseState::Idle => Ok(()),
            state => Err(StoreError::misuse(format!(
                "cannot {what} once the phase is {state:?}"
            ))),
        }
    }

    pub(crate) fn violation(&self, epk: EpkId, message: String) -> StoreError {
        StoreError::InvariantViolation {
            epk: format!(
                "{:?}@{}",
                self.registry.entity(epk.entity),
                self.kind_spec(epk.kind).name
            ),
            message,
        }
    }
}
