use core::fmt::{self, Debug};
use core::marker::PhantomData;

use crate::error::ComputationError;
use crate::property::{Entity, Eps, PropertyValue};
use crate::store::PropertyStore;

/// A final value for an entity. The entity does not need to be the one the
/// computation was started for.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalEp<E, P> {
    pub entity: E,
    pub value: P,
}

/// A refinable estimate together with what it is waiting for. The
/// continuation is resumed whenever one of the dependees changes.
pub struct InterimResult<E: Entity, P: PropertyValue> {
    pub entity: E,
    pub pessimistic: P,
    pub optimistic: P,
    /// The states the estimate was computed from. If a dependee moved on
    /// since it was read, the continuation is resumed right away.
    pub dependees: Vec<Eps<E, P>>,
    pub continuation: Box<dyn Continuation<E, P>>,
}

impl<E: Entity, P: PropertyValue> Debug for InterimResult<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterimResult")
            .field("entity", &self.entity)
            .field("pessimistic", &self.pessimistic)
            .field("optimistic", &self.optimistic)
            .field("dependees", &self.dependees)
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// What a computation or continuation tells the store.
#[derive(Debug)]
pub enum ComputationResult<E: Entity, P: PropertyValue> {
    Final(FinalEp<E, P>),
    Interim(InterimResult<E, P>),
    /// Final values for several entities determined together, e.g., the
    /// mutability of every field of a class.
    Multi(Vec<FinalEp<E, P>>),
    /// Any mix of results, applied in order.
    Results(Vec<ComputationResult<E, P>>),
    /// Nothing new. When returned by a continuation, the continuation stays
    /// registered on its dependees.
    NoResult,
}

impl<E: Entity, P: PropertyValue> ComputationResult<E, P> {
    pub fn final_result(entity: E, value: P) -> Self {
        ComputationResult::Final(FinalEp { entity, value })
    }

    pub fn interim<C>(
        entity: E,
        pessimistic: P,
        optimistic: P,
        dependees: Vec<Eps<E, P>>,
        continuation: C,
    ) -> Self
    where
        C: Continuation<E, P> + 'static,
    {
        ComputationResult::Interim(InterimResult {
            entity,
            pessimistic,
            optimistic,
            dependees,
            continuation: Box::new(continuation),
        })
    }

    pub fn multi<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (E, P)>,
    {
        ComputationResult::Multi(
            results
                .into_iter()
                .map(|(entity, value)| FinalEp { entity, value })
                .collect(),
        )
    }
}

/// A suspended computation. Implementors are explicit state machines: the
/// struct holds whatever the computation had figured out before it had to
/// wait, and [`Debug`] shows that state when a phase fails.
pub trait Continuation<E: Entity, P: PropertyValue>: Send + Sync + Debug {
    /// Called with the new state of a dependee that changed.
    fn resume(
        &mut self,
        updated: &Eps<E, P>,
        store: &PropertyStore<'_, E, P>,
    ) -> Result<ComputationResult<E, P>, ComputationError>;
}

/// Small utility so simple continuations do not need their own struct. The
/// name is what shows up in failure reports.
pub struct ContinuationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: FnMut(&Eps<E, P>, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    name: &'static str,
    func: F,
    phantom: PhantomData<fn(E, P)>,
}

impl<F, E, P> ContinuationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: FnMut(&Eps<E, P>, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    pub fn new(name: &'static str, func: F) -> Self {
        Self {
            name,
            func,
            phantom: PhantomData,
        }
    }
}

impl<F, E, P> Debug for ContinuationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: FnMut(&Eps<E, P>, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContinuationFn({})", self.name)
    }
}

impl<F, E, P> Continuation<E, P> for ContinuationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: FnMut(&Eps<E, P>, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    fn resume(
        &mut self,
        updated: &Eps<E, P>,
        store: &PropertyStore<'_, E, P>,
    ) -> Result<ComputationResult<E, P>, ComputationError> {
        (self.func)(updated, store)
    }
}

/// An analysis started for an entity, either eagerly or on first demand.
pub trait PropertyComputation<E: Entity, P: PropertyValue>: Send + Sync {
    fn compute(
        &self,
        entity: &E,
        store: &PropertyStore<'_, E, P>,
    ) -> Result<ComputationResult<E, P>, ComputationError>;
}

/// Small utility so users do not need to create a new struct for every
/// computation.
pub struct ComputationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: Fn(&E, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    func: F,
    phantom: PhantomData<fn(E, P)>,
}

impl<F, E, P> ComputationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: Fn(&E, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    /// Create a new computation from a closure or function.
    pub fn new(func: F) -> Self {
        Self {
            func,
            phantom: PhantomData,
        }
    }
}

impl<F, E, P> PropertyComputation<E, P> for ComputationFn<F, E, P>
where
    E: Entity,
    P: PropertyValue,
    F: Fn(&E, &PropertyStore<'_, E, P>) -> Result<ComputationResult<E, P>, ComputationError>
        + Send
        + Sync,
{
    fn compute(
        &self,
        entity: &E,
        store: &PropertyStore<'_, E, P>,
    ) -> Result<ComputationResult<E, P>, ComputationError> {
        (self.func)(entity, store)
    }
}
