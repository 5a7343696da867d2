use core::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::context::AnalysisContext;
use crate::dependencies::Wakeup;
use crate::error::{ComputationError, Failure, FailureCause, PhaseError, StoreError};
use crate::property::{Entity, EntityId, FallbackReason, KindId, PropertyValue};
use crate::result::{ComputationResult, PropertyComputation};
use crate::store::PropertyStore;

/// Lifecycle of a phase.
///
/// `Idle` accepts registrations. [`PropertyStore::wait_on_phase_completion`]
/// moves through `Running` (eager tasks still queued), `Draining` (only
/// continuations and lazy computations left), `Quiescent` and `Finalizing`
/// (resolving what the analyses left open) to `Closed`. `Failed` and
/// `Interrupted` are terminal as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseState {
    Idle,
    Running,
    Draining,
    Quiescent,
    Finalizing,
    Closed,
    Failed,
    Interrupted,
}

impl PhaseState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseState::Closed | PhaseState::Failed | PhaseState::Interrupted
        )
    }
}

/// Counts of a completed phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// Computations and continuations that ran.
    pub tasks_executed: usize,
    /// Properties nobody computed, resolved with the kind's fallback.
    pub fallbacks: usize,
    /// Closed cycles of interim properties that were committed.
    pub cycles_resolved: usize,
    /// Properties committed as part of such a cycle.
    pub cyclic_properties: usize,
    /// How many times the task queue was drained.
    pub rounds: usize,
}

pub(crate) enum Task<E: Entity, P: PropertyValue> {
    Compute {
        entity: EntityId,
        kind: KindId,
        computation: Arc<dyn PropertyComputation<E, P>>,
        eager: bool,
    },
    Resume(Wakeup<E, P>),
}

struct Queue<E: Entity, P: PropertyValue> {
    tasks: VecDeque<Task<E, P>>,
    in_flight: usize,
    eager_pending: usize,
    state: PhaseState,
}

/// FIFO of runnable tasks shared by the workers, plus the phase state.
pub(crate) struct Scheduler<E: Entity, P: PropertyValue> {
    queue: Mutex<Queue<E, P>>,
    idle: Condvar,
    executed: AtomicUsize,
    failures: Mutex<Vec<Failure<E>>>,
    outcome: Mutex<Option<Result<PhaseReport, PhaseError<E>>>>,
}

impl<E: Entity, P: PropertyValue> Scheduler<E, P> {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                in_flight: 0,
                eager_pending: 0,
                state: PhaseState::Idle,
            }),
            idle: Condvar::new(),
            executed: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> PhaseState {
        self.queue.lock().state
    }

    /// Terminal states stick.
    fn set_state(&self, state: PhaseState) {
        let mut queue = self.queue.lock();
        if !queue.state.is_terminal() {
            queue.state = state;
        }
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn failures(&self) -> Vec<Failure<E>> {
        self.failures.lock().clone()
    }

    pub(crate) fn push(&self, task: Task<E, P>) {
        self.push_all(vec![task]);
    }

    /// Tasks pushed after the phase ended are dropped.
    pub(crate) fn push_all(&self, tasks: Vec<Task<E, P>>) {
        let mut queue = self.queue.lock();
        if queue.state.is_terminal() {
            return;
        }
        for task in tasks {
            if matches!(task, Task::Compute { eager: true, .. }) {
                queue.eager_pending += 1;
            }
            queue.tasks.push_back(task);
        }
        self.idle.notify_all();
    }

    /// Blocks until a task is available. Returns `None` once the queue is
    /// empty and no other worker can produce new tasks, or the phase stopped
    /// admitting work.
    fn next_task(&self, ctx: &AnalysisContext) -> Option<Task<E, P>> {
        let mut queue = self.queue.lock();
        loop {
            if !queue.state.is_terminal() && ctx.is_interrupted() {
                warn!(
                    dropped = queue.tasks.len(),
                    "interrupted, no further tasks are started"
                );
                queue.state = PhaseState::Interrupted;
            }
            if queue.state.is_terminal() {
                queue.tasks.clear();
            } else if let Some(task) = queue.tasks.pop_front() {
                if matches!(task, Task::Compute { eager: true, .. }) {
                    queue.eager_pending -= 1;
                    if queue.eager_pending == 0 && queue.state == PhaseState::Running {
                        debug!("all eager computations started");
                        queue.state = PhaseState::Draining;
                    }
                }
                queue.in_flight += 1;
                return Some(task);
            }
            if queue.in_flight == 0 {
                self.idle.notify_all();
                return None;
            }
            self.idle.wait(&mut queue);
        }
    }

    fn task_done(&self, outcome: Result<(), Failure<E>>) {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock();
        queue.in_flight -= 1;
        if let Err(failure) = outcome {
            error!(
                entity = ?failure.entity,
                kind = failure.kind,
                continuation = %failure.continuation,
                cause = %failure.cause,
                "computation failed"
            );
            self.failures.lock().push(failure);
            if queue.state != PhaseState::Failed {
                queue.state = PhaseState::Failed;
                queue.tasks.clear();
            }
        }
        if queue.in_flight == 0 || !queue.tasks.is_empty() {
            self.idle.notify_all();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn run_guarded<T>(f: impl FnOnce() -> Result<T, ComputationError>) -> Result<T, ComputationError> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ComputationError::Panicked(panic_message(payload))))
}

impl<E: Entity, P: PropertyValue> PropertyStore<'_, E, P> {
    /// Runs every scheduled computation and everything they trigger until
    /// nothing is left, then resolves the properties the analyses could not
    /// finalize themselves:
    ///
    /// 1. properties that were asked for but never computed get the kind's
    ///    fallback,
    /// 2. groups of interim properties that only wait on each other are
    ///    committed according to their kind's
    ///    [`crate::property::CycleResolution`],
    /// 3. anything still open is finalized the same way.
    ///
    /// Each step may wake continuations, so the queue is drained again after
    /// it. On success every property in the store is final and the phase is
    /// closed. Calling this again returns the same outcome.
    pub fn wait_on_phase_completion(&self) -> Result<PhaseReport, PhaseError<E>> {
        let mut outcome = self.scheduler.outcome.lock();
        if let Some(outcome) = outcome.as_ref() {
            return outcome.clone();
        }
        let result = self.run_phase();
        *outcome = Some(result.clone());
        result
    }

    fn run_phase(&self) -> Result<PhaseReport, PhaseError<E>> {
        self.scheduler.set_state(PhaseState::Running);
        {
            let mut queue = self.scheduler.queue.lock();
            if queue.eager_pending == 0 && queue.state == PhaseState::Running {
                queue.state = PhaseState::Draining;
            }
        }
        info!(
            kinds = self.kinds.len(),
            threads = self.ctx.config().cpu_threads,
            "phase started"
        );

        let mut report = PhaseReport::default();
        loop {
            report.rounds += 1;
            self.drain()?;
            self.scheduler.set_state(PhaseState::Quiescent);
            debug!(round = report.rounds, "quiescent");

            self.scheduler.set_state(PhaseState::Finalizing);
            let resolved = self.resolve_open(&mut report).map_err(|err| {
                error!(%err, "resolving open properties failed");
                self.scheduler.set_state(PhaseState::Failed);
                err
            })?;
            if resolved == 0 {
                break;
            }
            self.scheduler.set_state(PhaseState::Draining);
        }

        self.scheduler.set_state(PhaseState::Closed);
        report.tasks_executed = self.scheduler.executed();
        info!(
            tasks = report.tasks_executed,
            fallbacks = report.fallbacks,
            cycles = report.cycles_resolved,
            rounds = report.rounds,
            "phase completed"
        );
        Ok(report)
    }

    /// Runs the workers until the queue is empty.
    pub(crate) fn drain(&self) -> Result<(), PhaseError<E>> {
        let threads = self.ctx.config().cpu_threads;
        self.ctx.cpu_pool().scope(|scope| {
            for _ in 0..threads {
                scope.spawn(move |_| self.work());
            }
        });
        match self.scheduler.state() {
            PhaseState::Failed => {
                let failures = self.scheduler.failures();
                error!(failures = failures.len(), "phase failed");
                Err(PhaseError::Failed { failures })
            }
            PhaseState::Interrupted => Err(PhaseError::Interrupted {
                executed: self.scheduler.executed(),
            }),
            _ => Ok(()),
        }
    }

    fn work(&self) {
        while let Some(task) = self.scheduler.next_task(self.ctx) {
            let outcome = self.execute(task);
            self.scheduler.task_done(outcome);
        }
    }

    fn execute(&self, task: Task<E, P>) -> Result<(), Failure<E>> {
        match task {
            Task::Compute {
                entity,
                kind,
                computation,
                ..
            } => {
                let entity = self.registry.entity(entity);
                run_guarded(|| computation.compute(&entity, self))
                    .map_err(FailureCause::from)
                    .and_then(|result| self.apply(result).map_err(FailureCause::from))
                    .map_err(|cause| Failure {
                        entity,
                        kind: self.kind_spec(kind).name,
                        cause,
                        continuation: String::new(),
                    })
            }
            Task::Resume(Wakeup {
                depender,
                mut suspension,
                trigger,
                trigger_state,
            }) => {
                let updated = self.eps(trigger, trigger_state.clone());
                let outcome = match run_guarded(|| suspension.continuation.resume(&updated, self)) {
                    Ok(ComputationResult::NoResult) => {
                        let continuation = format!("{:?}", suspension.continuation);
                        return match self.registry.resuspend(
                            depender,
                            suspension,
                            trigger,
                            trigger_state,
                        ) {
                            Ok(wakeups) => {
                                self.schedule(wakeups);
                                Ok(())
                            }
                            Err(message) => Err(Failure {
                                entity: self.registry.entity(depender.entity),
                                kind: self.kind_spec(depender.kind).name,
                                cause: FailureCause::from(self.violation(depender, message)),
                                continuation,
                            }),
                        };
                    }
                    Ok(result) => self.apply(result).map_err(FailureCause::from),
                    Err(err) => Err(FailureCause::from(err)),
                };
                outcome.map_err(|cause| Failure {
                    entity: self.registry.entity(depender.entity),
                    kind: self.kind_spec(depender.kind).name,
                    cause,
                    continuation: format!("{:?}", suspension.continuation),
                })
            }
        }
    }

    /// One resolution step at quiescence. Returns how many properties were
    /// committed.
    fn resolve_open(&self, report: &mut PhaseReport) -> Result<usize, StoreError> {
        let placeholders = self.registry.placeholders();
        if !placeholders.is_empty() {
            for epk in &placeholders {
                let fallback = self.kind_spec(epk.kind).fallback.clone();
                self.force(*epk, fallback, FallbackReason::NotComputed)?;
            }
            report.fallbacks += placeholders.len();
            return Ok(placeholders.len());
        }

        let cycles = self.registry.closed_cycles();
        if !cycles.is_empty() {
            // Members must not be resumed by each other's commits.
            for epk in cycles.iter().flatten() {
                self.registry.cancel_suspension(*epk);
            }
            let mut committed = 0;
            for cycle in &cycles {
                debug!(size = cycle.len(), "resolving cyclic dependency");
                for epk in cycle {
                    let state = self.registry.state(*epk);
                    let (value, reason) = self.kind_spec(epk.kind).resolve(&state);
                    self.force(*epk, value, reason)?;
                }
                committed += cycle.len();
            }
            report.cycles_resolved += cycles.len();
            report.cyclic_properties += committed;
            return Ok(committed);
        }

        let mut resolved = 0;
        for kind in (0..=u16::MAX).take(self.kinds.len()) {
            resolved += self.finalize_kind(KindId(kind))?;
        }
        if resolved > 0 {
            warn!(resolved, "interim properties left after cycle resolution");
        }
        Ok(resolved)
    }
}
