//! This crate contains an incremental fixpoint engine for computing
//! properties of program entities, like the purity of a method or the
//! mutability of a field, with many interdependent analyses running in
//! parallel. Analyses never block on each other: when a computation needs a
//! property that is not known yet, it reports its best estimate together with
//! a [continuation](result::Continuation) and the store resumes it whenever
//! one of its dependencies changes. Properties are ordered by precision
//! (see [domains]), every update has to refine the previous one, and at the
//! end of a phase all properties are final, either computed or resolved with
//! a fallback.
//!
//! The design follows the property store of
//! [OPAL](https://www.opal-project.de/), see
//! * [Lattice Based Modularization of Static Analyses, Helm et al.](https://doi.org/10.1145/3236454.3236509)
//! * [Modular Collaborative Program Analysis in OPAL, Helm et al.](https://doi.org/10.1145/3368089.3409765)
//!
//! Look at the purity-lib crate for an example how to define analyses on top
//! of this crate.

/// Everything a run shares: thread pools, the interruption poll and the
/// thread budget read from the environment.
pub mod context;

/// Traits for defining lattices, with some concrete implementations.
/// Property values are ordered by these.
pub mod domains;

pub mod error;

/// Entities, property values, and the state a property can be in.
pub mod property;

/// The values computations hand back to the store.
pub mod result;

/// Phases: running the computations to a fixpoint and resolving what is left.
pub mod scheduler;

pub mod store;

mod dependencies;

#[cfg(test)]
mod test_utils;
