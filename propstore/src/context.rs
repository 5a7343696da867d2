use core::fmt::{self, Debug};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;
use tracing::debug;

pub const CPU_THREADS_VAR: &str = "PROPSTORE_CPU_THREADS";
pub const IO_THREADS_VAR: &str = "PROPSTORE_IO_THREADS";

/// Thread budget of a run. Supplied once at start-up, immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Workers draining the property store's task queue.
    pub cpu_threads: usize,
    /// Threads reserved for I/O-bound work around the analyses, e.g.,
    /// reading inputs. The store never runs computations on them.
    pub io_threads: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}, expected a positive integer")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must be at least 1")]
    ZeroThreads(&'static str),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Default for Config {
    fn default() -> Self {
        let cores = num_cpus::get();
        Self {
            cpu_threads: (cores * 3 / 4).max(1),
            io_threads: (cores / 4).max(1),
        }
    }
}

impl Config {
    /// Defaults overridden by `PROPSTORE_CPU_THREADS` and
    /// `PROPSTORE_IO_THREADS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(CPU_THREADS_VAR) {
            config.cpu_threads = parse_thread_count(CPU_THREADS_VAR, &value)?;
        }
        if let Some(value) = lookup(IO_THREADS_VAR) {
            config.io_threads = parse_thread_count(IO_THREADS_VAR, &value)?;
        }
        Ok(config)
    }

    pub fn with_cpu_threads(mut self, threads: usize) -> Self {
        self.cpu_threads = threads;
        self
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_threads == 0 {
            return Err(ConfigError::ZeroThreads("cpu_threads"));
        }
        if self.io_threads == 0 {
            return Err(ConfigError::ZeroThreads("io_threads"));
        }
        Ok(())
    }
}

fn parse_thread_count(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::ZeroThreads(var)),
        Ok(n) => Ok(n),
        Err(_) => Err(ConfigError::InvalidNumber {
            var,
            value: value.to_owned(),
        }),
    }
}

type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Everything a run shares: the thread pools and the interruption poll.
/// Built once per run and handed to every [`crate::store::PropertyStore`]
/// explicitly; there is no process-wide state.
pub struct AnalysisContext {
    config: Config,
    cpu_pool: ThreadPool,
    io_pool: ThreadPool,
    interrupted: InterruptCheck,
}

impl AnalysisContext {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let cpu_pool = ThreadPoolBuilder::new()
            .num_threads(config.cpu_threads)
            .thread_name(|i| format!("propstore-cpu-{i}"))
            .build()?;
        let io_pool = ThreadPoolBuilder::new()
            .num_threads(config.io_threads)
            .thread_name(|i| format!("propstore-io-{i}"))
            .build()?;
        debug!(
            cpu_threads = config.cpu_threads,
            io_threads = config.io_threads,
            "analysis context created"
        );
        Ok(Self {
            config,
            cpu_pool,
            io_pool,
            interrupted: Arc::new(|| false),
        })
    }

    /// Installs the poll the scheduler checks between tasks. Once it returns
    /// true, no new task is started.
    pub fn with_interrupt_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupted = Arc::new(check);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_interrupted(&self) -> bool {
        (self.interrupted)()
    }

    pub(crate) fn cpu_pool(&self) -> &ThreadPool {
        &self.cpu_pool
    }

    /// Pool for I/O-bound work of the surrounding driver.
    pub fn io_pool(&self) -> &ThreadPool {
        &self.io_pool
    }

    /// Tears down both pools. Stores borrowing the context must be gone.
    pub fn shutdown(self) {
        debug!("analysis context shut down");
        drop(self);
    }
}

impl Debug for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod context_tests;
