use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::*;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |var| vars.get(var).cloned()
}

#[test]
fn defaults_are_positive() {
    let config = Config::default();
    assert!(config.cpu_threads >= 1);
    assert!(config.io_threads >= 1);
    assert!(config.validate().is_ok());
}

#[test]
fn env_overrides_defaults() {
    let config = Config::from_lookup(lookup(&[(CPU_THREADS_VAR, "3"), (IO_THREADS_VAR, " 2 ")]))
        .unwrap();
    assert_eq!(
        config,
        Config {
            cpu_threads: 3,
            io_threads: 2
        }
    );

    let only_cpu = Config::from_lookup(lookup(&[(CPU_THREADS_VAR, "5")])).unwrap();
    assert_eq!(only_cpu.cpu_threads, 5);
    assert_eq!(only_cpu.io_threads, Config::default().io_threads);
}

#[test]
fn bad_env_values() {
    let err = Config::from_lookup(lookup(&[(CPU_THREADS_VAR, "many")])).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidNumber { var: CPU_THREADS_VAR, ref value } if value == "many"
    ));

    let err = Config::from_lookup(lookup(&[(IO_THREADS_VAR, "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::ZeroThreads(IO_THREADS_VAR)));
}

#[test]
fn zero_threads_rejected_by_context() {
    let config = Config::default().with_cpu_threads(0);
    assert!(matches!(
        AnalysisContext::new(config),
        Err(ConfigError::ZeroThreads("cpu_threads"))
    ));
}

#[test]
fn context_pools_and_interruption() {
    let config = Config::default().with_cpu_threads(2).with_io_threads(1);
    let flag = Arc::new(AtomicBool::new(false));
    let ctx = AnalysisContext::new(config)
        .unwrap()
        .with_interrupt_check({
            let flag = Arc::clone(&flag);
            move || flag.load(Ordering::SeqCst)
        });

    assert_eq!(ctx.config().cpu_threads, 2);
    assert_eq!(ctx.cpu_pool().current_num_threads(), 2);
    assert_eq!(ctx.io_pool().install(|| 40 + 2), 42);
    assert!(!ctx.is_interrupted());
    flag.store(true, Ordering::SeqCst);
    assert!(ctx.is_interrupted());
    ctx.shutdown();
}
