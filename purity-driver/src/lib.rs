use std::sync::Arc;

use clap::{Parser as CommandLineParser, ValueEnum};
use propstore::context::{AnalysisContext, Config, ConfigError};
use purity_lib::{
    analysis::{Analyses, run_analyses},
    lexer::Lexer,
    parser::Parser,
    program::{self, FactSource},
};
use tracing::debug;
use utils::DiagnosticEmitter;

/// Filter directives for the log output, e.g., `PROPSTORE_LOG=debug`.
pub const LOG_VAR: &str = "PROPSTORE_LOG";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum CLIAnalyses {
    Purity,
    FieldMutability,
    ClassImmutability,
    All,
}

impl From<CLIAnalyses> for Analyses {
    fn from(value: CLIAnalyses) -> Self {
        match value {
            CLIAnalyses::Purity => Analyses::Purity,
            CLIAnalyses::FieldMutability => Analyses::FieldMutability,
            CLIAnalyses::ClassImmutability => Analyses::ClassImmutability,
            CLIAnalyses::All => Analyses::All,
        }
    }
}

#[derive(Debug, CommandLineParser, Default)]
#[command(
    name = "purity",
    version,
    about = "Compute method purity and field and class immutability from program facts."
)]
pub struct Opt {
    /// Print the parsed facts before analyzing them.
    #[arg(long)]
    pub dump_facts: bool,

    /// Name of the analysis whose results are printed, all of them by default.
    #[arg(long, value_name = "ANALYSIS_NAME")]
    pub analyze: Option<CLIAnalyses>,

    /// Worker threads for the analyses. Overrides PROPSTORE_CPU_THREADS.
    #[arg(long, value_name = "N")]
    pub cpu_threads: Option<usize>,

    /// Threads for reading the input. Overrides PROPSTORE_IO_THREADS.
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// File containing the program facts.
    pub filename: String,
}

pub fn build_context(opts: &Opt) -> Result<AnalysisContext, ConfigError> {
    let mut config = Config::from_env()?;
    if let Some(threads) = opts.cpu_threads {
        config = config.with_cpu_threads(threads);
    }
    if let Some(threads) = opts.io_threads {
        config = config.with_io_threads(threads);
    }
    AnalysisContext::new(config)
}

pub fn read_input(ctx: &AnalysisContext, filename: &str) -> std::io::Result<String> {
    ctx.io_pool().install(|| std::fs::read_to_string(filename))
}

pub fn process_source(
    src: &str,
    diag: &mut DiagnosticEmitter,
    ctx: &AnalysisContext,
    opts: &Opt,
) -> Option<()> {
    let lexer = Lexer::new(src, diag);
    let tokens = lexer.lex_all();
    if tokens.tokens.is_empty() {
        return None;
    }
    let parser = Parser::new(tokens, diag);
    let Some(parsed) = parser.parse() else {
        debug!(errors = diag.error_count(), "parsing failed");
        return None;
    };
    let facts = Arc::new(parsed);

    if opts.dump_facts {
        diag.out_ln(&program::print(&facts));
    }

    let selection = opts.analyze.map_or(Analyses::All, Analyses::from);
    debug!(?selection, classes = facts.classes().len(), "running analyses");
    match run_analyses(facts.clone(), ctx, selection) {
        Ok(results) => {
            for line in &results.lines {
                diag.out_ln(line);
            }
            Some(())
        }
        Err(err) => {
            diag.err_ln(&format!("Error: {err}"));
            for failure in err.failures() {
                let mut msg = format!(
                    "  {} ({}): {}",
                    facts.describe(failure.entity),
                    failure.kind,
                    failure.cause
                );
                if !failure.continuation.is_empty() {
                    msg.push_str(&format!(" while resuming {}", failure.continuation));
                }
                diag.err_ln(&msg);
            }
            None
        }
    }
}
