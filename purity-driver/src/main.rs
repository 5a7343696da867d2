use std::process::ExitCode;

use clap::Parser;
use purity_driver::{LOG_VAR, Opt, build_context, process_source, read_input};
use tracing_subscriber::EnvFilter;
use utils::DiagnosticEmitter;

fn main() -> ExitCode {
    // Silent unless PROPSTORE_LOG is set.
    if let Ok(filter) = EnvFilter::try_from_env(LOG_VAR) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let opts = Opt::parse();

    let mut diag = DiagnosticEmitter::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()));
    let ctx = match build_context(&opts) {
        Ok(ctx) => ctx,
        Err(err) => {
            diag.err_ln(&format!("Error: {err}"));
            return ExitCode::from(1);
        }
    };
    let contents = match read_input(&ctx, &opts.filename) {
        Ok(contents) => contents,
        Err(err) => {
            diag.err_ln(&format!("Error: failed to read {}: {err}", opts.filename));
            return ExitCode::from(1);
        }
    };

    if process_source(&contents, &mut diag, &ctx, &opts).is_none() {
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}
