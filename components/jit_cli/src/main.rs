//! JIT demo host
//!
//! Parses CLI arguments, sets up logging and runs one sample through the
//! engine. Any engine error ends the process with a non-zero exit code.

use clap::Parser;
use jit_cli::runner::points_from;
use jit_cli::{Cli, CliResult, Command, Runner};
use tracing_subscriber::EnvFilter;

fn run(cli: &Cli) -> CliResult<()> {
    let mut runner = Runner::new(cli.config())?;

    match &cli.command {
        Command::MulAdd { x, y, z } => {
            let ret = runner.mul_add(*x, *y, *z)?;
            println!("{} * {} + {} = {}", x, y, z, ret);
        }
        Command::SumArray { values } => {
            let points = points_from(values)?;
            let ret = runner.sum_array(&points)?;
            println!("result = {}", ret);
        }
        Command::Coro { n } => {
            let trace = runner.coro(*n)?;
            println!("resumed {} time(s)", trace.resumes);
        }
        Command::Layout => println!("{}", runner.layout()),
    }

    let stats = runner.engine().stats();
    tracing::debug!(
        units = stats.units_materialized,
        functions = stats.functions_compiled,
        "done"
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
