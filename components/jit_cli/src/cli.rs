//! Command line definition

use clap::{Parser, Subcommand};
use jit_compiler::EngineConfig;

/// Drive the sample units through the JIT
#[derive(Debug, Parser)]
#[command(name = "jit-demo", version, about = "In-process JIT demo host")]
pub struct Cli {
    /// IR optimization level (0-3)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub opt_level: u8,

    /// Write /tmp/perf-<pid>.map entries for JIT code
    #[arg(long)]
    pub perf_map: bool,

    /// Compile each batch on the calling thread only
    #[arg(long)]
    pub sequential: bool,

    /// Log engine activity at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Sample to run
    #[command(subcommand)]
    pub command: Command,
}

/// Sample programs
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Compute x * y + z
    MulAdd {
        /// First factor
        #[arg(default_value_t = 23, allow_negative_numbers = true)]
        x: i32,
        /// Second factor
        #[arg(default_value_t = 80, allow_negative_numbers = true)]
        y: i32,
        /// Addend
        #[arg(default_value_t = 90, allow_negative_numbers = true)]
        z: i32,
    },
    /// Sum the x coordinates of a point array given as x/y pairs
    SumArray {
        /// Coordinates: x0 y0 x1 y1 ...
        #[arg(allow_negative_numbers = true)]
        values: Vec<i32>,
    },
    /// Run the incrementing coroutine to completion
    Coro {
        /// Starting value
        #[arg(default_value_t = 8192, allow_negative_numbers = true)]
        n: i32,
    },
    /// Print the host target description
    Layout,
}

impl Cli {
    /// Engine configuration selected by the flags
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_opt_level(self.opt_level)
            .with_perf_map(self.perf_map)
            .with_concurrent_compile(!self.sequential)
    }

    /// Default log filter directive
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}
