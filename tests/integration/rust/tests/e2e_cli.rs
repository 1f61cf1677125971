//! End-to-End CLI Integration Tests
//!
//! Runs the samples through the jit_cli Runner API, from parsed command
//! line to the native result.

use clap::Parser;
use jit_cli::runner::points_from;
use jit_cli::{Cli, Command, Runner};

fn run(args: &[&str]) -> (Runner, Command) {
    let cli = Cli::try_parse_from(args).unwrap();
    let runner = Runner::new(cli.config()).unwrap();
    (runner, cli.command)
}

#[test]
fn test_e2e_mul_add() {
    let (mut runner, command) = run(&["jit-demo", "mul-add"]);
    let Command::MulAdd { x, y, z } = command else {
        panic!("unexpected command {:?}", command);
    };
    assert_eq!(runner.mul_add(x, y, z).unwrap(), 1930);
}

#[test]
fn test_e2e_sum_array_default() {
    let (mut runner, command) = run(&["jit-demo", "--opt-level", "3", "sum-array"]);
    let Command::SumArray { values } = command else {
        panic!("unexpected command {:?}", command);
    };
    let points = points_from(&values).unwrap();
    assert_eq!(runner.sum_array(&points).unwrap(), 186);
}

#[test]
fn test_e2e_sum_array_custom() {
    let (mut runner, command) = run(&["jit-demo", "sum-array", "10", "1", "-4", "1", "6", "0"]);
    let Command::SumArray { values } = command else {
        panic!("unexpected command {:?}", command);
    };
    let points = points_from(&values).unwrap();
    assert_eq!(runner.sum_array(&points).unwrap(), 12);
}

#[test]
fn test_e2e_coroutine() {
    let (mut runner, command) = run(&["jit-demo", "--sequential", "coro"]);
    let Command::Coro { n } = command else {
        panic!("unexpected command {:?}", command);
    };
    let trace = runner.coro(n).unwrap();
    assert_eq!(trace.printed, vec![8193, 8194]);
    assert_eq!(trace.done, vec![false, true]);
    assert_eq!(runner.engine().stats().units_failed, 0);
}

#[test]
fn test_e2e_all_samples_share_one_engine() {
    let (mut runner, _) = run(&["jit-demo", "layout"]);
    assert_eq!(runner.mul_add(2, 3, 4).unwrap(), 10);
    assert_eq!(runner.sum_array(&jit_cli::samples::DEFAULT_POINTS).unwrap(), 186);
    assert_eq!(runner.coro(0).unwrap().printed, vec![1, 2]);

    let stats = runner.engine().stats();
    assert_eq!(stats.units_added, 3);
    assert_eq!(stats.units_materialized, 3);
}
