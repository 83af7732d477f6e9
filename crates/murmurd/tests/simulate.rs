//! End-to-end simulation runs driven from parsed CLI arguments

use clap::Parser;
use murmurd::simulation::identity;
use murmurd::{Cli, Command, Simulation, SimulationConfig};

fn simulate(args: &[&str]) -> murmurd::SimulationReport {
    let cli = Cli::parse_from(std::iter::once("murmurd").chain(args.iter().copied()));
    cli.validate().unwrap();
    let Command::Simulate(args) = cli.command else {
        panic!("expected simulate");
    };
    Simulation::new(SimulationConfig::from(&args)).run()
}

#[test]
fn test_default_scenario_without_failures() {
    let report = simulate(&["simulate", "--nodes", "8", "--ticks", "60"]);
    assert_eq!(report.joined, 8);
    assert!(report.failures.is_empty());
    assert!(report.false_removals.is_empty());
    for view in &report.views {
        assert_eq!(view.alive.len(), 8);
        assert!(view.suspected.is_empty());
    }
}

#[test]
fn test_multi_failure_scenario() {
    let report = simulate(&[
        "simulate",
        "--nodes",
        "10",
        "--ticks",
        "200",
        "--fail-at",
        "50",
        "--fail-nodes",
        "2,5,7",
    ]);

    assert_eq!(report.failures.len(), 3);
    for failure in &report.failures {
        assert!(failure.is_complete(), "{} not removed everywhere", failure.address);
        assert_eq!(failure.detected_by.len(), 7);
    }
    assert!(report.false_removals.is_empty());

    let survivors: Vec<_> = (0..10)
        .filter(|i| ![2, 5, 7].contains(i))
        .map(identity)
        .collect();
    for view in report.views.iter().filter(|v| !v.crashed) {
        assert_eq!(view.alive, survivors);
    }
}

#[test]
fn test_random_fanout_scenario() {
    let report = simulate(&[
        "simulate",
        "--nodes",
        "8",
        "--ticks",
        "150",
        "--fanout",
        "3",
        "--fail-timeout",
        "12",
        "--fail-at",
        "40",
        "--fail-nodes",
        "4",
    ]);

    assert_eq!(report.joined, 8);
    assert!(report.failures[0].is_complete());
}

#[test]
fn test_json_report_shape() {
    let report = simulate(&["simulate", "--nodes", "3", "--ticks", "10"]);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["joined"], 3);
    assert!(json["network"]["sent"].as_u64().unwrap() > 0);
    assert_eq!(json["views"].as_array().unwrap().len(), 3);
    assert!(json["totals"]["sent"].as_u64().unwrap() > 0);
}
