//! TickFlow CLI Entry Point
//!
//! Runs a YAML scenario tick by tick and prints what every tick produced.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario until it goes idle
//! tickflow checkout.yaml
//!
//! # Emit one JSON document per tick
//! tickflow checkout.yaml --json
//!
//! # Keep ticking after the last flow finished
//! tickflow checkout.yaml --ticks 100 --keep-going
//!
//! # Override the fixed-point budgets
//! tickflow checkout.yaml --max-rounds 500 --max-steps 10000
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use tickflow::execution::{TickResult, TickResultContainer};
use tickflow::{load_scenario, ExecutionTimeline, Runtime, ScenarioBundle, APP_NAME, VERSION};

/// Default number of ticks to run.
const DEFAULT_TICKS: u64 = 50;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    scenario_path: Option<String>,
    ticks: u64,
    json: bool,
    keep_going: bool,
    verbose: bool,
    max_rounds: Option<usize>,
    max_steps: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenario_path: None,
            ticks: DEFAULT_TICKS,
            json: false,
            keep_going: false,
            verbose: false,
            max_rounds: None,
            max_steps: None,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Deterministic Flow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: tickflow [OPTIONS] <SCENARIO_FILE>");
    println!();
    println!("Arguments:");
    println!("  <SCENARIO_FILE>     Path to scenario YAML file");
    println!();
    println!("Options:");
    println!("  --ticks N           Maximum ticks to run (default: {})", DEFAULT_TICKS);
    println!("  --json              Print each tick as a JSON document");
    println!("  --keep-going        Keep ticking after the runtime goes idle");
    println!("  --max-rounds N      Override rounds allowed per tick");
    println!("  --max-steps N       Override steps allowed per flow activation");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  tickflow checkout.yaml");
    println!("  tickflow checkout.yaml --json > trace.jsonl");
    println!("  tickflow checkout.yaml --ticks 200 --keep-going");
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let value = args
        .get(i)
        .ok_or_else(|| format!("{} requires a number argument", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", flag, value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--json" => config.json = true,
            "--keep-going" => config.keep_going = true,
            "--verbose" | "-v" => config.verbose = true,
            "--ticks" => {
                i += 1;
                config.ticks = parse_number(args, i, "--ticks")?;
            }
            "--max-rounds" => {
                i += 1;
                config.max_rounds = Some(parse_number(args, i, "--max-rounds")?);
            }
            "--max-steps" => {
                i += 1;
                config.max_steps = Some(parse_number(args, i, "--max-steps")?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.scenario_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.scenario_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Summary lines for one result. Labels of replayed effect-internal
/// responses carry a `*`.
fn result_lines(result: &TickResult) -> Vec<String> {
    match result {
        TickResult::Yielded {
            flow_id,
            flow_name,
            responses,
        } => {
            let labels: Vec<String> = responses
                .iter()
                .map(|r| {
                    if r.is_auto_pop {
                        format!("{}*", r.kind.label())
                    } else {
                        r.kind.label().to_string()
                    }
                })
                .collect();
            vec![format!("  #{:<4} {:<24} {}", flow_id, flow_name, labels.join(" "))]
        }
        TickResult::Constructed {
            flow_id,
            flow_name,
            return_value,
            cancelled,
        } => {
            let mut lines = vec![format!(
                "  #{:<4} {:<24} {} {}",
                flow_id,
                flow_name,
                "completed".green(),
                return_value
            )];
            lines.extend(cancelled.iter().map(|flow| {
                format!("  #{:<4} {:<24} {}", flow.id, flow.name, "cancelled".yellow())
            }));
            lines
        }
    }
}

/// Prints a one-line-per-result summary of a tick, followed by whatever
/// the tick buffered inside collapsed effects.
fn print_tick(container: &TickResultContainer, buffered: &[TickResultContainer]) {
    if container.is_empty() && buffered.iter().all(TickResultContainer::is_empty) {
        println!("{}", format!("tick {:>4} | idle", container.tick).dimmed());
        return;
    }

    println!("{}", format!("tick {:>4}", container.tick).cyan().bold());
    let results = container
        .results
        .iter()
        .chain(buffered.iter().flat_map(|b| b.results.iter()));
    for result in results {
        for line in result_lines(result) {
            println!("{}", line);
        }
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let Some(scenario_path) = config.scenario_path.clone() else {
        print_usage();
        return Err("no scenario file given".into());
    };

    setup_logging(config.verbose);

    if !config.json {
        print_banner();
    }

    // Load scenario
    let scenario = load_scenario(&scenario_path).map_err(|e| {
        error!("Failed to load scenario: {}", e);
        format!("Could not load scenario from '{}': {}", scenario_path, e)
    })?;

    let mut runtime_config = scenario.runtime.unwrap_or_default();
    if let Some(rounds) = config.max_rounds {
        runtime_config.max_rounds_per_tick = rounds;
    }
    if let Some(steps) = config.max_steps {
        runtime_config.max_steps_per_flow = steps;
    }
    info!("Runtime config: {:?}", runtime_config);

    let mut runtime = Runtime::with_config(runtime_config);
    let bundle = ScenarioBundle::install(&scenario, &mut runtime)?;
    info!(
        "Started {} entry flows, {} scheduled tasks",
        bundle.entry_flows.len(),
        bundle.tasks.len()
    );

    for _ in 0..config.ticks {
        let container = runtime.tick()?;
        let buffered = runtime.flush_auto_pop_results();

        if config.json {
            println!("{}", serde_json::to_string(&container)?);
            for replay in &buffered {
                println!("{}", serde_json::to_string(replay)?);
            }
        } else {
            print_tick(&container, &buffered);
        }

        if runtime.is_idle() && !config.keep_going {
            info!("Runtime idle after tick {}", container.tick);
            break;
        }
    }

    let entities = runtime.entities();
    if !runtime.is_idle() {
        warn!(
            "Stopped with {} active and {} suspended flows",
            entities.active.len(),
            entities.suspended.len()
        );
    }

    if !config.json {
        print!("{}", ExecutionTimeline::from_entities(&entities).gantt_chart());
        println!(
            "{} {} completed, {} cancelled",
            "Done:".green().bold(),
            entities.completed.len(),
            entities.cancelled.len()
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("tickflow")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let config = parse_arguments(&args(&["run.yaml"])).unwrap();
        assert_eq!(config.scenario_path.as_deref(), Some("run.yaml"));
        assert_eq!(config.ticks, DEFAULT_TICKS);
        assert!(!config.json);
        assert!(config.max_rounds.is_none());
    }

    #[test]
    fn test_parse_options() {
        let config = parse_arguments(&args(&[
            "--ticks",
            "7",
            "run.yaml",
            "--json",
            "--keep-going",
            "--max-rounds",
            "40",
            "--max-steps",
            "900",
        ]))
        .unwrap();
        assert_eq!(config.ticks, 7);
        assert!(config.json);
        assert!(config.keep_going);
        assert_eq!(config.max_rounds, Some(40));
        assert_eq!(config.max_steps, Some(900));
    }

    #[test]
    fn test_buffered_labels_are_marked() {
        let scenario = tickflow::parse_scenario(
            r#"
services:
  - name: Api
    methods:
      - name: handle
        body:
          - call: { service: Db, method: query, bind: rows }
          - return: $rows
  - name: Db
    methods:
      - name: query
        body:
          - call: { service: Db, method: index, bind: hit }
          - return: $hit
      - name: index
        body:
          - return: 1
entry:
  - { service: Api, method: handle }
effects:
  - { id: storage, nodes: [Db.query, Db.index] }
"#,
        )
        .unwrap();
        let mut runtime = Runtime::new();
        ScenarioBundle::install(&scenario, &mut runtime).unwrap();

        runtime.tick().unwrap();
        let buffered = runtime.flush_auto_pop_results();
        assert!(!buffered.is_empty());

        let lines: Vec<String> = buffered
            .iter()
            .flat_map(|b| b.results.iter())
            .flat_map(result_lines)
            .collect();
        assert!(lines.iter().any(|l| l.contains("LOAD*")));
        assert!(runtime.flush_auto_pop_results().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&["--ticks"])).is_err());
        assert!(parse_arguments(&args(&["--ticks", "many"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
    }
}
