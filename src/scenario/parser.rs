//! Scenario Parser
//!
//! Handles loading and parsing scenario definitions from YAML files.

use std::error::Error;
use std::fs;

use log::{debug, info};

use super::model::Scenario;
use super::validator::validate_scenario;

/// Loads a scenario from a YAML file.
///
/// This function:
/// 1. Reads the YAML file
/// 2. Parses it into a [`Scenario`]
/// 3. Validates services, references and await shapes
///
/// # Arguments
///
/// * `path` - Path to the scenario YAML file
///
/// # Example
///
/// ```rust,no_run
/// use tickflow::scenario::load_scenario;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scenario = load_scenario("checkout.yaml")?;
///     println!("Loaded {} services", scenario.services.len());
///     Ok(())
/// }
/// ```
pub fn load_scenario(path: &str) -> Result<Scenario, Box<dyn Error>> {
    info!("Loading scenario from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read scenario file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_scenario(&yaml_content)
}

/// Parses and validates a scenario from YAML text.
pub fn parse_scenario(yaml_content: &str) -> Result<Scenario, Box<dyn Error>> {
    let scenario: Scenario = serde_yaml::from_str(yaml_content).map_err(|e| {
        format!(
            "Failed to parse scenario YAML: {}. Check the file format.",
            e
        )
    })?;

    info!(
        "Parsed {} services, {} entry calls, {} timers, {} intervals",
        scenario.services.len(),
        scenario.entry.len(),
        scenario.timers.len(),
        scenario.intervals.len()
    );

    validate_scenario(&scenario)?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
services:
  - name: Clock
    methods:
      - name: tick
        body:
          - log: tock
entry:
  - { service: Clock, method: tick }
"#;

    #[test]
    fn test_load_scenario_file_not_found() {
        let result = load_scenario("/nonexistent/path/scenario.yaml");
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Failed to read scenario file"));
    }

    #[test]
    fn test_load_scenario_valid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("clock.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let scenario = load_scenario(path.to_str().unwrap()).unwrap();
        assert_eq!(scenario.services.len(), 1);
        assert_eq!(scenario.entry[0].node_id(), "Clock.tick");
        assert!(scenario.runtime.is_none());
    }

    #[test]
    fn test_load_scenario_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        std::fs::write(&path, "this is not valid yaml: [[[").unwrap();

        let message = load_scenario(path.to_str().unwrap()).unwrap_err().to_string();
        assert!(message.contains("Failed to parse scenario YAML"));
    }

    #[test]
    fn test_parse_scenario_runs_validation() {
        let yaml = r#"
services:
  - name: A
entry:
  - { service: A, method: missing }
"#;
        let message = parse_scenario(yaml).unwrap_err().to_string();
        assert!(message.contains("unknown method 'A.missing'"));
    }

    #[test]
    fn test_parse_scenario_runtime_section() {
        let yaml = format!("runtime:\n  max_steps_per_flow: 12\n{}", MINIMAL);
        let scenario = parse_scenario(&yaml).unwrap();
        let config = scenario.runtime.unwrap();
        assert_eq!(config.max_steps_per_flow, 12);
        assert_eq!(config.max_rounds_per_tick, 10_000);
    }
}
