//! TickFlow - Deterministic Flow Execution Engine
//!
//! Runs instrumented backend code as a set of cooperatively scheduled flows
//! in discrete ticks, and reports every step (method loads, logs, calls,
//! returns, halts) as data a visual simulator can animate.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`memory`]: Simulated heap, instance addresses and node translation
//! - [`execution`]: Flows, execution stacks and the tick loop
//! - [`scenario`]: Declarative YAML scenarios compiled into flows
//! - [`monitoring`]: Execution timeline and Gantt chart reporting
//! - [`error`]: Fatal protocol violations
//!
//! # Example
//!
//! ```rust
//! use tickflow::{parse_scenario, Runtime, ScenarioBundle};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scenario = parse_scenario(
//!         r#"
//! services:
//!   - name: Clock
//!     methods:
//!       - name: tick
//!         body:
//!           - log: tock
//!           - return: 1
//! entry:
//!   - { service: Clock, method: tick }
//! "#,
//!     )?;
//!
//!     let mut runtime = Runtime::new();
//!     ScenarioBundle::install(&scenario, &mut runtime)?;
//!
//!     let container = runtime.tick()?;
//!     assert_eq!(container.responses().count(), 3);
//!     assert!(runtime.is_idle());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod memory;
pub mod monitoring;
pub mod scenario;

// Re-export commonly used types
pub use error::RuntimeError;
pub use execution::{Entities, Runtime, RuntimeConfig, TickResult, TickResultContainer};
pub use memory::{Address, Heap};
pub use monitoring::ExecutionTimeline;
pub use scenario::{load_scenario, parse_scenario, Scenario, ScenarioBundle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "TickFlow";
