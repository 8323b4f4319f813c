//! Scenario Module
//!
//! Declarative YAML scenarios that drive the runtime end to end without an
//! external compiler.
//!
//! # Structure
//!
//! - [`model`]: Services, methods and instructions
//! - [`parser`]: YAML loading
//! - [`validator`]: Reference and shape checks
//! - [`script`]: Method bodies as protocol coroutines, and installation

pub mod model;
pub mod parser;
pub mod script;
pub mod validator;

pub use model::{CallDef, Instruction, MethodDef, Scenario, ServiceDef};
pub use parser::{load_scenario, parse_scenario};
pub use script::{ScenarioBundle, ScriptCoroutine};
pub use validator::{validate_scenario, ValidationError};
