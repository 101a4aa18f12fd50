//! Dependency graph compilation: view definitions to job trees.

pub mod compile;
pub mod dependency;

pub use compile::{compile_calc_config, compile_view, validate_view_definition, CompileContext, CompiledCalcConfig};
pub use dependency::DependencyGraph;
