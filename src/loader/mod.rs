//! Dynamic loading of generated artifacts.
//!
//! Artifacts are Rhai scripts interpreted by an embedded runtime, never
//! compiled native code. Each one is loaded under a namespace derived from
//! its task and function names so identical symbols from different tasks
//! never collide.

mod module;
pub mod runtime;

pub use module::{DynamicModuleLoader, ScriptFunction};
pub use runtime::{bounded_engine, dynamic_to_json, json_to_dynamic, script_engine};
