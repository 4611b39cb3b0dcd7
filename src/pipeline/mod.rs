//! Pipeline model: tasks, their context, and operator graphs.
//!
//! # Architecture
//!
//! - **Task**: named unit whose parameters may still be function placeholders
//! - **TaskContextProvider**: renders templates and fetches dependency
//!   outputs from a **SessionStore**
//! - **DependencyGraphSequencer**: orders a node/edge graph
//! - **ScriptGenerator**: turns an ordered graph into a Rhai or shell script,
//!   using parameter defaults from an **OperatorRegistry**
//!
//! # Example
//!
//! ```rust,ignore
//! use codeforge::pipeline::{
//!     DependencyGraphSequencer, InMemoryOperatorRegistry, PipelineGraph, ScriptGenerator,
//! };
//!
//! let graph = PipelineGraph::from_file("graph.yaml".as_ref())?;
//! let ordered = DependencyGraphSequencer::new().sequence_graph(&graph)?;
//! let registry = InMemoryOperatorRegistry::from_file("operators.yaml".as_ref())?;
//! ScriptGenerator::new(&registry).write(&ordered, "pipeline.rhai".as_ref())?;
//! ```

pub mod context;
pub mod registry;
pub mod script;
pub mod sequencer;
pub mod session;
pub mod task;

pub use context::{render_templates, StoreContextProvider, TaskContext, TaskContextProvider};
pub use registry::{InMemoryOperatorRegistry, OperatorRegistry, OperatorSignature};
pub use script::{ScriptFormat, ScriptGenerator, SHARED_RESOURCE};
pub use sequencer::{
    topological_order, DependencyGraphSequencer, PipelineEdge, PipelineGraph, PipelineNode,
};
pub use session::{output_key, InMemorySessionStore, RedisSessionStore, SessionStore};
pub use task::{FunctionSpec, ParamValue, PipelineDef, Task, PLACEHOLDER_PREFIX};
