//! Code synthesis and repair through an LLM.
//!
//! `CodeSynthesizer` writes a new function from its declaration and task
//! context; `CodeRepairer` patches an artifact given its failure evidence.
//! Both parse the reply with the lenient JSON extractor and require a `code`
//! field.

pub mod prompts;
mod synthesizer;

pub use prompts::PromptShape;
pub use synthesizer::{
    parse_synthesis, CodeRepairer, CodeSynthesizer, GenerationSettings, RepairRequest, Synthesis,
    SynthesisRequest,
};
