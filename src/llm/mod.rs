//! LLM integration for codeforge.
//!
//! Both the synthesis call and the repair call go through the same
//! OpenAI-compatible chat endpoint. Callers depend on the [`LlmProvider`]
//! trait so tests can substitute scripted providers.
//!
//! ```ignore
//! use codeforge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new(
//!     "",
//!     vec![Message::system("You write Rhai."), Message::user("fn add(a, b)")],
//! );
//! let reply = client.generate(request).await?;
//! println!("{}", reply.first_content().unwrap_or_default());
//! ```

pub mod litellm;

pub use litellm::{Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message};
