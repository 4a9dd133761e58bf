//! Language-model and embedding backends behind one provider contract.

pub mod any;
pub mod compatible;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{GenerationParams, LlmProvider, Message, Role};
