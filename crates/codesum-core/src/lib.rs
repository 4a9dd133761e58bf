//! Request orchestration for codesum: configuration, repository snapshots, query
//! rewriting, answer synthesis and the typed stage pipeline tying them together.

pub mod bootstrap;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod pipeline;
pub mod prompt;
pub mod repo;
pub mod rewrite;
pub mod secret;
pub mod synthesize;

pub use config::Config;
pub use conversation::{Answer, AskRequest, ConversationTurn, TurnRole};
pub use engine::CodeQa;
pub use pipeline::{ErrorKind, PipelineError};
pub use repo::{FetchError, GitFetcher, RepoCache};
