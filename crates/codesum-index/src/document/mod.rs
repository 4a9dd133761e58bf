pub mod language;
pub mod loader;
pub mod splitter;
pub mod types;

pub use language::Language;
pub use loader::{DEFAULT_EXCLUDES, ExclusionSet, SnapshotLoader};
pub use splitter::{RecursiveSplitter, SplitterConfig};
pub use types::{Chunk, Document};
