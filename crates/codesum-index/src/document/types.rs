/// One text file of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the snapshot root, `/`-separated.
    pub path: String,
    pub content: String,
}

impl Document {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A contiguous slice of a document's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Stable content address derived from path and byte span.
    pub id: String,
    pub path: String,
    pub text: String,
    /// Position of this chunk within its document.
    pub index: usize,
    /// Byte offset of the first character in the source document.
    pub start: usize,
    /// Byte offset one past the last character in the source document.
    pub end: usize,
    /// 1-based inclusive line range.
    pub lines: (usize, usize),
}
