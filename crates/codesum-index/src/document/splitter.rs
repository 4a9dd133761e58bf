use std::collections::VecDeque;
use std::ops::Range;

use super::language::Language;
use super::types::{Chunk, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    /// Maximum chunk length in characters.
    pub max_size: usize,
    /// Maximum number of characters shared by neighbouring chunks.
    pub overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_size: 2000,
            overlap: 200,
        }
    }
}

/// Recursive boundary-aware splitter.
///
/// Text is first cut into pieces no longer than `max_size`, trying each separator of the
/// document's language in priority order and recursing into pieces that are still too
/// long. Pieces are then packed greedily into chunks; each new chunk starts with the
/// longest run of trailing pieces from the previous one that fits in `overlap`.
///
/// Chunks are exact byte spans of the source, so dropping the overlapping prefix of every
/// chunk after the first and concatenating reproduces the document.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    max_size: usize,
    overlap: usize,
}

impl RecursiveSplitter {
    #[must_use]
    pub fn new(config: SplitterConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            max_size,
            overlap: config.overlap.min(max_size - 1),
        }
    }

    #[must_use]
    pub fn split_all(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|d| self.split(d)).collect()
    }

    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let text = document.content.as_str();
        let spans = self.spans(text, Language::detect(&document.path).separators());
        let newlines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();

        spans
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                id: chunk_id(&document.path, &span),
                path: document.path.clone(),
                text: text[span.clone()].to_owned(),
                index,
                lines: (
                    line_of(&newlines, span.start),
                    line_of(&newlines, span.end.saturating_sub(1).max(span.start)),
                ),
                start: span.start,
                end: span.end,
            })
            .collect()
    }

    /// Byte spans of the chunks `text` splits into, using `separators` in priority order.
    #[must_use]
    pub fn spans(&self, text: &str, separators: &[&str]) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        self.collect_pieces(text, 0..text.len(), separators, &mut pieces);
        self.merge(text, &pieces)
    }

    fn collect_pieces(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];
        if char_len(slice) <= self.max_size {
            out.push(range);
            return;
        }

        let Some(pos) = separators
            .iter()
            .position(|sep| sep.is_empty() || slice.contains(sep))
        else {
            push_chars(range.start, slice, out);
            return;
        };
        let separator = separators[pos];
        if separator.is_empty() {
            push_chars(range.start, slice, out);
            return;
        }

        let rest = &separators[pos + 1..];
        let mut segment_start = 0;
        for (offset, _) in slice.match_indices(separator) {
            if offset > segment_start {
                self.collect_pieces(
                    text,
                    range.start + segment_start..range.start + offset,
                    rest,
                    out,
                );
            }
            segment_start = offset;
        }
        self.collect_pieces(text, range.start + segment_start..range.end, rest, out);
    }

    fn merge(&self, text: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut window_len = 0;

        for piece in pieces {
            let len = char_len(&text[piece.clone()]);
            if window_len + len > self.max_size && !window.is_empty() {
                if let Some(span) = window_span(&window) {
                    chunks.push(span);
                }
                while window_len > self.overlap
                    || (window_len > 0 && window_len + len > self.max_size)
                {
                    let Some((_, dropped)) = window.pop_front() else {
                        break;
                    };
                    window_len -= dropped;
                }
            }
            window.push_back((piece.clone(), len));
            window_len += len;
        }

        if let Some(span) = window_span(&window) {
            chunks.push(span);
        }
        chunks
    }
}

fn window_span(window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    let (first, _) = window.front()?;
    let (last, _) = window.back()?;
    Some(first.start..last.end)
}

fn push_chars(base: usize, slice: &str, out: &mut Vec<Range<usize>>) {
    out.extend(
        slice
            .char_indices()
            .map(|(i, c)| base + i..base + i + c.len_utf8()),
    );
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn line_of(newlines: &[usize], byte: usize) -> usize {
    newlines.partition_point(|&nl| nl < byte) + 1
}

fn chunk_id(path: &str, span: &Range<usize>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(&span.start.to_le_bytes());
    hasher.update(&span.end.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}
