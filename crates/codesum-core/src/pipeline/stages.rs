//! The six stages of one request, each with its own input and output type.
//!
//! fetch → chunk → index → rewrite → retrieve → synthesize

use std::sync::Arc;

use codesum_index::{
    Chunk, DiverseRetriever, IndexBuilder, RecursiveSplitter, RetrievalResult, SnapshotLoader,
    VectorIndex,
};
use codesum_llm::LlmProvider;

use super::PipelineError;
use super::step::Step;
use crate::conversation::{Answer, ConversationTurn};
use crate::repo::{Clock, FetchError, HeadCommit, RepoCache, RepoFetcher, SnapshotLease};
use crate::rewrite::QueryRewriter;
use crate::synthesize::{AnswerSynthesizer, SynthesisInput};

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub repository_url: String,
    pub history: Vec<ConversationTurn>,
    pub text: String,
}

/// Identity of the snapshot a request is answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub id: String,
    pub head: HeadCommit,
}

#[derive(Debug)]
pub struct Fetched {
    pub question: Question,
    pub lease: SnapshotLease,
}

#[derive(Debug)]
pub struct Chunked {
    pub question: Question,
    pub snapshot: SnapshotInfo,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug)]
pub struct Indexed {
    pub question: Question,
    pub snapshot: SnapshotInfo,
    pub index: VectorIndex,
}

#[derive(Debug)]
pub struct Rewritten {
    pub question: Question,
    pub snapshot: SnapshotInfo,
    pub index: VectorIndex,
    pub query: String,
}

#[derive(Debug)]
pub struct Retrieved {
    pub question: Question,
    pub snapshot: SnapshotInfo,
    pub retrieved: RetrievalResult,
}

pub struct FetchStep<F, C> {
    cache: Arc<RepoCache<F, C>>,
}

impl<F, C> FetchStep<F, C> {
    #[must_use]
    pub fn new(cache: Arc<RepoCache<F, C>>) -> Self {
        Self { cache }
    }
}

impl<F: RepoFetcher, C: Clock> Step for FetchStep<F, C> {
    type Input = Question;
    type Output = Fetched;

    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn run(&self, question: Question) -> Result<Fetched, PipelineError> {
        let lease = self.cache.acquire(&question.repository_url).await?;
        Ok(Fetched { question, lease })
    }
}

/// Loads documents and splits them while the snapshot lease is held.
pub struct ChunkStep {
    loader: Arc<SnapshotLoader>,
    splitter: Arc<RecursiveSplitter>,
}

impl ChunkStep {
    #[must_use]
    pub fn new(loader: Arc<SnapshotLoader>, splitter: Arc<RecursiveSplitter>) -> Self {
        Self { loader, splitter }
    }
}

impl Step for ChunkStep {
    type Input = Fetched;
    type Output = Chunked;

    fn name(&self) -> &'static str {
        "chunk"
    }

    async fn run(&self, fetched: Fetched) -> Result<Chunked, PipelineError> {
        let Fetched { question, lease } = fetched;
        let loader = Arc::clone(&self.loader);
        let splitter = Arc::clone(&self.splitter);
        let root = lease.path().to_path_buf();

        let (documents, chunks) = tokio::task::spawn_blocking(move || {
            let documents = loader.load(&root)?;
            let chunks = splitter.split_all(&documents);
            Ok::<_, codesum_index::IndexError>((documents.len(), chunks))
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;

        tracing::info!(repo = %lease.id(), documents, chunks = chunks.len(), "snapshot chunked");
        let snapshot = SnapshotInfo {
            id: lease.id().to_owned(),
            head: lease.head().clone(),
        };
        drop(lease);

        Ok(Chunked {
            question,
            snapshot,
            chunks,
        })
    }
}

pub struct IndexStep<P> {
    builder: Arc<IndexBuilder<P>>,
}

impl<P> IndexStep<P> {
    #[must_use]
    pub fn new(builder: Arc<IndexBuilder<P>>) -> Self {
        Self { builder }
    }
}

impl<P: LlmProvider> Step for IndexStep<P> {
    type Input = Chunked;
    type Output = Indexed;

    fn name(&self) -> &'static str {
        "index"
    }

    async fn run(&self, chunked: Chunked) -> Result<Indexed, PipelineError> {
        let index = self.builder.build(chunked.chunks).await?;
        Ok(Indexed {
            question: chunked.question,
            snapshot: chunked.snapshot,
            index,
        })
    }
}

pub struct RewriteStep<P> {
    rewriter: Arc<QueryRewriter<P>>,
}

impl<P> RewriteStep<P> {
    #[must_use]
    pub fn new(rewriter: Arc<QueryRewriter<P>>) -> Self {
        Self { rewriter }
    }
}

impl<P: LlmProvider> Step for RewriteStep<P> {
    type Input = Indexed;
    type Output = Rewritten;

    fn name(&self) -> &'static str {
        "rewrite"
    }

    async fn run(&self, indexed: Indexed) -> Result<Rewritten, PipelineError> {
        let query = self
            .rewriter
            .rewrite(&indexed.question.history, &indexed.question.text)
            .await?;
        Ok(Rewritten {
            question: indexed.question,
            snapshot: indexed.snapshot,
            index: indexed.index,
            query,
        })
    }
}

pub struct RetrieveStep<P> {
    builder: Arc<IndexBuilder<P>>,
    retriever: DiverseRetriever,
}

impl<P> RetrieveStep<P> {
    #[must_use]
    pub fn new(builder: Arc<IndexBuilder<P>>, retriever: DiverseRetriever) -> Self {
        Self { builder, retriever }
    }
}

impl<P: LlmProvider> Step for RetrieveStep<P> {
    type Input = Rewritten;
    type Output = Retrieved;

    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, rewritten: Rewritten) -> Result<Retrieved, PipelineError> {
        let Rewritten {
            question,
            snapshot,
            index,
            query,
        } = rewritten;

        // Nothing to rank against; skip embedding the query.
        let retrieved = if index.is_empty() {
            RetrievalResult::default()
        } else {
            let vector = self.builder.embed_query(&query, index.dimensions()).await?;
            self.retriever.retrieve(&index, &vector)
        };
        tracing::info!(
            repo = %snapshot.id,
            chunks = retrieved.len(),
            tokens = retrieved.total_tokens,
            "retrieved context"
        );

        Ok(Retrieved {
            question,
            snapshot,
            retrieved,
        })
    }
}

pub struct SynthesizeStep<P> {
    synthesizer: Arc<AnswerSynthesizer<P>>,
}

impl<P> SynthesizeStep<P> {
    #[must_use]
    pub fn new(synthesizer: Arc<AnswerSynthesizer<P>>) -> Self {
        Self { synthesizer }
    }
}

impl<P: LlmProvider> Step for SynthesizeStep<P> {
    type Input = Retrieved;
    type Output = Answer;

    fn name(&self) -> &'static str {
        "synthesize"
    }

    async fn run(&self, retrieved: Retrieved) -> Result<Answer, PipelineError> {
        let Retrieved {
            question,
            snapshot,
            retrieved,
        } = retrieved;

        let answer = self
            .synthesizer
            .synthesize(&SynthesisInput {
                retrieved: &retrieved,
                history: &question.history,
                question: &question.text,
                head: &snapshot.head,
                repository: &snapshot.id,
            })
            .await?;

        Ok(Answer {
            commit_message: snapshot.head.message,
            commit_author: snapshot.head.author,
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use codesum_index::{Document, EmbeddingConfig, RetrievalConfig, SplitterConfig};
    use codesum_llm::mock::MockProvider;

    use super::*;

    fn question(text: &str) -> Question {
        Question {
            repository_url: "https://github.com/owner/tool".into(),
            history: Vec::new(),
            text: text.into(),
        }
    }

    fn snapshot() -> SnapshotInfo {
        SnapshotInfo {
            id: "tool".into(),
            head: HeadCommit {
                id: "1".repeat(40),
                message: "Initial import".into(),
                author: "Ada <ada@example.com>".into(),
            },
        }
    }

    fn chunks() -> Vec<Chunk> {
        let splitter = RecursiveSplitter::new(SplitterConfig::default());
        splitter.split_all(&[
            Document::new("README.md", "tool parses config files"),
            Document::new("src/lib.rs", "pub fn parse_config() {}"),
        ])
    }

    #[tokio::test]
    async fn index_then_retrieve_with_mock_embeddings() {
        let provider = Arc::new(MockProvider::default());
        let builder = Arc::new(IndexBuilder::new(
            Arc::clone(&provider),
            EmbeddingConfig::default(),
        ));

        let indexed = IndexStep::new(Arc::clone(&builder))
            .run(Chunked {
                question: question("parse config"),
                snapshot: snapshot(),
                chunks: chunks(),
            })
            .await
            .unwrap();
        assert_eq!(indexed.index.len(), 2);

        let retrieved = RetrieveStep::new(builder, DiverseRetriever::new(RetrievalConfig::default()))
            .run(Rewritten {
                question: indexed.question,
                snapshot: indexed.snapshot,
                index: indexed.index,
                query: "parse config".into(),
            })
            .await
            .unwrap();
        assert_eq!(retrieved.retrieved.len(), 2);
        // One call for the index batch, one for the query.
        assert_eq!(provider.embed_calls(), 2);
    }

    #[tokio::test]
    async fn empty_index_skips_query_embedding() {
        let provider = Arc::new(MockProvider::default());
        let builder = Arc::new(IndexBuilder::new(
            Arc::clone(&provider),
            EmbeddingConfig::default(),
        ));
        let retrieved = RetrieveStep::new(builder, DiverseRetriever::new(RetrievalConfig::default()))
            .run(Rewritten {
                question: question("anything"),
                snapshot: snapshot(),
                index: VectorIndex::new(),
                query: "anything".into(),
            })
            .await
            .unwrap();
        assert!(retrieved.retrieved.is_empty());
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_maps_to_embedding_kind() {
        let provider = Arc::new(MockProvider::default().with_fail_embed());
        let builder = Arc::new(IndexBuilder::new(provider, EmbeddingConfig::default()));
        let err = IndexStep::new(builder)
            .run(Chunked {
                question: question("q"),
                snapshot: snapshot(),
                chunks: chunks(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::pipeline::ErrorKind::Embedding);
    }

    #[tokio::test]
    async fn synthesize_carries_commit_metadata() {
        let provider = Arc::new(MockProvider::with_responses(vec!["A config parser.".into()]));
        let prompt = crate::prompt::SystemPrompt::new("{context}").unwrap();
        let synthesizer = Arc::new(AnswerSynthesizer::new(
            provider,
            prompt,
            std::time::Duration::from_secs(5),
        ));

        let answer = SynthesizeStep::new(synthesizer)
            .run(Retrieved {
                question: question("What is it?"),
                snapshot: snapshot(),
                retrieved: RetrievalResult::default(),
            })
            .await
            .unwrap();
        assert_eq!(
            answer,
            Answer {
                commit_message: "Initial import".into(),
                commit_author: "Ada <ada@example.com>".into(),
                answer: "A config parser.".into(),
            }
        );
    }
}
