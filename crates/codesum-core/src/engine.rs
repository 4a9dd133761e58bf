//! One entry point answering [`AskRequest`]s.

use std::sync::Arc;

use anyhow::Context;
use codesum_index::{
    DiverseRetriever, ExclusionSet, IndexBuilder, RecursiveSplitter, SnapshotLoader,
};
use codesum_llm::LlmProvider;

use crate::config::Config;
use crate::conversation::{Answer, AskRequest};
use crate::pipeline::stages::{
    ChunkStep, FetchStep, IndexStep, Question, RetrieveStep, RewriteStep, SynthesizeStep,
};
use crate::pipeline::{Pipeline, PipelineError};
use crate::prompt::SystemPrompt;
use crate::repo::{Clock, GitFetcher, RepoCache, RepoFetcher, SystemClock};
use crate::rewrite::QueryRewriter;
use crate::synthesize::AnswerSynthesizer;

/// Repository question answering: fetch, chunk, index, rewrite, retrieve, synthesize.
///
/// Components are shared across requests; the index is rebuilt for every request and
/// dropped with it.
pub struct CodeQa<P, F = GitFetcher, C = SystemClock> {
    cache: Arc<RepoCache<F, C>>,
    loader: Arc<SnapshotLoader>,
    splitter: Arc<RecursiveSplitter>,
    builder: Arc<IndexBuilder<P>>,
    rewriter: Arc<QueryRewriter<P>>,
    retriever: DiverseRetriever,
    synthesizer: Arc<AnswerSynthesizer<P>>,
    default_question: String,
}

impl<P: LlmProvider> CodeQa<P> {
    /// Wire every component from `config`, cloning repositories with [`GitFetcher`].
    ///
    /// # Errors
    ///
    /// Returns an error if the system prompt cannot be loaded or the exclusion patterns
    /// do not compile.
    pub fn from_config(config: &Config, provider: Arc<P>) -> anyhow::Result<Self> {
        let cache = RepoCache::new(
            &config.cache.root,
            config.cache.ttl(),
            GitFetcher::new(config.timeouts.fetch()),
        );
        Self::with_cache(config, provider, cache)
    }
}

impl<P: LlmProvider, F: RepoFetcher, C: Clock> CodeQa<P, F, C> {
    /// Like [`CodeQa::from_config`] with a caller-supplied repository cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the system prompt cannot be loaded or the exclusion patterns
    /// do not compile.
    pub fn with_cache(
        config: &Config,
        provider: Arc<P>,
        cache: RepoCache<F, C>,
    ) -> anyhow::Result<Self> {
        let prompt = SystemPrompt::load(&config.prompt.system_path).with_context(|| {
            format!(
                "failed to load system prompt {}",
                config.prompt.system_path.display()
            )
        })?;
        let exclusions =
            ExclusionSet::new(&config.documents.exclude).context("invalid documents.exclude")?;

        let rewriter = QueryRewriter::new(Arc::clone(&provider), config.timeouts.llm())
            .rewrite_without_history(config.prompt.rewrite_without_history);
        let synthesizer = AnswerSynthesizer::new(Arc::clone(&provider), prompt, config.timeouts.llm())
            .with_budget(config.llm.context_window, config.llm.max_tokens);

        Ok(Self {
            cache: Arc::new(cache),
            loader: Arc::new(SnapshotLoader::new(exclusions, config.documents.max_file_size)),
            splitter: Arc::new(RecursiveSplitter::new(config.chunking.into())),
            builder: Arc::new(IndexBuilder::new(provider, config.index_embedding())),
            rewriter: Arc::new(rewriter),
            retriever: DiverseRetriever::new(config.retrieval.into()),
            synthesizer: Arc::new(synthesizer),
            default_question: config.prompt.default_question.clone(),
        })
    }

    /// Check the request shape and fill in the default question.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` if the repository URL is missing.
    pub fn validate(&self, request: AskRequest) -> Result<Question, PipelineError> {
        let repository_url = request.repository_url.trim();
        if repository_url.is_empty() {
            return Err(PipelineError::Validation(
                "repository_url is required".into(),
            ));
        }
        let text = match request.question {
            Some(q) if !q.trim().is_empty() => q,
            _ => self.default_question.clone(),
        };
        Ok(Question {
            repository_url: repository_url.to_owned(),
            history: request.history,
            text,
        })
    }

    /// Answer one request. Either a complete answer or the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineError` whose [`kind`](PipelineError::kind) identifies the
    /// failing stage category.
    pub async fn ask(&self, request: AskRequest) -> Result<Answer, PipelineError> {
        let question = self.validate(request)?;
        let url = question.repository_url.clone();
        tracing::info!(repo = %url, turns = question.history.len(), "answering question");

        let pipeline = Pipeline::start(FetchStep::new(Arc::clone(&self.cache)))
            .step(ChunkStep::new(
                Arc::clone(&self.loader),
                Arc::clone(&self.splitter),
            ))
            .step(IndexStep::new(Arc::clone(&self.builder)))
            .step(RewriteStep::new(Arc::clone(&self.rewriter)))
            .step(RetrieveStep::new(
                Arc::clone(&self.builder),
                self.retriever.clone(),
            ))
            .step(SynthesizeStep::new(Arc::clone(&self.synthesizer)));

        match pipeline.run(question).await {
            Ok(answer) => {
                tracing::info!(repo = %url, "answer ready");
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(repo = %url, kind = %e.kind(), "request failed: {e}");
                Err(e)
            }
        }
    }
}
