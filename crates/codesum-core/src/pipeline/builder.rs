use std::future::Future;
use std::time::Instant;

use tracing::Instrument;

use super::PipelineError;
use super::step::Step;

/// A composed sequence of steps, seen from the outside as one step.
pub trait Stages: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// Number of steps in the sequence.
    const DEPTH: usize;

    fn run(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, PipelineError>> + Send;
}

async fn timed<S: Step>(
    step: &S,
    position: usize,
    input: S::Input,
) -> Result<S::Output, PipelineError> {
    let started = Instant::now();
    let result = step.run(input).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => tracing::debug!(step = step.name(), position, elapsed_ms, "step finished"),
        Err(e) => {
            tracing::debug!(step = step.name(), position, elapsed_ms, kind = %e.kind(), "step failed");
        }
    }
    result
}

/// The first step of a pipeline.
pub struct Head<S>(S);

impl<S: Step> Stages for Head<S> {
    type Input = S::Input;
    type Output = S::Output;

    const DEPTH: usize = 1;

    async fn run(&self, input: Self::Input) -> Result<Self::Output, PipelineError> {
        timed(&self.0, 1, input).await
    }
}

/// Everything so far followed by one more step.
pub struct Link<Done, Next> {
    done: Done,
    next: Next,
}

impl<Done, Next> Stages for Link<Done, Next>
where
    Done: Stages,
    Next: Step<Input = Done::Output>,
{
    type Input = Done::Input;
    type Output = Next::Output;

    const DEPTH: usize = Done::DEPTH + 1;

    async fn run(&self, input: Self::Input) -> Result<Self::Output, PipelineError> {
        let handed_over = self.done.run(input).await?;
        timed(&self.next, Self::DEPTH, handed_over).await
    }
}

/// Steps composed at compile time: each step's output type must match the next step's
/// input type. The first failure ends the run.
pub struct Pipeline<S> {
    stages: S,
}

impl Pipeline<()> {
    #[must_use]
    pub fn start<S: Step>(step: S) -> Pipeline<Head<S>> {
        Pipeline { stages: Head(step) }
    }
}

impl<S> Pipeline<S> {
    #[must_use]
    pub fn step<T: Step>(self, step: T) -> Pipeline<Link<S, T>> {
        Pipeline {
            stages: Link {
                done: self.stages,
                next: step,
            },
        }
    }
}

impl<S: Stages> Pipeline<S> {
    #[must_use]
    pub fn depth(&self) -> usize {
        S::DEPTH
    }

    /// Run every step inside one `pipeline` span.
    ///
    /// # Errors
    ///
    /// Returns the `PipelineError` of the first step that fails.
    pub async fn run(&self, input: S::Input) -> Result<S::Output, PipelineError> {
        let span = tracing::debug_span!("pipeline", steps = S::DEPTH);
        self.stages.run(input).instrument(span).await
    }
}
