//! Builder tipado para `ChunkStep`.
//!
//! Estados del builder:
//! - `StepBuilder`: nombre y políticas, sin fuente todavía.
//! - `SourceStepBuilder<I>`: fuente declarada; admite procesador o sumidero.
//! - `ProcessedStepBuilder<I, O>`: fuente y procesador; falta el sumidero.
//! - `ChunkStepBuilder<I, O>`: completo, listo para `build`.
//!
//! ```ignore
//! let step = StepBuilder::new("step").chunk_size(10)
//!                                    .reader(VecSource::new(items))
//!                                    .processor(FnProcessor::new(f))
//!                                    .writer(sink)
//!                                    .build()?;
//! ```

use super::chunk::ChunkStep;
use super::policy::{CommitPolicy, RetryPolicy, SkipPolicy};
use crate::config::BatchConfig;
use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::errors::BatchError;
use crate::item::{ItemProcessor, ItemSink, ItemSource, PassThrough};

#[derive(Debug, Clone)]
struct StepSettings {
    name: String,
    chunk_size: usize,
    retry: RetryPolicy,
    skip: SkipPolicy,
    commit_policy: CommitPolicy,
    allow_start_if_complete: bool,
}

/// Estado inicial: nombre y políticas.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    settings: StepSettings,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { settings: StepSettings { name: name.into(),
                                        chunk_size: DEFAULT_CHUNK_SIZE,
                                        retry: RetryPolicy::default(),
                                        skip: SkipPolicy::default(),
                                        commit_policy: CommitPolicy::default(),
                                        allow_start_if_complete: false } }
    }

    /// Toma intervalo de commit y políticas de la configuración del proceso.
    pub fn from_config(name: impl Into<String>, config: &BatchConfig) -> Self {
        Self::new(name).chunk_size(config.chunk_size)
                       .retry(config.retry_policy())
                       .skip(config.skip_policy())
                       .commit_policy(config.commit_policy)
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.settings.chunk_size = chunk_size;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn skip(mut self, skip: SkipPolicy) -> Self {
        self.settings.skip = skip;
        self
    }

    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.settings.commit_policy = policy;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.settings.allow_start_if_complete = allow;
        self
    }

    pub fn reader<I, S>(self, source: S) -> SourceStepBuilder<I>
        where S: ItemSource<I> + 'static
    {
        SourceStepBuilder { settings: self.settings,
                            source: Box::new(source) }
    }
}

pub struct SourceStepBuilder<I> {
    settings: StepSettings,
    source: Box<dyn ItemSource<I>>,
}

impl<I: 'static> SourceStepBuilder<I> {
    pub fn processor<O, P>(self, processor: P) -> ProcessedStepBuilder<I, O>
        where P: ItemProcessor<I, O> + 'static
    {
        ProcessedStepBuilder { settings: self.settings,
                               source: self.source,
                               processor: Box::new(processor) }
    }

    /// Sin procesador: los items pasan tal cual al sumidero.
    pub fn writer<W>(self, sink: W) -> ChunkStepBuilder<I, I>
        where W: ItemSink<I> + 'static
    {
        ChunkStepBuilder { settings: self.settings,
                           source: self.source,
                           processor: Box::new(PassThrough::<I>::new()),
                           sink: Box::new(sink) }
    }
}

pub struct ProcessedStepBuilder<I, O> {
    settings: StepSettings,
    source: Box<dyn ItemSource<I>>,
    processor: Box<dyn ItemProcessor<I, O>>,
}

impl<I, O> ProcessedStepBuilder<I, O> {
    pub fn writer<W>(self, sink: W) -> ChunkStepBuilder<I, O>
        where W: ItemSink<O> + 'static
    {
        ChunkStepBuilder { settings: self.settings,
                           source: self.source,
                           processor: self.processor,
                           sink: Box::new(sink) }
    }
}

pub struct ChunkStepBuilder<I, O> {
    settings: StepSettings,
    source: Box<dyn ItemSource<I>>,
    processor: Box<dyn ItemProcessor<I, O>>,
    sink: Box<dyn ItemSink<O>>,
}

impl<I, O> ChunkStepBuilder<I, O> {
    pub fn build(self) -> Result<ChunkStep<I, O>, BatchError> {
        let s = self.settings;
        if s.name.trim().is_empty() {
            return Err(BatchError::InvalidConfiguration("step name is empty".into()));
        }
        if s.chunk_size == 0 {
            return Err(BatchError::InvalidConfiguration(format!("step '{}': chunk_size must be >= 1", s.name)));
        }
        Ok(ChunkStep::new(s.name,
                          self.source,
                          self.processor,
                          self.sink,
                          s.chunk_size,
                          s.retry,
                          s.skip,
                          s.commit_policy,
                          s.allow_start_if_complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{FnProcessor, VecSink, VecSource};
    use crate::step::Step;

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = StepBuilder::new("step").chunk_size(0)
                                          .reader(VecSource::new(vec![1]))
                                          .writer(VecSink::<i32>::new())
                                          .build()
                                          .err()
                                          .unwrap();
        assert!(matches!(err, BatchError::InvalidConfiguration(_)));
    }

    #[test]
    fn from_config_copies_policies() {
        let cfg = BatchConfig { chunk_size: 7,
                                retry_limit: 2,
                                skip_limit: 3,
                                commit_policy: CommitPolicy::BestEffortAtomic,
                                ..BatchConfig::default() };
        let step = StepBuilder::from_config("step", &cfg).reader(VecSource::new(vec![1, 2]))
                                                         .processor(FnProcessor::new(|n: i32| -> Result<Option<String>, crate::errors::ItemError> {
                                                             Ok(Some(n.to_string()))
                                                         }))
                                                         .writer(VecSink::<String>::new())
                                                         .build()
                                                         .unwrap();
        assert_eq!(step.chunk_size(), 7);
        assert_eq!(step.commit_policy(), CommitPolicy::BestEffortAtomic);
        assert_eq!(step.name(), "step");
        assert!(!step.allow_start_if_complete());
    }
}
