//! Motor de chunks.
//!
//! Ciclo por chunk: `Idle -> Reading -> Writing -> Committing -> Idle`.
//! Un fallo de escritura o de commit pasa a `Retrying` y reintenta el mismo
//! chunk en memoria (sus items ya salieron de la fuente); agotado el
//! presupuesto, el step termina `Failed` y las entregas pendientes se
//! devuelven a la fuente.
//!
//! Invariantes:
//! - el chunk N se confirma en el ledger antes de empezar a leer el N+1;
//! - `write_count` y `commit_count` sólo reflejan chunks confirmados;
//! - un stream agotado con el chunk vacío termina sin escritura vacía.

use log::{debug, error, info, warn};

use super::definition::Step;
use super::policy::{CommitPolicy, RetryPolicy, SkipPolicy};
use super::StopSignal;
use crate::errors::{BatchError, ItemError};
use crate::item::{Chunk, DeliveryTag, ItemProcessor, ItemSink, ItemSource, Read};
use crate::model::{BatchStatus, ExecutionContext, StepExecution};
use crate::repo::JobRepository;

/// Estado del motor de chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Idle,
    Reading,
    Writing,
    Committing,
    Retrying,
    Failed,
    Completed,
    Stopped,
}

impl ChunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkState::Failed | ChunkState::Completed | ChunkState::Stopped)
    }

    /// Tabla de transiciones válidas.
    pub fn can_transition_to(self, next: ChunkState) -> bool {
        use ChunkState::*;
        matches!((self, next),
                 (Idle, Reading)
                 | (Idle, Completed)
                 | (Idle, Stopped)
                 | (Reading, Idle)
                 | (Reading, Writing)
                 | (Reading, Failed)
                 | (Writing, Committing)
                 | (Writing, Retrying)
                 | (Committing, Idle)
                 | (Committing, Retrying)
                 | (Retrying, Writing)
                 | (Retrying, Failed))
    }
}

/// Cómo terminó la fase de lectura de un chunk.
#[derive(Debug)]
enum ReadEnd {
    /// Se alcanzó el intervalo de commit.
    Full,
    /// La fuente no tiene trabajo por ahora.
    Drained,
    EndOfStream,
    Failed(ItemError),
}

/// Chunk en construcción: salidas para el sumidero y entregas a confirmar.
struct PendingChunk<O> {
    outputs: Chunk<O>,
    tags: Vec<DeliveryTag>,
    deliveries: usize,
}

impl<O> PendingChunk<O> {
    fn with_capacity(capacity: usize) -> Self {
        Self { outputs: Chunk::with_capacity(capacity),
               tags: Vec::with_capacity(capacity),
               deliveries: 0 }
    }

    fn accept(&mut self, tag: Option<DeliveryTag>) {
        if let Some(tag) = tag {
            self.tags.push(tag);
        }
        self.deliveries += 1;
    }

    fn is_empty(&self) -> bool {
        self.deliveries == 0
    }
}

/// Step orientado a chunks: lee `I`, procesa a `O`, escribe chunks de `O`.
pub struct ChunkStep<I, O> {
    name: String,
    source: Box<dyn ItemSource<I>>,
    processor: Box<dyn ItemProcessor<I, O>>,
    sink: Box<dyn ItemSink<O>>,
    chunk_size: usize,
    retry: RetryPolicy,
    skip: SkipPolicy,
    commit_policy: CommitPolicy,
    allow_start_if_complete: bool,
    state: ChunkState,
}

impl<I, O> ChunkStep<I, O> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(name: String,
                      source: Box<dyn ItemSource<I>>,
                      processor: Box<dyn ItemProcessor<I, O>>,
                      sink: Box<dyn ItemSink<O>>,
                      chunk_size: usize,
                      retry: RetryPolicy,
                      skip: SkipPolicy,
                      commit_policy: CommitPolicy,
                      allow_start_if_complete: bool)
                      -> Self {
        Self { name,
               source,
               processor,
               sink,
               chunk_size,
               retry,
               skip,
               commit_policy,
               allow_start_if_complete,
               state: ChunkState::Idle }
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        self.commit_policy
    }

    fn enter(&mut self, next: ChunkState) {
        debug_assert!(self.state.can_transition_to(next),
                      "invalid chunk transition {:?} -> {:?}",
                      self.state,
                      next);
        debug!("step '{}': {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }

    /// Lee hasta completar el intervalo de commit o hasta que la fuente se
    /// agote. Los contadores de lectura, filtrado y skip se actualizan en
    /// `execution` a medida que avanzan.
    fn read_chunk(&mut self, execution: &mut StepExecution) -> (PendingChunk<O>, ReadEnd) {
        let mut pending = PendingChunk::with_capacity(self.chunk_size);
        let mut transport_failures: u32 = 0;
        while pending.deliveries < self.chunk_size {
            match self.source.next() {
                Ok(Read::Item(delivery)) => {
                    transport_failures = 0;
                    execution.read_count += 1;
                    pending.accept(Some(delivery.tag));
                    if delivery.redelivered {
                        debug!("step '{}': redelivered item {:?}", self.name, delivery.tag);
                    }
                    match self.processor.process(delivery.item) {
                        Ok(Some(out)) => pending.outputs.push(out),
                        Ok(None) => execution.filter_count += 1,
                        Err(err) => {
                            if !self.skip.should_skip(&err, execution.skip_count() + 1) {
                                return (pending, ReadEnd::Failed(err));
                            }
                            execution.process_skip_count += 1;
                            warn!("step '{}': skipping item {:?} ({err})", self.name, delivery.tag);
                        }
                    }
                }
                Ok(Read::Unreadable { tag, error }) => {
                    pending.accept(tag);
                    if !self.skip.should_skip(&error, execution.skip_count() + 1) {
                        return (pending, ReadEnd::Failed(error));
                    }
                    execution.read_skip_count += 1;
                    warn!("step '{}': skipping unreadable delivery {:?} ({error})", self.name, tag);
                }
                Ok(Read::Empty) => return (pending, ReadEnd::Drained),
                Ok(Read::EndOfStream) => return (pending, ReadEnd::EndOfStream),
                Err(err) if err.is_fatal() => return (pending, ReadEnd::Failed(err)),
                Err(err) => {
                    if !self.retry.can_retry(transport_failures) {
                        return (pending, ReadEnd::Failed(err));
                    }
                    transport_failures += 1;
                    warn!("step '{}': read failed, retry {transport_failures}/{} ({err})",
                          self.name,
                          self.retry.limit);
                    let delay = self.retry.delay_for(transport_failures);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        (pending, ReadEnd::Full)
    }

    /// Un intento de escritura + commit sobre una copia de la ejecución; sólo
    /// si el ledger confirma se adopta la copia.
    fn attempt_commit(&mut self,
                      execution: &mut StepExecution,
                      repository: &dyn JobRepository,
                      pending: &PendingChunk<O>)
                      -> Result<(), BatchError> {
        let mut candidate = execution.clone();
        candidate.write_count += pending.outputs.len() as u64;
        candidate.commit_count += 1;
        self.source.update(&mut candidate.context);

        self.enter(ChunkState::Writing);
        match self.commit_policy {
            CommitPolicy::Sequenced => {
                if !pending.outputs.is_empty() {
                    self.sink.write(&pending.outputs)?;
                }
                self.enter(ChunkState::Committing);
                repository.update_step_execution(&mut candidate)?;
            }
            CommitPolicy::BestEffortAtomic => {
                self.enter(ChunkState::Committing);
                let sink = &mut self.sink;
                let outputs = &pending.outputs;
                repository.update_step_execution_within(&mut candidate, &mut || {
                              if outputs.is_empty() {
                                  Ok(())
                              } else {
                                  sink.write(outputs)
                              }
                          })?;
            }
        }
        *execution = candidate;
        Ok(())
    }

    /// Escribe y confirma el chunk, reintentando el mismo chunk según la
    /// política. Cada intento fallido cuenta como rollback.
    fn write_and_commit(&mut self,
                        execution: &mut StepExecution,
                        repository: &dyn JobRepository,
                        pending: &PendingChunk<O>)
                        -> Result<(), BatchError> {
        let mut retries: u32 = 0;
        loop {
            match self.attempt_commit(execution, repository, pending) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    execution.rollback_count += 1;
                    self.enter(ChunkState::Retrying);
                    if !self.retry.can_retry(retries) {
                        return Err(err);
                    }
                    retries += 1;
                    warn!("step '{}': chunk of {} items rolled back, retry {retries}/{} ({err})",
                          self.name,
                          pending.outputs.len(),
                          self.retry.limit);
                    let delay = self.retry.delay_for(retries);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }

    fn finish(&mut self,
              execution: &mut StepExecution,
              repository: &dyn JobRepository,
              status: BatchStatus,
              description: Option<String>)
              -> Result<(), BatchError> {
        execution.finish(status, description);
        repository.update_step_execution(execution)?;
        info!("step '{}' finished {} (read={} write={} commit={} rollback={} skip={} filter={})",
              self.name,
              status,
              execution.read_count,
              execution.write_count,
              execution.commit_count,
              execution.rollback_count,
              execution.skip_count(),
              execution.filter_count);
        Ok(())
    }

    fn fail(&mut self,
            execution: &mut StepExecution,
            repository: &dyn JobRepository,
            uncommitted: &[DeliveryTag],
            cause: BatchError)
            -> Result<(), BatchError> {
        self.enter(ChunkState::Failed);
        error!("step '{}' failed: {cause}", self.name);
        if !uncommitted.is_empty() {
            if let Err(e) = self.source.requeue(uncommitted) {
                warn!("step '{}': could not requeue {} deliveries ({e})", self.name, uncommitted.len());
            }
        }
        self.finish(execution, repository, BatchStatus::Failed, Some(cause.to_string()))
    }
}

impl<I, O> Step for ChunkStep<I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.source.open(context)?;
        if let Err(e) = self.sink.open() {
            let _ = self.source.close();
            return Err(e);
        }
        Ok(())
    }

    fn execute(&mut self,
               execution: &mut StepExecution,
               repository: &dyn JobRepository,
               stop: &StopSignal)
               -> Result<(), BatchError> {
        self.state = ChunkState::Idle;
        info!("step '{}' started (execution {}, chunk_size={}, policy={})",
              self.name,
              execution.id,
              self.chunk_size,
              self.commit_policy.as_str());
        loop {
            if stop.is_requested() {
                self.enter(ChunkState::Stopped);
                return self.finish(execution, repository, BatchStatus::Stopped, Some("stop requested".into()));
            }

            self.enter(ChunkState::Reading);
            let (pending, end) = self.read_chunk(execution);

            if let ReadEnd::Failed(err) = end {
                return self.fail(execution, repository, &pending.tags, err.into());
            }
            if pending.is_empty() {
                match end {
                    ReadEnd::EndOfStream => {
                        self.enter(ChunkState::Idle);
                        self.enter(ChunkState::Completed);
                        return self.finish(execution, repository, BatchStatus::Completed, None);
                    }
                    _ => {
                        self.enter(ChunkState::Idle);
                        continue;
                    }
                }
            }

            if let Err(err) = self.write_and_commit(execution, repository, &pending) {
                return self.fail(execution, repository, &pending.tags, err);
            }
            if let Err(e) = self.source.acknowledge(&pending.tags) {
                // El ledger ya avanzó: el transporte volverá a entregar estos items.
                warn!("step '{}': acknowledge failed after commit ({e})", self.name);
            }
            self.enter(ChunkState::Idle);
            debug!("step '{}': committed chunk {} ({} items)",
                   self.name,
                   execution.commit_count,
                   pending.outputs.len());

            if matches!(end, ReadEnd::EndOfStream) {
                self.enter(ChunkState::Completed);
                return self.finish(execution, repository, BatchStatus::Completed, None);
            }
        }
    }

    fn close(&mut self) -> Result<(), ItemError> {
        let source = self.source.close();
        let sink = self.sink.close();
        source.and(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkState::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        let path = [Idle, Reading, Writing, Committing, Idle, Reading, Idle, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn retry_path_transitions_are_valid() {
        let path = [Reading, Writing, Retrying, Writing, Committing, Retrying, Failed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for terminal in [Failed, Completed, Stopped] {
            assert!(terminal.is_terminal());
            for next in [Idle, Reading, Writing, Committing, Retrying, Failed, Completed, Stopped] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Reading.can_transition_to(Stopped));
        assert!(!Writing.can_transition_to(Idle));
    }
}
