//! Dobles de prueba compartidos por los tests de integración de chunk-core.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chunk_core::repo::CommitHook;
use chunk_core::{BatchStatus, Chunk, DeliveryTag, ExecutionContext, InMemoryJobRepository, ItemError, ItemSink,
                 ItemSource, JobExecution, JobParameters, JobRepository, Read, RepositoryError, SinkHandle,
                 StepExecution, VecSink, VecSource};

/// Sumidero que rechaza `failures` veces cualquier chunk que contenga `poison`.
pub struct FlakySink<T> {
    inner: VecSink<T>,
    poison: T,
    failures: u32,
}

impl<T: Clone + Send> FlakySink<T> {
    pub fn new(poison: T, failures: u32) -> Self {
        Self { inner: VecSink::new(),
               poison,
               failures }
    }

    pub fn handle(&self) -> SinkHandle<T> {
        self.inner.handle()
    }
}

impl<T: Clone + Send + PartialEq> ItemSink<T> for FlakySink<T> {
    fn write(&mut self, chunk: &Chunk<T>) -> Result<(), ItemError> {
        if self.failures > 0 && chunk.iter().any(|i| *i == self.poison) {
            self.failures -= 1;
            return Err(ItemError::Transport("sink rejected chunk".into()));
        }
        self.inner.write(chunk)
    }
}

/// Registro de confirmaciones y devoluciones de una `TrackingSource`.
#[derive(Debug, Default, Clone)]
pub struct DeliveryLog {
    pub acked: Arc<Mutex<Vec<DeliveryTag>>>,
    pub requeued: Arc<Mutex<Vec<DeliveryTag>>>,
}

impl DeliveryLog {
    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().iter().map(|t| t.0).collect()
    }

    pub fn requeued(&self) -> Vec<u64> {
        self.requeued.lock().unwrap().iter().map(|t| t.0).collect()
    }
}

/// `VecSource` que anota cada acknowledge/requeue.
pub struct TrackingSource<T> {
    inner: VecSource<T>,
    log: DeliveryLog,
}

impl<T: Clone> TrackingSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { inner: VecSource::new(items),
               log: DeliveryLog::default() }
    }

    pub fn log(&self) -> DeliveryLog {
        self.log.clone()
    }
}

impl<T: Clone + Send> ItemSource<T> for TrackingSource<T> {
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.inner.open(context)
    }

    fn next(&mut self) -> Result<Read<T>, ItemError> {
        self.inner.next()
    }

    fn update(&mut self, context: &mut ExecutionContext) {
        self.inner.update(context)
    }

    fn acknowledge(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        self.log.acked.lock().unwrap().extend_from_slice(tags);
        Ok(())
    }

    fn requeue(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        self.log.requeued.lock().unwrap().extend_from_slice(tags);
        Ok(())
    }
}

/// Ledger en memoria que rechaza los próximos `failures` commits de chunk
/// antes de ejecutar el hook.
pub struct FlakyRepository {
    inner: InMemoryJobRepository,
    failures: AtomicU32,
}

impl FlakyRepository {
    pub fn new(failures: u32) -> Self {
        Self { inner: InMemoryJobRepository::new(),
               failures: AtomicU32::new(failures) }
    }

    fn is_chunk_commit(step: &StepExecution) -> bool {
        step.status == BatchStatus::Started && step.commit_count > 0
    }
}

impl JobRepository for FlakyRepository {
    fn create_job_execution(&self, job_name: &str, params: &JobParameters) -> Result<JobExecution, RepositoryError> {
        self.inner.create_job_execution(job_name, params)
    }

    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        self.inner.update_job_execution(execution)
    }

    fn create_step_execution(&self,
                             job_execution: &JobExecution,
                             step_name: &str)
                             -> Result<StepExecution, RepositoryError> {
        self.inner.create_step_execution(job_execution, step_name)
    }

    fn update_step_execution_within(&self,
                                    step: &mut StepExecution,
                                    hook: CommitHook<'_>)
                                    -> Result<(), RepositoryError> {
        if Self::is_chunk_commit(step) {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Storage("connection reset".into()));
            }
        }
        self.inner.update_step_execution_within(step, hook)
    }

    fn find_last_job_execution(&self,
                               job_name: &str,
                               params: &JobParameters)
                               -> Result<Option<JobExecution>, RepositoryError> {
        self.inner.find_last_job_execution(job_name, params)
    }

    fn find_last_step_execution(&self,
                                job_instance_id: i64,
                                step_name: &str)
                                -> Result<Option<StepExecution>, RepositoryError> {
        self.inner.find_last_step_execution(job_instance_id, step_name)
    }

    fn find_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, RepositoryError> {
        self.inner.find_step_executions(job_execution_id)
    }

    fn get_job_execution(&self, id: i64) -> Result<Option<JobExecution>, RepositoryError> {
        self.inner.get_job_execution(id)
    }
}
