use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::types::{CommitHook, JobRepository};
use crate::errors::RepositoryError;
use crate::model::{JobExecution, JobInstance, JobParameters, StepExecution};

#[derive(Default)]
struct MemoryState {
    instances: Vec<JobInstance>,
    job_executions: BTreeMap<i64, JobExecution>,
    step_executions: BTreeMap<i64, StepExecution>,
    next_instance_id: i64,
    next_job_execution_id: i64,
    next_step_execution_id: i64,
}

impl MemoryState {
    fn find_instance(&self, job_name: &str, job_key: &str) -> Option<&JobInstance> {
        self.instances.iter().find(|i| i.job_name == job_name && i.job_key == job_key)
    }

    fn last_execution_of(&self, instance_id: i64) -> Option<&JobExecution> {
        self.job_executions.values().rev().find(|e| e.instance.id == instance_id)
    }

    fn steps_of(&self, job_execution_id: i64) -> Vec<StepExecution> {
        self.step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect()
    }

    fn hydrate(&self, execution: &JobExecution) -> JobExecution {
        let mut execution = execution.clone();
        execution.step_executions = self.steps_of(execution.id);
        execution
    }
}

/// Ledger en memoria, protegido por un único mutex.
///
/// Los ids empiezan en 1 y crecen de forma independiente por tabla. El hook
/// de commit se ejecuta sin retener el lock: primero se valida la versión,
/// luego corre el hook y por último se aplica la actualización verificando
/// otra vez la versión.
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state.lock().map_err(|_| RepositoryError::LockPoisoned)
    }

    fn check_version(state: &MemoryState, step: &StepExecution) -> Result<(), RepositoryError> {
        let stored = state.step_executions
                          .get(&step.id)
                          .ok_or_else(|| RepositoryError::NotFound(format!("step execution {}", step.id)))?;
        if stored.version != step.version {
            return Err(RepositoryError::VersionConflict { id: step.id,
                                                          expected: step.version });
        }
        Ok(())
    }

    /// Número de ejecuciones registradas (diagnóstico/tests).
    pub fn job_execution_count(&self) -> usize {
        self.state.lock().map(|s| s.job_executions.len()).unwrap_or(0)
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(&self, job_name: &str, params: &JobParameters) -> Result<JobExecution, RepositoryError> {
        let mut state = self.lock()?;
        let job_key = params.job_key();
        let instance = match state.find_instance(job_name, &job_key) {
            Some(existing) => existing.clone(),
            None => {
                state.next_instance_id += 1;
                let created = JobInstance { id: state.next_instance_id,
                                            job_name: job_name.to_string(),
                                            job_key };
                state.instances.push(created.clone());
                created
            }
        };
        if let Some(last) = state.last_execution_of(instance.id) {
            if last.status.is_running() {
                return Err(RepositoryError::AlreadyRunning { instance_id: instance.id });
            }
            if last.status == crate::model::BatchStatus::Completed {
                return Err(RepositoryError::AlreadyComplete { instance_id: instance.id });
            }
        }
        state.next_job_execution_id += 1;
        let execution = JobExecution::new(state.next_job_execution_id, instance, params.clone());
        state.job_executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state.job_executions
                          .get_mut(&execution.id)
                          .ok_or_else(|| RepositoryError::NotFound(format!("job execution {}", execution.id)))?;
        execution.version += 1;
        let mut copy = execution.clone();
        // Las StepExecutions viven en su propia tabla.
        copy.step_executions.clear();
        *stored = copy;
        Ok(())
    }

    fn create_step_execution(&self,
                             job_execution: &JobExecution,
                             step_name: &str)
                             -> Result<StepExecution, RepositoryError> {
        let mut state = self.lock()?;
        if !state.job_executions.contains_key(&job_execution.id) {
            return Err(RepositoryError::NotFound(format!("job execution {}", job_execution.id)));
        }
        state.next_step_execution_id += 1;
        let step = StepExecution::new(state.next_step_execution_id, job_execution.id, step_name);
        state.step_executions.insert(step.id, step.clone());
        Ok(step)
    }

    fn update_step_execution_within(&self,
                                    step: &mut StepExecution,
                                    hook: CommitHook<'_>)
                                    -> Result<(), RepositoryError> {
        {
            let state = self.lock()?;
            Self::check_version(&state, step)?;
        }
        hook().map_err(RepositoryError::Hook)?;
        let mut state = self.lock()?;
        Self::check_version(&state, step)?;
        let mut stored = step.clone();
        stored.version += 1;
        stored.context.clear_dirty();
        state.step_executions.insert(stored.id, stored);
        step.version += 1;
        step.context.clear_dirty();
        Ok(())
    }

    fn find_last_job_execution(&self,
                               job_name: &str,
                               params: &JobParameters)
                               -> Result<Option<JobExecution>, RepositoryError> {
        let state = self.lock()?;
        let Some(instance) = state.find_instance(job_name, &params.job_key()) else {
            return Ok(None);
        };
        Ok(state.last_execution_of(instance.id).map(|e| state.hydrate(e)))
    }

    fn find_last_step_execution(&self,
                                job_instance_id: i64,
                                step_name: &str)
                                -> Result<Option<StepExecution>, RepositoryError> {
        let state = self.lock()?;
        let found = state.step_executions
                         .values()
                         .rev()
                         .filter(|s| s.step_name == step_name)
                         .find(|s| {
                             state.job_executions
                                  .get(&s.job_execution_id)
                                  .is_some_and(|e| e.instance.id == job_instance_id)
                         })
                         .cloned();
        Ok(found)
    }

    fn find_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.steps_of(job_execution_id))
    }

    fn get_job_execution(&self, id: i64) -> Result<Option<JobExecution>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.job_executions.get(&id).map(|e| state.hydrate(e)))
    }
}

impl std::fmt::Debug for InMemoryJobRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobRepository")
         .field("job_executions", &self.job_execution_count())
         .finish()
    }
}
