//! Orquestador: crea ejecuciones en el ledger y recorre los steps del job.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use rayon::prelude::*;

use super::job::Job;
use crate::errors::{BatchError, RepositoryError};
use crate::model::{BatchStatus, ExecutionContext, JobExecution, JobParameters};
use crate::repo::JobRepository;

const STOPPED_DESCRIPTION: &str = "stop requested";
const ABANDONED_DESCRIPTION: &str = "abandoned";

/// Lanza jobs contra un `JobRepository` compartido.
#[derive(Clone)]
pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
}

impl JobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Ejecuta `job` como instancia `(job.name, params)`.
    ///
    /// Devuelve la ejecución en su estado terminal (`Completed`, `Failed` o
    /// `Stopped`). `Err` indica que no se pudo lanzar (instancia en curso,
    /// ya completada, no reiniciable), un step con configuración inválida o
    /// un ledger inaccesible.
    pub fn run(&self, job: &mut Job, params: &JobParameters) -> Result<JobExecution, BatchError> {
        if !job.is_restartable() {
            if let Some(last) = self.repository.find_last_job_execution(job.name(), params)? {
                if last.status.is_restartable() {
                    return Err(BatchError::NotRestartable(last.id));
                }
            }
        }
        let execution = self.repository.create_job_execution(job.name(), params)?;
        self.execute(job, execution)
    }

    /// Nueva ejecución de la misma instancia que `execution_id`. Los steps
    /// `Completed` se saltan y el step interrumpido reabre su fuente con el
    /// contexto de su último commit.
    pub fn restart(&self, job: &mut Job, execution_id: i64) -> Result<JobExecution, BatchError> {
        let previous = self.repository
                           .get_job_execution(execution_id)?
                           .ok_or_else(|| RepositoryError::NotFound(format!("job execution {execution_id}")))?;
        if previous.job_name() != job.name() {
            return Err(BatchError::InvalidConfiguration(format!("execution {execution_id} belongs to job '{}', not '{}'",
                                                                previous.job_name(),
                                                                job.name())));
        }
        if !job.is_restartable() || !previous.status.is_restartable() {
            return Err(BatchError::NotRestartable(execution_id));
        }
        info!("restarting job '{}' from execution {execution_id} ({})",
              job.name(),
              previous.status);
        let execution = self.repository.create_job_execution(job.name(), &previous.parameters)?;
        self.execute(job, execution)
    }

    /// Marca como `Failed` una ejecución que quedó en curso tras una caída
    /// del proceso, junto con sus steps en curso, para poder reiniciarla.
    /// Una ejecución ya terminada se devuelve sin cambios.
    pub fn abandon(&self, execution_id: i64) -> Result<JobExecution, BatchError> {
        let mut execution =
            self.repository
                .get_job_execution(execution_id)?
                .ok_or_else(|| RepositoryError::NotFound(format!("job execution {execution_id}")))?;
        if execution.status.is_terminal() {
            warn!("job execution {execution_id} is already {}; nothing to abandon", execution.status);
            return Ok(execution);
        }
        for step in execution.step_executions.iter_mut().filter(|s| s.status.is_running()) {
            step.finish(BatchStatus::Failed, Some(ABANDONED_DESCRIPTION.into()));
            self.repository.update_step_execution(step)?;
            if execution.failed_step.is_none() {
                execution.failed_step = Some(step.step_name.clone());
            }
        }
        execution.finish(BatchStatus::Failed, Some(ABANDONED_DESCRIPTION.into()));
        self.repository.update_job_execution(&mut execution)?;
        warn!("job execution {execution_id} of '{}' abandoned", execution.job_name());
        Ok(execution)
    }

    /// Ejecuta jobs independientes en paralelo, uno por hilo del pool de
    /// rayon. Los resultados conservan el orden de entrada.
    pub fn run_all(&self, jobs: &mut [(Job, JobParameters)]) -> Vec<Result<JobExecution, BatchError>> {
        jobs.par_iter_mut().map(|(job, params)| self.run(job, params)).collect()
    }

    fn execute(&self, job: &mut Job, mut execution: JobExecution) -> Result<JobExecution, BatchError> {
        let repository: &dyn JobRepository = &*self.repository;
        let job_name = job.name().to_string();
        let (steps, stop) = job.parts_mut();
        stop.reset();

        execution.status = BatchStatus::Started;
        execution.started_at = Some(Utc::now());
        repository.update_job_execution(&mut execution)?;
        info!("job '{job_name}' started (execution {}, instance {})",
              execution.id,
              execution.instance.id);

        for step in steps.iter_mut() {
            if stop.is_requested() {
                execution.finish(BatchStatus::Stopped, Some(STOPPED_DESCRIPTION.into()));
                break;
            }
            let step_name = step.name().to_string();
            let previous = repository.find_last_step_execution(execution.instance.id, &step_name)?;
            if let Some(prev) = &previous {
                if prev.status == BatchStatus::Completed && !step.allow_start_if_complete() {
                    info!("job '{job_name}': step '{step_name}' already completed, skipping");
                    continue;
                }
            }
            let restart_context = previous.filter(|p| p.status != BatchStatus::Completed)
                                          .map(|p| p.context)
                                          .unwrap_or_else(ExecutionContext::new);

            if let Err(source) = step.open(&restart_context) {
                error!("job '{job_name}': step '{step_name}' could not be opened: {source}");
                execution.failed_step = Some(step_name.clone());
                execution.finish(BatchStatus::Failed, Some(source.to_string()));
                repository.update_job_execution(&mut execution)?;
                return Err(BatchError::StepConfiguration { step: step_name,
                                                           source });
            }

            let mut step_execution = repository.create_step_execution(&execution, &step_name)?;
            step_execution.context = restart_context;
            step_execution.status = BatchStatus::Started;
            step_execution.started_at = Some(Utc::now());
            let outcome = repository.update_step_execution(&mut step_execution)
                                    .map_err(BatchError::from)
                                    .and_then(|_| step.execute(&mut step_execution, repository, stop));
            if let Err(e) = step.close() {
                warn!("job '{job_name}': closing step '{step_name}' failed: {e}");
            }
            execution.step_executions.push(step_execution.clone());

            if let Err(e) = outcome {
                error!("job '{job_name}': step '{step_name}' aborted: {e}");
                execution.failed_step = Some(step_name);
                execution.finish(BatchStatus::Failed, Some(e.to_string()));
                if let Err(persist) = repository.update_job_execution(&mut execution) {
                    error!("job '{job_name}': could not record failure: {persist}");
                }
                return Err(e);
            }

            match step_execution.status {
                BatchStatus::Completed => {}
                BatchStatus::Stopped => {
                    execution.finish(BatchStatus::Stopped, step_execution.exit_description.clone());
                    break;
                }
                BatchStatus::Failed => {
                    execution.failed_step = Some(step_name);
                    execution.finish(BatchStatus::Failed, step_execution.exit_description.clone());
                    break;
                }
                other => {
                    let message = format!("step '{step_name}' returned in non-terminal status {other}");
                    execution.failed_step = Some(step_name);
                    execution.finish(BatchStatus::Failed, Some(message));
                    break;
                }
            }
        }

        if execution.status == BatchStatus::Started {
            execution.finish(BatchStatus::Completed, None);
        }
        repository.update_job_execution(&mut execution)?;
        match execution.status {
            BatchStatus::Failed => error!("job '{job_name}' finished FAILED at step {:?}: {}",
                                          execution.failed_step,
                                          execution.exit_description.as_deref().unwrap_or("")),
            status => info!("job '{job_name}' finished {status} (execution {})", execution.id),
        }
        Ok(execution)
    }
}

impl std::fmt::Debug for JobLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLauncher").finish_non_exhaustive()
    }
}
