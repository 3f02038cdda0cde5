use crate::errors::{ItemError, RepositoryError};
use crate::model::{JobExecution, JobParameters, StepExecution};

/// Acción que se ejecuta dentro de la transacción de commit de un chunk,
/// después de preparar la actualización y antes de confirmarla. Si falla, la
/// transacción se revierte.
pub type CommitHook<'a> = &'a mut dyn FnMut() -> Result<(), ItemError>;

/// Persistencia del progreso de jobs y steps.
///
/// Garantías exigidas a las implementaciones:
/// - identificadores monotónicamente crecientes;
/// - `update_step_execution*` verifica `version` y la incrementa, de modo que
///   las actualizaciones de una StepExecution quedan totalmente ordenadas y
///   una escritura con versión obsoleta se rechaza con `VersionConflict`;
/// - una misma `JobInstance` nunca tiene dos ejecuciones en curso.
///
/// Debe ser `Send + Sync` para compartirse como `Arc<dyn JobRepository>`
/// entre jobs que corren en paralelo.
pub trait JobRepository: Send + Sync {
    /// Crea (o reutiliza) la instancia `(job_name, params)` y una nueva
    /// ejecución en estado `Starting`.
    ///
    /// Falla con `AlreadyRunning` si la última ejecución sigue en curso y con
    /// `AlreadyComplete` si terminó `Completed`.
    fn create_job_execution(&self, job_name: &str, params: &JobParameters) -> Result<JobExecution, RepositoryError>;

    /// Persiste estado, fechas, descripción y contexto de la ejecución.
    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), RepositoryError>;

    fn create_step_execution(&self,
                             job_execution: &JobExecution,
                             step_name: &str)
                             -> Result<StepExecution, RepositoryError>;

    /// Persiste la StepExecution (contadores, estado y contexto) en su propia
    /// transacción.
    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError> {
        self.update_step_execution_within(step, &mut || Ok(()))
    }

    /// Variante usada en el commit de un chunk: `hook` corre dentro de la
    /// misma transacción. Si `hook` falla devuelve `RepositoryError::Hook` y
    /// nada queda persistido; `step.version` sólo avanza si hubo commit.
    fn update_step_execution_within(&self,
                                    step: &mut StepExecution,
                                    hook: CommitHook<'_>)
                                    -> Result<(), RepositoryError>;

    /// Última ejecución de la instancia `(job_name, params)`, si existe.
    fn find_last_job_execution(&self,
                               job_name: &str,
                               params: &JobParameters)
                               -> Result<Option<JobExecution>, RepositoryError>;

    /// Última StepExecution con ese nombre en cualquier ejecución de la
    /// instancia.
    fn find_last_step_execution(&self,
                                job_instance_id: i64,
                                step_name: &str)
                                -> Result<Option<StepExecution>, RepositoryError>;

    fn find_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, RepositoryError>;

    /// Ejecución con sus StepExecutions cargadas.
    fn get_job_execution(&self, id: i64) -> Result<Option<JobExecution>, RepositoryError>;
}

impl<R: JobRepository + ?Sized> JobRepository for std::sync::Arc<R> {
    fn create_job_execution(&self, job_name: &str, params: &JobParameters) -> Result<JobExecution, RepositoryError> {
        (**self).create_job_execution(job_name, params)
    }
    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        (**self).update_job_execution(execution)
    }
    fn create_step_execution(&self,
                             job_execution: &JobExecution,
                             step_name: &str)
                             -> Result<StepExecution, RepositoryError> {
        (**self).create_step_execution(job_execution, step_name)
    }
    fn update_step_execution_within(&self,
                                    step: &mut StepExecution,
                                    hook: CommitHook<'_>)
                                    -> Result<(), RepositoryError> {
        (**self).update_step_execution_within(step, hook)
    }
    fn find_last_job_execution(&self,
                               job_name: &str,
                               params: &JobParameters)
                               -> Result<Option<JobExecution>, RepositoryError> {
        (**self).find_last_job_execution(job_name, params)
    }
    fn find_last_step_execution(&self,
                                job_instance_id: i64,
                                step_name: &str)
                                -> Result<Option<StepExecution>, RepositoryError> {
        (**self).find_last_step_execution(job_instance_id, step_name)
    }
    fn find_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, RepositoryError> {
        (**self).find_step_executions(job_execution_id)
    }
    fn get_job_execution(&self, id: i64) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).get_job_execution(id)
    }
}
