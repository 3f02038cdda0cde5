//! Instancias y ejecuciones de jobs y steps, tal como las registra el ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchStatus, ExecutionContext, JobParameters};

/// Identidad lógica de un job: (nombre, job_key de sus parámetros).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    pub job_key: String,
}

/// Un intento de ejecución de una `JobInstance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_description: Option<String>,
    /// Nombre del step que provocó el fallo, si lo hubo.
    pub failed_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: ExecutionContext,
    pub version: u32,
    /// StepExecutions de este intento, en orden de ejecución.
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(id: i64, instance: JobInstance, parameters: JobParameters) -> Self {
        Self { id,
               instance,
               parameters,
               status: BatchStatus::Starting,
               exit_description: None,
               failed_step: None,
               created_at: Utc::now(),
               started_at: None,
               ended_at: None,
               context: ExecutionContext::new(),
               version: 0,
               step_executions: Vec::new() }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().rev().find(|s| s.step_name == step_name)
    }

    /// Marca la ejecución como terminada con el estado dado.
    pub fn finish(&mut self, status: BatchStatus, description: Option<String>) {
        self.status = status;
        if description.is_some() {
            self.exit_description = description;
        }
        self.ended_at = Some(Utc::now());
    }
}

/// Un intento de ejecución de un step dentro de una `JobExecution`.
///
/// Sólo el motor de chunks que ejecuta el step la modifica. Cada actualización
/// persistida incrementa `version`; el ledger rechaza escrituras con una
/// versión obsoleta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub filter_count: u64,
    pub exit_description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: ExecutionContext,
    pub version: u32,
}

impl StepExecution {
    pub fn new(id: i64, job_execution_id: i64, step_name: impl Into<String>) -> Self {
        Self { id,
               job_execution_id,
               step_name: step_name.into(),
               status: BatchStatus::Starting,
               read_count: 0,
               write_count: 0,
               commit_count: 0,
               rollback_count: 0,
               read_skip_count: 0,
               process_skip_count: 0,
               filter_count: 0,
               exit_description: None,
               started_at: None,
               ended_at: None,
               context: ExecutionContext::new(),
               version: 0 }
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count
    }

    pub fn finish(&mut self, status: BatchStatus, description: Option<String>) {
        self.status = status;
        if description.is_some() {
            self.exit_description = description;
        }
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_executions_start_in_starting() {
        let inst = JobInstance { id: 1,
                                 job_name: "job".into(),
                                 job_key: "k".into() };
        let job = JobExecution::new(1, inst, JobParameters::new());
        assert_eq!(job.status, BatchStatus::Starting);
        let step = StepExecution::new(1, job.id, "step");
        assert_eq!(step.status, BatchStatus::Starting);
        assert_eq!(step.version, 0);
    }

    #[test]
    fn finish_keeps_previous_description_when_none() {
        let mut step = StepExecution::new(1, 1, "step");
        step.finish(BatchStatus::Failed, Some("boom".into()));
        step.finish(BatchStatus::Failed, None);
        assert_eq!(step.exit_description.as_deref(), Some("boom"));
        assert!(step.ended_at.is_some());
    }
}
