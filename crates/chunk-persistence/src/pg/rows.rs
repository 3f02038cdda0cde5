//! Filas Diesel del ledger y su conversión desde/hacia el modelo del core.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use chunk_core::{BatchStatus, ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution};

use crate::error::PersistenceError;
use crate::schema::{batch_job_execution, batch_job_instance, batch_step_execution};

/// Fila de `batch_job_instance` (columnas en orden de tabla).
#[derive(Queryable, Debug, Clone)]
pub struct InstanceRow {
    pub id: i64,
    pub job_name: String,
    pub job_key: String,
}

impl From<InstanceRow> for JobInstance {
    fn from(row: InstanceRow) -> Self {
        JobInstance { id: row.id,
                      job_name: row.job_name,
                      job_key: row.job_key }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = batch_job_instance)]
pub struct NewInstanceRow<'a> {
    pub job_name: &'a str,
    pub job_key: &'a str,
}

/// Fila de `batch_job_execution`.
#[derive(Queryable, Debug)]
pub struct JobExecutionRow {
    pub id: i64,
    pub job_instance_id: i64,
    pub parameters: Value,
    pub status: String,
    pub exit_description: Option<String>,
    pub failed_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: Value,
    pub version: i32,
}

impl JobExecutionRow {
    /// Las StepExecutions se cargan aparte.
    pub fn into_model(self, instance: JobInstance) -> Result<JobExecution, PersistenceError> {
        Ok(JobExecution { id: self.id,
                          instance,
                          parameters: decode_parameters(&self.parameters)?,
                          status: decode_status(&self.status)?,
                          exit_description: self.exit_description,
                          failed_step: self.failed_step,
                          created_at: self.created_at,
                          started_at: self.started_at,
                          ended_at: self.ended_at,
                          context: ExecutionContext::from_json(&self.context),
                          version: self.version as u32,
                          step_executions: Vec::new() })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = batch_job_execution)]
pub struct NewJobExecutionRow<'a> {
    pub job_instance_id: i64,
    pub parameters: &'a Value,
    pub status: &'a str,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = batch_job_execution, treat_none_as_null = true)]
pub struct JobExecutionChanges<'a> {
    pub status: &'a str,
    pub exit_description: Option<&'a str>,
    pub failed_step: Option<&'a str>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: Value,
    pub version: i32,
}

impl<'a> JobExecutionChanges<'a> {
    pub fn next_version_of(execution: &'a JobExecution) -> Self {
        Self { status: execution.status.as_str(),
               exit_description: execution.exit_description.as_deref(),
               failed_step: execution.failed_step.as_deref(),
               started_at: execution.started_at,
               ended_at: execution.ended_at,
               context: execution.context.to_json(),
               version: execution.version as i32 + 1 }
    }
}

/// Fila de `batch_step_execution`.
#[derive(Queryable, Debug)]
pub struct StepExecutionRow {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: String,
    pub read_count: i64,
    pub write_count: i64,
    pub commit_count: i64,
    pub rollback_count: i64,
    pub read_skip_count: i64,
    pub process_skip_count: i64,
    pub filter_count: i64,
    pub exit_description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: Value,
    pub version: i32,
}

impl TryFrom<StepExecutionRow> for StepExecution {
    type Error = PersistenceError;

    fn try_from(row: StepExecutionRow) -> Result<Self, Self::Error> {
        Ok(StepExecution { id: row.id,
                           job_execution_id: row.job_execution_id,
                           status: decode_status(&row.status)?,
                           step_name: row.step_name,
                           read_count: row.read_count as u64,
                           write_count: row.write_count as u64,
                           commit_count: row.commit_count as u64,
                           rollback_count: row.rollback_count as u64,
                           read_skip_count: row.read_skip_count as u64,
                           process_skip_count: row.process_skip_count as u64,
                           filter_count: row.filter_count as u64,
                           exit_description: row.exit_description,
                           started_at: row.started_at,
                           ended_at: row.ended_at,
                           context: ExecutionContext::from_json(&row.context),
                           version: row.version as u32 })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = batch_step_execution)]
pub struct NewStepExecutionRow<'a> {
    pub job_execution_id: i64,
    pub step_name: &'a str,
    pub status: &'a str,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = batch_step_execution, treat_none_as_null = true)]
pub struct StepExecutionChanges<'a> {
    pub status: &'a str,
    pub read_count: i64,
    pub write_count: i64,
    pub commit_count: i64,
    pub rollback_count: i64,
    pub read_skip_count: i64,
    pub process_skip_count: i64,
    pub filter_count: i64,
    pub exit_description: Option<&'a str>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: Value,
    pub version: i32,
}

impl<'a> StepExecutionChanges<'a> {
    pub fn next_version_of(step: &'a StepExecution) -> Self {
        Self { status: step.status.as_str(),
               read_count: step.read_count as i64,
               write_count: step.write_count as i64,
               commit_count: step.commit_count as i64,
               rollback_count: step.rollback_count as i64,
               read_skip_count: step.read_skip_count as i64,
               process_skip_count: step.process_skip_count as i64,
               filter_count: step.filter_count as i64,
               exit_description: step.exit_description.as_deref(),
               started_at: step.started_at,
               ended_at: step.ended_at,
               context: step.context.to_json(),
               version: step.version as i32 + 1 }
    }
}

fn decode_status(raw: &str) -> Result<BatchStatus, PersistenceError> {
    BatchStatus::parse(raw).ok_or_else(|| PersistenceError::CorruptRow(format!("unknown status '{raw}'")))
}

/// Los parámetros se guardan como lista de pares `[clave, valor]` para
/// conservar el orden de inserción.
pub fn encode_parameters(params: &JobParameters) -> Value {
    Value::Array(params.iter()
                       .map(|(k, v)| Value::Array(vec![Value::from(k), Value::from(v)]))
                       .collect())
}

pub fn decode_parameters(value: &Value) -> Result<JobParameters, PersistenceError> {
    let pairs: Vec<(String, String)> = serde_json::from_value(value.clone())
        .map_err(|e| PersistenceError::CorruptRow(format!("job parameters: {e}")))?;
    Ok(pairs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameters_keep_their_order_in_the_stored_form() {
        let params = JobParameters::new().with("z", "1").with("a", "2");
        let stored = encode_parameters(&params);
        assert_eq!(stored, json!([["z", "1"], ["a", "2"]]));
        let restored = decode_parameters(&stored).unwrap();
        assert_eq!(restored, params);
        assert_eq!(restored.job_key(), params.job_key());
    }

    #[test]
    fn malformed_rows_are_reported_as_corrupt() {
        assert!(matches!(decode_parameters(&json!({"k": "v"})), Err(PersistenceError::CorruptRow(_))));
        let row = StepExecutionRow { id: 1,
                                     job_execution_id: 1,
                                     step_name: "step".into(),
                                     status: "PAUSED".into(),
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
                                     context: json!({}),
                                     version: 0 };
        assert!(matches!(StepExecution::try_from(row), Err(PersistenceError::CorruptRow(_))));
    }

    #[test]
    fn changesets_carry_the_next_version() {
        let mut step = StepExecution::new(7, 3, "step");
        step.version = 4;
        step.commit_count = 2;
        step.context.put("numbers.read.count", 6u64);
        let changes = StepExecutionChanges::next_version_of(&step);
        assert_eq!(changes.version, 5);
        assert_eq!(changes.commit_count, 2);
        assert_eq!(changes.context, json!({"numbers.read.count": 6}));
        assert_eq!(changes.status, "STARTING");
    }
}
