//! Implementación Postgres (Diesel) del `JobRepository` del core.
//!
//! - Una transacción `read_write` por operación del ledger.
//! - `update_step_execution_within` valida la versión con un `UPDATE ...
//!   WHERE version = esperada`, ejecuta el hook del chunk dentro de la misma
//!   transacción y sólo confirma si el hook termina bien.
//! - Errores transitorios de conexión/serialización se reintentan con
//!   backoff. En commits con hook sólo se reintenta obtener la conexión:
//!   un hook nunca corre dos veces.

mod rows;

use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};

use chunk_core::{BatchStatus, CommitHook, JobExecution, JobInstance, JobParameters, JobRepository, RepositoryError,
                 StepExecution};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{batch_job_execution, batch_job_instance, batch_step_execution};

pub use rows::{decode_parameters, encode_parameters};
use rows::{InstanceRow, JobExecutionChanges, JobExecutionRow, NewInstanceRow, NewJobExecutionRow,
           NewStepExecutionRow, StepExecutionChanges, StepExecutionRow};

/// Pool r2d2 de conexiones Postgres. Se construye con `build_pool`, que
/// además aplica las migraciones pendientes.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Debe devolver una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Retry con backoff lineal corto (hasta 3 reintentos: 15ms, 30ms, 45ms).
/// Emite `warn!` por intento.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable ledger error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Error dentro de una transacción: de almacenamiento (se puede reintentar)
/// o del propio ledger (revierte y se devuelve tal cual).
#[derive(Debug)]
enum TxError {
    Store(PersistenceError),
    Ledger(RepositoryError),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Store(err.into())
    }
}

impl From<PersistenceError> for TxError {
    fn from(err: PersistenceError) -> Self {
        TxError::Store(err)
    }
}

/// `JobRepository` sobre Postgres.
pub struct PgJobRepository<P: ConnectionProvider> {
    provider: P,
}

impl PgJobRepository<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }
}

impl<P: ConnectionProvider> PgJobRepository<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ejecuta `work` en una transacción `read_write`, reintentando sólo los
    /// errores transitorios de almacenamiento.
    fn in_transaction<T, F>(&self, work: F) -> Result<T, RepositoryError>
        where F: Fn(&mut PgConnection) -> Result<T, TxError>
    {
        let outcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            match conn.build_transaction().read_write().run(|tx| work(tx)) {
                Ok(value) => Ok(Ok(value)),
                Err(TxError::Store(e)) => Err(e),
                Err(TxError::Ledger(e)) => Ok(Err(e)),
            }
        })?;
        outcome
    }

    /// Lectura sin transacción explícita, con reintento.
    fn read<T, F>(&self, query: F) -> Result<T, RepositoryError>
        where F: Fn(&mut PgConnection) -> Result<T, PersistenceError>
    {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            query(&mut conn)
        })?)
    }
}

fn load_instance(conn: &mut PgConnection, instance_id: i64) -> Result<JobInstance, PersistenceError> {
    let row: InstanceRow = batch_job_instance::table.find(instance_id).first(conn)?;
    Ok(row.into())
}

fn load_steps(conn: &mut PgConnection, job_execution_id: i64) -> Result<Vec<StepExecution>, PersistenceError> {
    let rows: Vec<StepExecutionRow> = batch_step_execution::table.filter(batch_step_execution::job_execution_id.eq(job_execution_id))
                                                                 .order(batch_step_execution::id.asc())
                                                                 .load(conn)?;
    rows.into_iter().map(StepExecution::try_from).collect()
}

fn hydrate(conn: &mut PgConnection, row: JobExecutionRow) -> Result<JobExecution, PersistenceError> {
    let instance = load_instance(conn, row.job_instance_id)?;
    let mut execution = row.into_model(instance)?;
    execution.step_executions = load_steps(conn, execution.id)?;
    Ok(execution)
}

fn last_execution_row(conn: &mut PgConnection, instance_id: i64) -> Result<Option<JobExecutionRow>, PersistenceError> {
    Ok(batch_job_execution::table.filter(batch_job_execution::job_instance_id.eq(instance_id))
                                 .order(batch_job_execution::id.desc())
                                 .first(conn)
                                 .optional()?)
}

fn find_instance(conn: &mut PgConnection,
                 job_name: &str,
                 job_key: &str)
                 -> Result<Option<InstanceRow>, PersistenceError> {
    Ok(batch_job_instance::table.filter(batch_job_instance::job_name.eq(job_name))
                                .filter(batch_job_instance::job_key.eq(job_key))
                                .first(conn)
                                .optional()?)
}

/// `UPDATE ... WHERE id AND version = esperada`; sin filas afectadas
/// distingue versión obsoleta de fila inexistente.
fn apply_step_changes(tx: &mut PgConnection,
                      step_id: i64,
                      expected: u32,
                      changes: &StepExecutionChanges<'_>)
                      -> Result<(), TxError> {
    let updated = diesel::update(batch_step_execution::table.find(step_id)
                                                            .filter(batch_step_execution::version.eq(expected as i32)))
                  .set(changes)
                  .execute(tx)?;
    if updated == 0 {
        let known: bool = diesel::select(exists(batch_step_execution::table.find(step_id))).get_result(tx)?;
        return Err(TxError::Ledger(if known {
                                       RepositoryError::VersionConflict { id: step_id,
                                                                          expected }
                                   } else {
                                       RepositoryError::NotFound(format!("step execution {step_id}"))
                                   }));
    }
    Ok(())
}

impl<P: ConnectionProvider> JobRepository for PgJobRepository<P> {
    fn create_job_execution(&self, job_name: &str, params: &JobParameters) -> Result<JobExecution, RepositoryError> {
        let job_key = params.job_key();
        let parameters = encode_parameters(params);
        self.in_transaction(|tx| {
                // La fila de instancia se bloquea para serializar arranques
                // concurrentes de la misma instancia.
                diesel::insert_into(batch_job_instance::table).values(NewInstanceRow { job_name,
                                                                                       job_key: &job_key })
                                                              .on_conflict((batch_job_instance::job_name,
                                                                            batch_job_instance::job_key))
                                                              .do_nothing()
                                                              .execute(tx)?;
                let instance: InstanceRow = batch_job_instance::table.filter(batch_job_instance::job_name.eq(job_name))
                                                                     .filter(batch_job_instance::job_key.eq(&job_key))
                                                                     .for_update()
                                                                     .first(tx)?;
                if let Some(last) = last_execution_row(tx, instance.id)? {
                    let status = BatchStatus::parse(&last.status).ok_or_else(|| {
                                     PersistenceError::CorruptRow(format!("unknown status '{}'", last.status))
                                 })?;
                    if status.is_running() {
                        return Err(TxError::Ledger(RepositoryError::AlreadyRunning { instance_id: instance.id }));
                    }
                    if status == BatchStatus::Completed {
                        return Err(TxError::Ledger(RepositoryError::AlreadyComplete { instance_id: instance.id }));
                    }
                }
                let row: JobExecutionRow =
                    diesel::insert_into(batch_job_execution::table).values(NewJobExecutionRow { job_instance_id:
                                                                                                    instance.id,
                                                                                                parameters: &parameters,
                                                                                                status:
                                                                                                    BatchStatus::Starting.as_str() })
                                                                   .get_result(tx)?;
                debug!("job execution {} created for instance {}", row.id, instance.id);
                Ok(row.into_model(instance.into())?)
            })
    }

    fn update_job_execution(&self, execution: &mut JobExecution) -> Result<(), RepositoryError> {
        let id = execution.id;
        let changes = JobExecutionChanges::next_version_of(execution);
        let updated = self.in_transaction(|tx| {
                              Ok(diesel::update(batch_job_execution::table.find(id)).set(&changes)
                                                                                   .execute(tx)?)
                          })?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("job execution {id}")));
        }
        execution.version += 1;
        Ok(())
    }

    fn create_step_execution(&self,
                             job_execution: &JobExecution,
                             step_name: &str)
                             -> Result<StepExecution, RepositoryError> {
        let job_execution_id = job_execution.id;
        self.in_transaction(|tx| {
                let known: bool =
                    diesel::select(exists(batch_job_execution::table.find(job_execution_id))).get_result(tx)?;
                if !known {
                    return Err(TxError::Ledger(RepositoryError::NotFound(format!("job execution {job_execution_id}"))));
                }
                let row: StepExecutionRow =
                    diesel::insert_into(batch_step_execution::table).values(NewStepExecutionRow { job_execution_id,
                                                                                                  step_name,
                                                                                                  status:
                                                                                                      BatchStatus::Starting.as_str() })
                                                                    .get_result(tx)?;
                Ok(StepExecution::try_from(row)?)
            })
    }

    /// Sin hook la transacción completa se puede repetir, así que se
    /// reintenta igual que el resto de operaciones.
    fn update_step_execution(&self, step: &mut StepExecution) -> Result<(), RepositoryError> {
        let step_id = step.id;
        let expected = step.version;
        let changes = StepExecutionChanges::next_version_of(step);
        self.in_transaction(|tx| apply_step_changes(tx, step_id, expected, &changes))?;
        step.version += 1;
        step.context.clear_dirty();
        Ok(())
    }

    fn update_step_execution_within(&self,
                                    step: &mut StepExecution,
                                    hook: CommitHook<'_>)
                                    -> Result<(), RepositoryError> {
        let step_id = step.id;
        let expected = step.version;
        let changes = StepExecutionChanges::next_version_of(step);
        // Sólo la obtención de la conexión se reintenta.
        let mut conn = with_retry(|| self.provider.connection())?;
        let result = conn.build_transaction().read_write().run(|tx| {
                             apply_step_changes(tx, step_id, expected, &changes)?;
                             hook().map_err(|e| TxError::Ledger(RepositoryError::Hook(e)))
                         });
        match result {
            Ok(()) => {
                step.version += 1;
                step.context.clear_dirty();
                Ok(())
            }
            Err(TxError::Store(e)) => Err(e.into()),
            Err(TxError::Ledger(e)) => Err(e),
        }
    }

    fn find_last_job_execution(&self,
                               job_name: &str,
                               params: &JobParameters)
                               -> Result<Option<JobExecution>, RepositoryError> {
        let job_key = params.job_key();
        self.read(|conn| {
                let Some(instance) = find_instance(conn, job_name, &job_key)? else {
                    return Ok(None);
                };
                match last_execution_row(conn, instance.id)? {
                    Some(row) => Ok(Some(hydrate(conn, row)?)),
                    None => Ok(None),
                }
            })
    }

    fn find_last_step_execution(&self,
                                job_instance_id: i64,
                                step_name: &str)
                                -> Result<Option<StepExecution>, RepositoryError> {
        self.read(|conn| {
                let row: Option<StepExecutionRow> =
                    batch_step_execution::table.inner_join(batch_job_execution::table)
                                               .filter(batch_job_execution::job_instance_id.eq(job_instance_id))
                                               .filter(batch_step_execution::step_name.eq(step_name))
                                               .order(batch_step_execution::id.desc())
                                               .select(batch_step_execution::all_columns)
                                               .first(conn)
                                               .optional()?;
                row.map(StepExecution::try_from).transpose()
            })
    }

    fn find_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>, RepositoryError> {
        self.read(|conn| load_steps(conn, job_execution_id))
    }

    fn get_job_execution(&self, id: i64) -> Result<Option<JobExecution>, RepositoryError> {
        self.read(|conn| {
                let row: Option<JobExecutionRow> = batch_job_execution::table.find(id).first(conn).optional()?;
                match row {
                    Some(row) => Ok(Some(hydrate(conn, row)?)),
                    None => Ok(None),
                }
            })
    }
}

impl<P: ConnectionProvider> std::fmt::Debug for PgJobRepository<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgJobRepository").finish_non_exhaustive()
    }
}

/// Construye un pool r2d2 y aplica las migraciones pendientes.
///
/// Tamaños 0 se elevan a 1; si `min_size > max_size` se usa `max_size`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), using min = max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
