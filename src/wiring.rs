//! Cableado del job de ejemplo.
//!
//! `amqp-config-job` tiene un único step `step`: lee de la cola configurada,
//! no transforma y publica en el exchange configurado, con el intervalo de
//! commit de `BatchConfig` (uno por defecto). El item es un `serde_json::Value`
//! para que cualquier cuerpo JSON o de texto pase sin cambios.

use std::sync::Arc;

use log::info;
use serde_json::Value;

use chunk_broker::{Broker, BrokerError, BrokerTemplate, QueueItemSink, QueueItemSource};
use chunk_core::{BatchConfig, BatchError, BatchStatus, InMemoryJobRepository, Job, JobExecution, JobRepository,
                 RepositoryError, StepBuilder};
use chunk_persistence::{PersistenceError, PgJobRepository};

pub const JOB_NAME: &str = "amqp-config-job";
pub const STEP_NAME: &str = "step";

/// Códigos de salida del proceso.
pub const EXIT_COMPLETED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_STOPPED: i32 = 2;
pub const EXIT_CONFIGURATION: i32 = 3;
pub const EXIT_REJECTED: i32 = 4;
pub const EXIT_INTERNAL: i32 = 5;

/// Declara la cola de entrada y el exchange de salida.
pub fn declare_topology(broker: &Arc<dyn Broker>, config: &BatchConfig) -> Result<(), BrokerError> {
    BrokerTemplate::input(broker.clone(), config).declare_topology()?;
    broker.declare_exchange(&config.exchange_name)
}

pub fn build_job(broker: Arc<dyn Broker>, config: &BatchConfig) -> Result<Job, BatchError> {
    config.validate()?;
    let step = StepBuilder::from_config(STEP_NAME, config).reader(QueueItemSource::<Value>::from_config(broker.clone(),
                                                                                                       config))
                                                          .writer(QueueItemSink::<Value>::from_config(broker, config))
                                                          .build()?;
    Job::builder(JOB_NAME).first_step(step).build()
}

/// Ledger Postgres si hay `DATABASE_URL`; si no, en memoria.
pub fn repository_from_env() -> Result<Arc<dyn JobRepository>, PersistenceError> {
    chunk_persistence::init_dotenv();
    if std::env::var("DATABASE_URL").is_err() {
        info!("DATABASE_URL not set: using the in-memory job repository");
        return Ok(Arc::new(InMemoryJobRepository::new()));
    }
    let pool = chunk_persistence::build_pool_from_env()?;
    info!("using the postgres job repository");
    Ok(Arc::new(PgJobRepository::from_pool(pool)))
}

pub fn exit_code(outcome: &Result<JobExecution, BatchError>) -> i32 {
    match outcome {
        Ok(execution) => match execution.status {
            BatchStatus::Completed => EXIT_COMPLETED,
            BatchStatus::Failed => EXIT_FAILED,
            BatchStatus::Stopped => EXIT_STOPPED,
            BatchStatus::Starting | BatchStatus::Started => EXIT_INTERNAL,
        },
        Err(BatchError::InvalidConfiguration(_) | BatchError::StepConfiguration { .. } | BatchError::Item(_)) => {
            EXIT_CONFIGURATION
        }
        Err(BatchError::NotRestartable(_)
            | BatchError::Repository(RepositoryError::AlreadyRunning { .. } | RepositoryError::AlreadyComplete { .. })) => {
            EXIT_REJECTED
        }
        Err(_) => EXIT_INTERNAL,
    }
}
