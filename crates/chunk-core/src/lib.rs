//! chunk-core: motor de procesamiento por lotes orientado a chunks.
//!
//! Un job es una secuencia de steps; cada step lee items de un `ItemSource`,
//! los procesa y los escribe en un `ItemSink` en chunks de tamaño fijo,
//! registrando el progreso de cada chunk en un `JobRepository` para poder
//! reanudar tras un fallo.
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod hashing;
pub mod item;
pub mod model;
pub mod repo;
pub mod step;

pub use config::BatchConfig;
pub use engine::{Job, JobBuilder, JobLauncher};
pub use errors::{BatchError, ItemError, RepositoryError};
pub use item::{Chunk, Delivery, DeliveryTag, FnProcessor, FnSource, ItemProcessor, ItemSink, ItemSource, PassThrough,
               Read, SinkHandle, VecSink, VecSource};
pub use model::{BatchStatus, ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution};
pub use repo::{CommitHook, InMemoryJobRepository, JobRepository};
pub use step::{ChunkState, ChunkStep, CommitPolicy, RetryPolicy, SkipPolicy, Step, StepBuilder, StopSignal};
