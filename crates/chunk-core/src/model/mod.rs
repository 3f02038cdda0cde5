//! Modelo de ejecución: estados, parámetros, contexto y ejecuciones.

pub mod context;
pub mod execution;
pub mod parameters;
pub mod status;

pub use context::ExecutionContext;
pub use execution::{JobExecution, JobInstance, StepExecution};
pub use parameters::JobParameters;
pub use status::BatchStatus;
