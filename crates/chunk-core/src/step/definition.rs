use super::StopSignal;
use crate::errors::{BatchError, ItemError};
use crate::model::{ExecutionContext, StepExecution};
use crate::repo::JobRepository;

/// Interfaz neutral de un step, usada por el orquestador.
///
/// Ciclo de vida por ejecución: `open` (antes de crear la StepExecution, con
/// el contexto del último commit si es un reinicio) -> `execute` -> `close`.
pub trait Step: Send {
    /// Identificador estable y único dentro del job.
    fn name(&self) -> &str;

    /// Volver a ejecutar el step aunque ya terminara `Completed` en una
    /// ejecución anterior de la misma instancia.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Abre fuente y sumidero. Un error aquí es de configuración: el job
    /// falla sin crear StepExecution.
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError>;

    /// Ejecuta el step hasta un estado terminal, que queda en
    /// `execution.status`. `Err` sólo indica que no se pudo registrar ese
    /// estado en el ledger.
    fn execute(&mut self,
               execution: &mut StepExecution,
               repository: &dyn JobRepository,
               stop: &StopSignal)
               -> Result<(), BatchError>;

    fn close(&mut self) -> Result<(), ItemError>;
}
