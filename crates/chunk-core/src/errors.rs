//! Errores del core: fallos por item, del ledger y del motor.

use thiserror::Error;

/// Error asociado a un item o al transporte de una fuente/sumidero.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ItemError {
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ItemError {
    /// Errores que la política de skip puede absorber (afectan a un solo item).
    pub fn is_skippable(&self) -> bool {
        matches!(self, ItemError::Deserialization(_) | ItemError::Processing(_))
    }

    /// Errores que deben abortar antes de procesar ningún chunk.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Configuration(_))
    }
}

/// Errores del `JobRepository` (ledger).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RepositoryError {
    #[error("job execution already running for instance {instance_id}")]
    AlreadyRunning { instance_id: i64 },
    #[error("job instance {instance_id} already completed")]
    AlreadyComplete { instance_id: i64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("step execution {id} was modified concurrently (expected version {expected})")]
    VersionConflict { id: i64, expected: u32 },
    #[error("commit aborted by transaction hook: {0}")]
    Hook(ItemError),
    #[error("repository lock poisoned")]
    LockPoisoned,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Error del motor / orquestador.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BatchError {
    #[error(transparent)]
    Item(#[from] ItemError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("step '{step}' could not be opened: {source}")]
    StepConfiguration { step: String, source: ItemError },
    #[error("job execution {0} cannot be restarted")]
    NotRestartable(i64),
    #[error("internal: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skippable_and_fatal_classification() {
        assert!(ItemError::Deserialization("x".into()).is_skippable());
        assert!(ItemError::Processing("x".into()).is_skippable());
        assert!(!ItemError::Transport("x".into()).is_skippable());
        assert!(ItemError::Configuration("x".into()).is_fatal());
        assert!(!ItemError::Transport("x".into()).is_fatal());
    }

    #[test]
    fn repository_error_converts_into_batch_error() {
        let err: BatchError = RepositoryError::AlreadyRunning { instance_id: 7 }.into();
        assert_eq!(err.to_string(), "job execution already running for instance 7");
    }
}
