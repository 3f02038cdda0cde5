//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y de ahí a
//! `RepositoryError` del core.

use chunk_core::RepositoryError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("corrupt ledger row: {0}")]
    CorruptRow(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl PersistenceError {
    /// Errores transitorios: conviene reintentar con backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => true,
            // Algunos drivers sólo informan texto; best-effort sin SQLSTATE.
            PersistenceError::Unknown(msg) => {
                let m = msg.to_lowercase();
                m.contains("deadlock detected")
                || m.contains("could not serialize access")
                || m.contains("terminating connection")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {other:?}: {}", info.message())),
            },
            DieselError::DeserializationError(e) => Self::CorruptRow(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error,
                                                 commit_error, } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<PersistenceError> for RepositoryError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => RepositoryError::NotFound("ledger row".into()),
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(PersistenceError::SerializationConflict.is_retryable());
        assert!(PersistenceError::TransientIo("pool".into()).is_retryable());
        assert!(PersistenceError::Unknown("Deadlock detected".into()).is_retryable());
        assert!(!PersistenceError::CheckViolation("status".into()).is_retryable());
    }

    #[test]
    fn maps_into_repository_errors() {
        assert!(matches!(RepositoryError::from(PersistenceError::NotFound), RepositoryError::NotFound(_)));
        assert!(matches!(RepositoryError::from(PersistenceError::TransientIo("x".into())),
                         RepositoryError::Storage(_)));
        assert_eq!(DieselError::NotFound.to_string(), "Record not found");
        assert!(matches!(PersistenceError::from(DieselError::NotFound), PersistenceError::NotFound));
    }
}
