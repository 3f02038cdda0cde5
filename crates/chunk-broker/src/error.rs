use chunk_core::ItemError;
use thiserror::Error;

/// Errores del transporte de mensajes.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BrokerError {
    #[error("broker connection is closed")]
    Closed,
    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),
    #[error("exchange '{0}' is not declared")]
    UnknownExchange(String),
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
    #[error("broker state lock poisoned")]
    LockPoisoned,
}

impl BrokerError {
    /// Topología ausente: no se resuelve reintentando.
    pub fn is_topology(&self) -> bool {
        matches!(self, BrokerError::UnknownQueue(_) | BrokerError::UnknownExchange(_))
    }
}

impl From<BrokerError> for ItemError {
    fn from(e: BrokerError) -> Self {
        if e.is_topology() {
            ItemError::Configuration(e.to_string())
        } else {
            ItemError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_topology_maps_to_configuration() {
        assert!(matches!(ItemError::from(BrokerError::UnknownQueue("q".into())),
                         ItemError::Configuration(_)));
        assert!(matches!(ItemError::from(BrokerError::Closed), ItemError::Transport(_)));
    }
}
