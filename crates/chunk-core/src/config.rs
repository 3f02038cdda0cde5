//! Configuración tipada de un job orientado a chunks.
//!
//! Se construye una vez al arrancar el proceso y se pasa explícitamente a los
//! constructores del step, de la fuente y del sumidero.

use std::time::Duration;

use crate::constants::*;
use crate::errors::BatchError;
use crate::step::{CommitPolicy, RetryPolicy, SkipPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Intervalo de commit (items leídos por chunk).
    pub chunk_size: usize,
    pub queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    /// Sólo informativo: se valida y se muestra en el log, pero
    /// `InMemoryBroker` corre en proceso y no abre ninguna conexión de red.
    pub broker_host: String,
    /// Igual que `broker_host`: no se usa para conectar.
    pub broker_port: u16,
    pub receive_timeout: Duration,
    /// Un timeout de recepción sin mensajes termina el stream.
    pub end_on_timeout: bool,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
    pub skip_limit: u64,
    pub commit_policy: CommitPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE,
               queue_name: DEFAULT_QUEUE_NAME.to_string(),
               exchange_name: DEFAULT_EXCHANGE_NAME.to_string(),
               routing_key: String::new(),
               broker_host: DEFAULT_BROKER_HOST.to_string(),
               broker_port: DEFAULT_BROKER_PORT,
               receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
               end_on_timeout: true,
               retry_limit: 0,
               retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
               skip_limit: 0,
               commit_policy: CommitPolicy::Sequenced }
    }
}

impl BatchConfig {
    /// Rechaza valores que impedirían arrancar el step.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::InvalidConfiguration("chunk_size must be >= 1".into()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(BatchError::InvalidConfiguration("queue_name is empty".into()));
        }
        if self.exchange_name.trim().is_empty() {
            return Err(BatchError::InvalidConfiguration("exchange_name is empty".into()));
        }
        if self.broker_host.trim().is_empty() {
            return Err(BatchError::InvalidConfiguration("broker_host is empty".into()));
        }
        if self.broker_port == 0 {
            return Err(BatchError::InvalidConfiguration("broker_port must be > 0".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit, self.retry_backoff)
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        SkipPolicy::new(self.skip_limit)
    }

    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}
