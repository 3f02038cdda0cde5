//! Valores por defecto del motor.
//!
//! Coinciden con el cableado de ejemplo: un item por transacción, cola y
//! exchange de prueba sobre un broker local.

/// Intervalo de commit por defecto (un item por chunk).
pub const DEFAULT_CHUNK_SIZE: usize = 1;

pub const DEFAULT_QUEUE_NAME: &str = "rabbitmq.test.queue";
pub const DEFAULT_EXCHANGE_NAME: &str = "rabbitmq.test.exchange";
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_BROKER_PORT: u16 = 5672;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;

/// Backoff lineal entre reintentos de un mismo chunk (15ms, 30ms, ...).
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 15;
