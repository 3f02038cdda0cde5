//! Configuración del proceso.
//! Carga `.env` una sola vez y construye un `BatchConfig` a partir de las
//! variables de entorno; los valores ausentes toman el valor por defecto.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chunk_core::{BatchConfig, CommitPolicy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}: invalid value '{value}' ({reason})")]
    Invalid { name: &'static str, value: String, reason: String },
    #[error("invalid batch configuration: {0}")]
    Rejected(String),
}

/// `BatchConfig` desde el entorno del proceso.
pub fn load_batch_config() -> Result<BatchConfig, ConfigError> {
    chunk_persistence::init_dotenv();
    batch_config_from(|name| env::var(name).ok())
}

/// Igual que `load_batch_config` pero con una fuente de variables explícita.
pub fn batch_config_from<F>(lookup: F) -> Result<BatchConfig, ConfigError>
    where F: Fn(&str) -> Option<String>
{
    let defaults = BatchConfig::default();
    let cfg = BatchConfig { chunk_size: parsed(&lookup, "CHUNK_SIZE")?.unwrap_or(defaults.chunk_size),
                            queue_name: lookup("QUEUE_NAME").unwrap_or(defaults.queue_name),
                            exchange_name: lookup("EXCHANGE_NAME").unwrap_or(defaults.exchange_name),
                            routing_key: lookup("ROUTING_KEY").unwrap_or(defaults.routing_key),
                            broker_host: lookup("BROKER_HOST").unwrap_or(defaults.broker_host),
                            broker_port: parsed(&lookup, "BROKER_PORT")?.unwrap_or(defaults.broker_port),
                            receive_timeout: parsed(&lookup, "RECEIVE_TIMEOUT_MS")?.map(Duration::from_millis)
                                                                                   .unwrap_or(defaults.receive_timeout),
                            end_on_timeout: parsed(&lookup, "END_ON_TIMEOUT")?.unwrap_or(defaults.end_on_timeout),
                            retry_limit: parsed(&lookup, "RETRY_LIMIT")?.unwrap_or(defaults.retry_limit),
                            retry_backoff: parsed(&lookup, "RETRY_BACKOFF_MS")?.map(Duration::from_millis)
                                                                                .unwrap_or(defaults.retry_backoff),
                            skip_limit: parsed(&lookup, "SKIP_LIMIT")?.unwrap_or(defaults.skip_limit),
                            commit_policy: parsed::<CommitPolicy, _>(&lookup, "COMMIT_POLICY")?.unwrap_or(defaults.commit_policy) };
    cfg.validate().map_err(|e| ConfigError::Rejected(e.to_string()))?;
    Ok(cfg)
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
    where T: FromStr,
          T::Err: std::fmt::Display,
          F: Fn(&str) -> Option<String>
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Invalid { name,
                                                                         value: raw.clone(),
                                                                         reason: e.to_string() })
}
