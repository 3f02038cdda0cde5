//! chunkflow
//!
//! Aplicación de ejemplo sobre los crates del workspace:
//! - `config`: `BatchConfig` desde variables de entorno (.env).
//! - `logging`: subscriber de `tracing` que también recoge los `log!` de los
//!   crates de librería.
//! - `wiring`: el job `amqp-config-job` (cola -> exchange, un item por
//!   chunk) y el mapeo de estados a códigos de salida.

pub mod config;
pub mod logging;
pub mod wiring;

pub use config::{load_batch_config, ConfigError};
pub use wiring::{build_job, exit_code, JOB_NAME, STEP_NAME};
