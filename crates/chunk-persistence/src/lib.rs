//! chunk-persistence
//!
//! Ledger de ejecuciones sobre Postgres (Diesel + r2d2) con paridad respecto
//! a `InMemoryJobRepository` del core.
//!
//! Módulos:
//! - `pg`: `PgJobRepository`, pool y proveedor de conexiones.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde `.env`.
//! - `schema`: tablas Diesel del ledger.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_pool, build_pool_from_env, ConnectionProvider, PgJobRepository, PgPool, PoolProvider};
