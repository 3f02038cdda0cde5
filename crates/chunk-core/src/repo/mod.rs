//! Ledger de ejecuciones: contrato (`JobRepository`) e implementación en memoria.

mod memory;
mod types;

pub use memory::InMemoryJobRepository;
pub use types::{CommitHook, JobRepository};
