//! Inicialización de logging del proceso.
//!
//! Los crates de librería emiten con la fachada `log`; el subscriber de
//! `tracing` la recoge (feature `tracing-log`). Filtro por `RUST_LOG`,
//! `info` por defecto.

use tracing_subscriber::EnvFilter;

/// Seguro de llamar varias veces: las siguientes llamadas no hacen nada.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter)
                                     .with_target(true)
                                     .try_init();
}
