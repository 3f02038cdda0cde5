#![allow(dead_code)]

use chunk_persistence::config::DbConfig;
use chunk_persistence::pg::{build_pool, PgPool};
use chunk_persistence::PgJobRepository;
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env().ok()?;
    match build_pool(&cfg.url, 1, 2) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
    where F: FnOnce(&PgPool) -> R
{
    TEST_POOL.as_ref().map(f)
}

/// Repositorio sobre el pool compartido, o `None` si no hay base de datos.
pub fn repository() -> Option<PgJobRepository<chunk_persistence::PoolProvider>> {
    with_pool(|p| PgJobRepository::from_pool(p.clone()))
}

/// Nombre de job único por test: las tablas no se limpian entre ejecuciones.
pub fn unique_job(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}
