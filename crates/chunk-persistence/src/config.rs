//! Configuración de conexión desde variables de entorno: `DATABASE_URL` y
//! tamaños opcionales de pool.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::PersistenceError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, PersistenceError> {
        init_dotenv();
        let url = env::var("DATABASE_URL").map_err(|_| PersistenceError::Configuration("DATABASE_URL is not set".into()))?;
        let min_connections = parse_var("DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS)?;
        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        Ok(Self { url,
                  min_connections,
                  max_connections })
    }
}

fn parse_var(name: &str, default: u32) -> Result<u32, PersistenceError> {
    match env::var(name) {
        Ok(raw) => raw.trim()
                      .parse()
                      .map_err(|_| PersistenceError::Configuration(format!("{name}: expected a number, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
