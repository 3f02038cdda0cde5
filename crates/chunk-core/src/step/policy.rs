//! Políticas de reintento, skip y commit del motor de chunks.

use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_RETRY_BACKOFF_MS;
use crate::errors::ItemError;

/// Reintentos de un mismo chunk tras un fallo de escritura o de commit.
///
/// `limit` es el número de reintentos además del primer intento. El backoff
/// es lineal: `backoff * intento`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, backoff: Duration) -> Self {
        Self { limit, backoff }
    }

    /// Sin reintentos: el primer fallo termina el step.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn can_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.limit
    }

    /// Espera antes del intento `attempt` (1 = primer reintento).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS))
    }
}

/// Cuántos items ilegibles o rechazados por el procesador se toleran en
/// todo el step antes de fallar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkipPolicy {
    pub limit: u64,
}

impl SkipPolicy {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// `skipped` incluye el item actual.
    pub fn should_skip(&self, error: &ItemError, skipped: u64) -> bool {
        error.is_skippable() && skipped <= self.limit
    }
}

/// Relación entre la entrega al sumidero y el commit del ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Escribir en el sumidero y después confirmar el ledger en su propia
    /// transacción. Un fallo del ledger deja el chunk entregado; el reintento
    /// lo vuelve a entregar (al menos una vez).
    #[default]
    Sequenced,
    /// Escribir en el sumidero dentro de la transacción del ledger: si la
    /// escritura falla el ledger se revierte, y si el ledger falla antes de
    /// la escritura el sumidero no recibe nada.
    BestEffortAtomic,
}

impl CommitPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitPolicy::Sequenced => "sequenced",
            CommitPolicy::BestEffortAtomic => "best-effort-atomic",
        }
    }
}

impl FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequenced" => Ok(CommitPolicy::Sequenced),
            "best-effort-atomic" | "best_effort_atomic" => Ok(CommitPolicy::BestEffortAtomic),
            other => Err(format!("unknown commit policy '{other}'")),
        }
    }
}
