use serde::{Deserialize, Serialize};

/// Estado de una `JobExecution` o `StepExecution`.
///
/// Las transiciones válidas son:
/// - `Starting` -> `Started`
/// - `Started` -> `Completed` | `Failed` | `Stopped`
/// - `Starting` -> `Failed` (fallo de configuración antes de arrancar)
///
/// `Completed`, `Failed` y `Stopped` son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    /// La ejecución sigue en curso (o quedó huérfana tras una caída).
    pub fn is_running(self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_running()
    }

    /// Una ejecución en este estado puede reiniciarse.
    pub fn is_restartable(self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }

    /// Nombre estable usado en el ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STARTING" => Some(BatchStatus::Starting),
            "STARTED" => Some(BatchStatus::Started),
            "COMPLETED" => Some(BatchStatus::Completed),
            "FAILED" => Some(BatchStatus::Failed),
            "STOPPED" => Some(BatchStatus::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
