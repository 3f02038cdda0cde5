//! Steps: contrato neutral (`Step`), motor de chunks y sus políticas.
//!
//! Un step orientado a chunks lee items uno a uno de un `ItemSource`, los
//! agrupa hasta el intervalo de commit y, por cada chunk, escribe en el
//! `ItemSink` y persiste el progreso en el ledger como una sola unidad.

pub mod builder;
pub mod chunk;
pub mod definition;
pub mod policy;
mod signal;

pub use builder::StepBuilder;
pub use chunk::{ChunkState, ChunkStep};
pub use definition::Step;
pub use policy::{CommitPolicy, RetryPolicy, SkipPolicy};
pub use signal::StopSignal;
