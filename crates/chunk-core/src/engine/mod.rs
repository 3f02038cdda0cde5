//! Orquestación de jobs: definición (`Job`, `JobBuilder`) y ejecución
//! (`JobLauncher`).

pub mod job;
pub mod launcher;

pub use job::{Job, JobBuilder, JobBuilderInit};
pub use launcher::JobLauncher;
