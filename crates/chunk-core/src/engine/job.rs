//! Definición de un job: secuencia ordenada de steps.

use std::collections::HashSet;

use crate::errors::BatchError;
use crate::step::{Step, StopSignal};

/// Job ejecutable por el `JobLauncher`.
pub struct Job {
    name: String,
    steps: Vec<Box<dyn Step>>,
    restartable: bool,
    stop: StopSignal,
}

impl Job {
    /// Punto de entrada del builder: hay que declarar al menos un step.
    pub fn builder(name: impl Into<String>) -> JobBuilderInit {
        JobBuilderInit { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Handle para pedir la parada desde otro hilo.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut [Box<dyn Step>], &StopSignal) {
        (&mut self.steps, &self.stop)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
         .field("name", &self.name)
         .field("steps", &self.step_names())
         .field("restartable", &self.restartable)
         .finish()
    }
}

#[derive(Debug)]
pub struct JobBuilderInit {
    name: String,
}

impl JobBuilderInit {
    pub fn first_step<S: Step + 'static>(self, step: S) -> JobBuilder {
        JobBuilder { name: self.name,
                     steps: vec![Box::new(step)],
                     restartable: true,
                     stop: StopSignal::new() }
    }
}

pub struct JobBuilder {
    name: String,
    steps: Vec<Box<dyn Step>>,
    restartable: bool,
    stop: StopSignal,
}

impl JobBuilder {
    pub fn add_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Una ejecución fallida o detenida no podrá reanudarse.
    pub fn prevent_restart(mut self) -> Self {
        self.restartable = false;
        self
    }

    /// Comparte una señal de parada existente (p.ej. la de un manejador de
    /// señales del proceso) en lugar de crear una propia.
    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Valida nombre del job y unicidad de los nombres de step (son la clave
    /// con la que se busca la última ejecución de cada step al reiniciar).
    pub fn build(self) -> Result<Job, BatchError> {
        if self.name.trim().is_empty() {
            return Err(BatchError::InvalidConfiguration("job name is empty".into()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name().to_string()) {
                return Err(BatchError::InvalidConfiguration(format!("job '{}': duplicated step name '{}'",
                                                                    self.name,
                                                                    step.name())));
            }
        }
        Ok(Job { name: self.name,
                 steps: self.steps,
                 restartable: self.restartable,
                 stop: self.stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{VecSink, VecSource};
    use crate::step::StepBuilder;

    fn step(name: &str) -> impl Step {
        StepBuilder::new(name).reader(VecSource::new(vec![1u32]))
                              .writer(VecSink::<u32>::new())
                              .build()
                              .unwrap()
    }

    #[test]
    fn builds_ordered_steps() {
        let job = Job::builder("job").first_step(step("a")).add_step(step("b")).build().unwrap();
        assert_eq!(job.step_names(), vec!["a", "b"]);
        assert!(job.is_restartable());
    }

    #[test]
    fn duplicated_step_names_are_rejected() {
        let err = Job::builder("job").first_step(step("a")).add_step(step("a")).build().unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfiguration(_)));
    }

    #[test]
    fn stop_signal_is_shared() {
        let job = Job::builder("job").first_step(step("a")).prevent_restart().build().unwrap();
        assert!(!job.is_restartable());
        job.stop_signal().request();
        assert!(job.stop.is_requested());
    }
}
