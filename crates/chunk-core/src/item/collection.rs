//! Variantes en memoria de fuente y sumidero.

use std::sync::{Arc, Mutex};

use super::{Chunk, Delivery, DeliveryTag, ItemSink, ItemSource, Read};
use crate::errors::ItemError;
use crate::model::ExecutionContext;

fn read_count_key(name: &str) -> String {
    format!("{name}.read.count")
}

/// Fuente respaldada por un vector.
///
/// Guarda en el contexto `<name>.read.count`: el número de items consumidos
/// hasta el último commit. Al reabrir tras un fallo continúa desde ahí.
#[derive(Debug)]
pub struct VecSource<T> {
    name: String,
    items: Vec<T>,
    cursor: usize,
}

impl<T: Clone> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::with_name("vec_source", items)
    }

    pub fn with_name(name: impl Into<String>, items: Vec<T>) -> Self {
        Self { name: name.into(),
               items,
               cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl<T: Clone + Send> ItemSource<T> for VecSource<T> {
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let restored = context.get_u64(&read_count_key(&self.name)).unwrap_or(0) as usize;
        if restored > self.items.len() {
            return Err(ItemError::Configuration(format!("{}: restart position {restored} beyond {} items",
                                                        self.name,
                                                        self.items.len())));
        }
        self.cursor = restored;
        Ok(())
    }

    fn next(&mut self) -> Result<Read<T>, ItemError> {
        match self.items.get(self.cursor) {
            Some(item) => {
                let tag = DeliveryTag(self.cursor as u64);
                self.cursor += 1;
                Ok(Read::Item(Delivery::new(item.clone(), tag)))
            }
            None => Ok(Read::EndOfStream),
        }
    }

    fn update(&mut self, context: &mut ExecutionContext) {
        context.put(read_count_key(&self.name), self.cursor as u64);
    }
}

/// Fuente generativa: invoca la closure hasta que devuelve `None`.
///
/// Registra cuántos items produjo, pero no puede reposicionarse; un reinicio
/// vuelve a empezar desde la closure recibida.
pub struct FnSource<F> {
    name: String,
    produce: F,
    produced: u64,
}

impl<F> FnSource<F> {
    pub fn new(name: impl Into<String>, produce: F) -> Self {
        Self { name: name.into(),
               produce,
               produced: 0 }
    }
}

impl<T, F> ItemSource<T> for FnSource<F> where F: FnMut() -> Option<T> + Send
{
    fn next(&mut self) -> Result<Read<T>, ItemError> {
        match (self.produce)() {
            Some(item) => {
                let tag = DeliveryTag(self.produced);
                self.produced += 1;
                Ok(Read::Item(Delivery::new(item, tag)))
            }
            None => Ok(Read::EndOfStream),
        }
    }

    fn update(&mut self, context: &mut ExecutionContext) {
        context.put(read_count_key(&self.name), self.produced);
    }
}

/// Vista compartida de lo escrito por un `VecSink`.
#[derive(Debug)]
pub struct SinkHandle<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> Clone for SinkHandle<T> {
    fn clone(&self) -> Self {
        Self { chunks: Arc::clone(&self.chunks) }
    }
}

impl<T: Clone> SinkHandle<T> {
    /// Chunks recibidos, en orden de escritura.
    pub fn chunks(&self) -> Vec<Vec<T>> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Todos los items escritos, aplanados.
    pub fn items(&self) -> Vec<T> {
        self.chunks().into_iter().flatten().collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Sumidero en memoria. Cada `write` añade el chunk completo de forma atómica.
#[derive(Debug)]
pub struct VecSink<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> VecSink<T> {
    pub fn new() -> Self {
        Self { chunks: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn handle(&self) -> SinkHandle<T> {
        SinkHandle { chunks: Arc::clone(&self.chunks) }
    }
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> ItemSink<T> for VecSink<T> {
    fn write(&mut self, chunk: &Chunk<T>) -> Result<(), ItemError> {
        let mut chunks = self.chunks
                             .lock()
                             .map_err(|_| ItemError::Transport("vec sink lock poisoned".into()))?;
        chunks.push(chunk.items().to_vec());
        Ok(())
    }
}
