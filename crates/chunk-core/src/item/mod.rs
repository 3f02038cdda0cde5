//! Contratos de lectura, procesamiento y escritura de items.
//!
//! - `ItemSource`: productor pull, un item por llamada a `next`.
//! - `ItemProcessor`: transformación/filtrado opcional por item.
//! - `ItemSink`: recibe un chunk completo como unidad de entrega.
//!
//! Las fuentes entregan cada item con un `DeliveryTag`; el motor confirma
//! (`acknowledge`) los tags sólo cuando el chunk que los contiene hace commit
//! y los devuelve (`requeue`) si el step aborta.

mod chunk;
pub mod collection;
pub mod processor;

pub use chunk::Chunk;
pub use collection::{FnSource, SinkHandle, VecSink, VecSource};
pub use processor::{FnProcessor, ItemProcessor, PassThrough};

use crate::errors::ItemError;
use crate::model::ExecutionContext;

/// Handle de una entrega individual, usado para confirmar o devolver el item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

/// Item recibido junto con su handle de entrega.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub item: T,
    pub tag: DeliveryTag,
    /// El transporte ya lo había entregado antes sin confirmación.
    pub redelivered: bool,
}

impl<T> Delivery<T> {
    pub fn new(item: T, tag: DeliveryTag) -> Self {
        Self { item,
               tag,
               redelivered: false }
    }
}

/// Resultado de una llamada a `ItemSource::next`.
#[derive(Debug, Clone, PartialEq)]
pub enum Read<T> {
    Item(Delivery<T>),
    /// Entrega recibida que no pudo convertirse en item (no fatal).
    Unreadable { tag: Option<DeliveryTag>, error: ItemError },
    /// No hay trabajo por ahora; se puede seguir sondeando.
    Empty,
    EndOfStream,
}

/// Productor pull de items.
///
/// Se invoca desde un único hilo lógico por step, sin solapamiento.
pub trait ItemSource<T>: Send {
    /// Prepara la fuente, restaurando su posición desde el contexto persistido.
    fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    fn next(&mut self) -> Result<Read<T>, ItemError>;

    /// Escribe en el contexto el estado necesario para reanudar. Se llama
    /// justo antes de persistir cada chunk.
    fn update(&mut self, _context: &mut ExecutionContext) {}

    /// Confirma entregas de un chunk ya comprometido.
    fn acknowledge(&mut self, _tags: &[DeliveryTag]) -> Result<(), ItemError> {
        Ok(())
    }

    /// Devuelve entregas no comprometidas al origen.
    fn requeue(&mut self, _tags: &[DeliveryTag]) -> Result<(), ItemError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Consumidor de chunks.
///
/// `write` trata el chunk como una unidad: o todos los items se entregan al
/// transporte antes de devolver `Ok`, o la llamada falla. Cada variante
/// documenta si un fallo puede dejar entregado un prefijo.
pub trait ItemSink<T>: Send {
    fn open(&mut self) -> Result<(), ItemError> {
        Ok(())
    }

    fn write(&mut self, chunk: &Chunk<T>) -> Result<(), ItemError>;

    fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

impl<T, S: ItemSource<T> + ?Sized> ItemSource<T> for Box<S> {
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        (**self).open(context)
    }
    fn next(&mut self) -> Result<Read<T>, ItemError> {
        (**self).next()
    }
    fn update(&mut self, context: &mut ExecutionContext) {
        (**self).update(context)
    }
    fn acknowledge(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        (**self).acknowledge(tags)
    }
    fn requeue(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        (**self).requeue(tags)
    }
    fn close(&mut self) -> Result<(), ItemError> {
        (**self).close()
    }
}

impl<T, S: ItemSink<T> + ?Sized> ItemSink<T> for Box<S> {
    fn open(&mut self) -> Result<(), ItemError> {
        (**self).open()
    }
    fn write(&mut self, chunk: &Chunk<T>) -> Result<(), ItemError> {
        (**self).write(chunk)
    }
    fn close(&mut self) -> Result<(), ItemError> {
        (**self).close()
    }
}
