use std::marker::PhantomData;

use crate::errors::ItemError;

/// Transformación opcional entre lectura y escritura.
///
/// `Ok(None)` filtra el item: se cuenta como leído y filtrado, pero no llega
/// al sumidero.
pub trait ItemProcessor<I, O>: Send {
    fn process(&mut self, item: I) -> Result<Option<O>, ItemError>;
}

/// Procesador identidad (por defecto cuando el step no declara uno).
#[derive(Debug)]
pub struct PassThrough<T>(PhantomData<fn(T) -> T>);

impl<T> PassThrough<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for PassThrough<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ItemProcessor<T, T> for PassThrough<T> {
    fn process(&mut self, item: T) -> Result<Option<T>, ItemError> {
        Ok(Some(item))
    }
}

/// Adaptador de closure a `ItemProcessor`.
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<I, O, F> ItemProcessor<I, O> for FnProcessor<F>
    where F: FnMut(I) -> Result<Option<O>, ItemError> + Send
{
    fn process(&mut self, item: I) -> Result<Option<O>, ItemError> {
        (self.f)(item)
    }
}

impl<I, O, P: ItemProcessor<I, O> + ?Sized> ItemProcessor<I, O> for Box<P> {
    fn process(&mut self, item: I) -> Result<Option<O>, ItemError> {
        (**self).process(item)
    }
}
