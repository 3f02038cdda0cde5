use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use chunk_core::{BatchConfig, Chunk, ItemError, ItemSink};

use crate::connection::Broker;
use crate::message::{JsonMessageConverter, MessageConverter};
use crate::template::BrokerTemplate;

/// Sumidero que publica cada item en el exchange/routing key de un
/// `BrokerTemplate`, sin esperar confirmación del destino.
///
/// No es atómico por chunk: si falla la publicación del item `k`, los `k`
/// anteriores ya están entregados y un reintento los vuelve a publicar.
pub struct QueueItemSink<T, C = JsonMessageConverter> {
    template: BrokerTemplate,
    converter: C,
    published: u64,
    _item: PhantomData<fn(T)>,
}

impl<T> QueueItemSink<T, JsonMessageConverter> {
    pub fn new(template: BrokerTemplate) -> Self {
        Self { template,
               converter: JsonMessageConverter,
               published: 0,
               _item: PhantomData }
    }

    pub fn from_config(broker: Arc<dyn Broker>, config: &BatchConfig) -> Self {
        Self::new(BrokerTemplate::output(broker, config))
    }
}

impl<T, C> QueueItemSink<T, C> {
    pub fn with_converter<C2: MessageConverter<T>>(self, converter: C2) -> QueueItemSink<T, C2> {
        QueueItemSink { template: self.template,
                        converter,
                        published: self.published,
                        _item: PhantomData }
    }

    /// Mensajes publicados desde la creación (incluye republicaciones).
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl<T, C> ItemSink<T> for QueueItemSink<T, C> where C: MessageConverter<T>
{
    fn open(&mut self) -> Result<(), ItemError> {
        let broker = self.template.broker();
        if !broker.is_open() {
            return Err(ItemError::Configuration("queue sink: broker connection is closed".into()));
        }
        let exchange = self.template.exchange();
        if !broker.exchange_exists(exchange) {
            return Err(ItemError::Configuration(format!("queue sink: exchange '{exchange}' is not declared")));
        }
        Ok(())
    }

    fn write(&mut self, chunk: &Chunk<T>) -> Result<(), ItemError> {
        for (delivered, item) in chunk.iter().enumerate() {
            if let Err(e) = self.template.convert_and_send(item, &self.converter) {
                if delivered > 0 {
                    warn!("queue sink: publish failed after {delivered} of {} items ({e})", chunk.len());
                }
                return Err(e);
            }
            self.published += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::InMemoryBroker;

    #[test]
    fn publishes_each_item_in_order() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_queue("out").unwrap();
        broker.declare_exchange("ex").unwrap();
        broker.bind("out", "ex", "k").unwrap();
        let mut sink = QueueItemSink::new(BrokerTemplate::new(broker.clone()).with_exchange("ex")
                                                                            .with_routing_key("k"));
        sink.open().unwrap();
        sink.write(&Chunk::from(vec![1u32, 2, 3])).unwrap();
        assert_eq!(sink.published(), 3);
        assert_eq!(broker.ready_count("out").unwrap(), 3);
    }

    #[test]
    fn open_fails_fast_for_missing_exchange() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut sink: QueueItemSink<u32> = QueueItemSink::new(BrokerTemplate::new(broker).with_exchange("nope"));
        assert!(matches!(sink.open(), Err(ItemError::Configuration(_))));
    }

    #[test]
    fn closed_broker_fails_the_write_as_transport_error() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_queue("out").unwrap();
        let mut sink = QueueItemSink::new(BrokerTemplate::new(broker.clone()).with_routing_key("out"));
        sink.open().unwrap();
        broker.close();
        let err = sink.write(&Chunk::from(vec!["x".to_string()])).unwrap_err();
        assert!(matches!(err, ItemError::Transport(_)));
        assert_eq!(sink.published(), 0);
    }
}
