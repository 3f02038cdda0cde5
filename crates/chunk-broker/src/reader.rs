use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};

use chunk_core::{BatchConfig, Delivery, DeliveryTag, ExecutionContext, ItemError, ItemSource, Read};

use crate::connection::Broker;
use crate::message::{JsonMessageConverter, MessageConverter};
use crate::template::BrokerTemplate;

/// Fuente que consume la cola por defecto de un `BrokerTemplate`.
///
/// Cada mensaje recibido queda pendiente en el broker hasta que el motor lo
/// confirma (`acknowledge`, tras el commit del chunk) o lo devuelve
/// (`requeue`, al abortar el step). Un cuerpo que no se puede convertir se
/// entrega como `Read::Unreadable` con su tag, de modo que el commit del
/// chunk también lo descarta.
///
/// La posición no se guarda: tras un reinicio la cola vuelve a entregar lo
/// que no se confirmó. `<name>.read.count` sólo acumula lo recibido.
pub struct QueueItemSource<T, C = JsonMessageConverter> {
    name: String,
    template: BrokerTemplate,
    converter: C,
    end_on_timeout: bool,
    received: u64,
    _item: PhantomData<fn() -> T>,
}

impl<T> QueueItemSource<T, JsonMessageConverter> {
    pub fn new(template: BrokerTemplate) -> Self {
        Self { name: "queue_source".to_string(),
               template,
               converter: JsonMessageConverter,
               end_on_timeout: true,
               received: 0,
               _item: PhantomData }
    }

    pub fn from_config(broker: Arc<dyn Broker>, config: &BatchConfig) -> Self {
        Self::new(BrokerTemplate::input(broker, config)).end_on_timeout(config.end_on_timeout)
    }
}

impl<T, C> QueueItemSource<T, C> {
    pub fn with_converter<C2: MessageConverter<T>>(self, converter: C2) -> QueueItemSource<T, C2> {
        QueueItemSource { name: self.name,
                          template: self.template,
                          converter,
                          end_on_timeout: self.end_on_timeout,
                          received: self.received,
                          _item: PhantomData }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `true`: un timeout sin mensajes termina el stream. `false`: se
    /// informa `Read::Empty` y el motor sigue sondeando.
    pub fn end_on_timeout(mut self, end: bool) -> Self {
        self.end_on_timeout = end;
        self
    }

    pub fn template(&self) -> &BrokerTemplate {
        &self.template
    }

    fn read_count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }
}

impl<T, C> ItemSource<T> for QueueItemSource<T, C> where C: MessageConverter<T>
{
    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let broker = self.template.broker();
        if !broker.is_open() {
            return Err(ItemError::Configuration(format!("{}: broker connection is closed", self.name)));
        }
        let queue = self.template
                        .queue()
                        .ok_or_else(|| ItemError::Configuration(format!("{}: no receive queue configured", self.name)))?;
        if !broker.queue_exists(queue) {
            return Err(ItemError::Configuration(format!("{}: queue '{queue}' is not declared", self.name)));
        }
        self.received = context.get_u64(&self.read_count_key()).unwrap_or(0);
        debug!("{} opened on queue '{queue}'", self.name);
        Ok(())
    }

    fn next(&mut self) -> Result<Read<T>, ItemError> {
        let Some(received) = self.template.receive()? else {
            return Ok(if self.end_on_timeout { Read::EndOfStream } else { Read::Empty });
        };
        self.received += 1;
        let tag = DeliveryTag(received.tag);
        match self.converter.from_message(&received.message) {
            Ok(item) => Ok(Read::Item(Delivery { item,
                                                 tag,
                                                 redelivered: received.redelivered })),
            Err(error) => {
                warn!("{}: message {} could not be converted: {error}", self.name, received.message.id);
                Ok(Read::Unreadable { tag: Some(tag),
                                      error })
            }
        }
    }

    fn update(&mut self, context: &mut ExecutionContext) {
        context.put(self.read_count_key(), self.received);
    }

    fn acknowledge(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        for tag in tags {
            self.template.ack(tag.0)?;
        }
        Ok(())
    }

    /// En orden inverso para que la cola conserve el orden original.
    fn requeue(&mut self, tags: &[DeliveryTag]) -> Result<(), ItemError> {
        for tag in tags.iter().rev() {
            self.template.requeue(tag.0)?;
        }
        debug!("{}: {} deliveries requeued", self.name, tags.len());
        Ok(())
    }
}
