//! Fachada sobre un `Broker` con destino y origen por defecto.
//!
//! Una misma conexión (`Arc<dyn Broker>`) puede compartirse entre la
//! plantilla de entrada (cola por defecto) y la de salida (exchange +
//! routing key por defecto).

use std::sync::Arc;
use std::time::Duration;

use chunk_core::constants::DEFAULT_RECEIVE_TIMEOUT_MS;
use chunk_core::{BatchConfig, ItemError};

use crate::connection::{Broker, ReceivedMessage, DEFAULT_EXCHANGE};
use crate::error::BrokerError;
use crate::message::{Message, MessageConverter};

#[derive(Clone)]
pub struct BrokerTemplate {
    broker: Arc<dyn Broker>,
    exchange: String,
    routing_key: String,
    queue: Option<String>,
    receive_timeout: Duration,
}

impl BrokerTemplate {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker,
               exchange: DEFAULT_EXCHANGE.to_string(),
               routing_key: String::new(),
               queue: None,
               receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS) }
    }

    /// Plantilla de entrada: recibe de `config.queue_name`.
    pub fn input(broker: Arc<dyn Broker>, config: &BatchConfig) -> Self {
        Self::new(broker).with_queue(config.queue_name.clone())
                         .with_receive_timeout(config.receive_timeout)
    }

    /// Plantilla de salida: publica en `config.exchange_name` con
    /// `config.routing_key`.
    pub fn output(broker: Arc<dyn Broker>, config: &BatchConfig) -> Self {
        Self::new(broker).with_exchange(config.exchange_name.clone())
                         .with_routing_key(config.routing_key.clone())
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    fn default_queue(&self) -> Result<&str, BrokerError> {
        self.queue().ok_or_else(|| BrokerError::UnknownQueue("<no default receive queue>".into()))
    }

    pub fn send(&self, message: Message) -> Result<(), BrokerError> {
        self.broker.publish(&self.exchange, &self.routing_key, message)
    }

    pub fn convert_and_send<T, C>(&self, item: &T, converter: &C) -> Result<(), ItemError>
        where C: MessageConverter<T> + ?Sized
    {
        let message = converter.to_message(item)?;
        Ok(self.send(message)?)
    }

    /// Recibe de la cola por defecto esperando como mucho `receive_timeout`.
    /// El mensaje queda pendiente de `ack`/`requeue`.
    pub fn receive(&self) -> Result<Option<ReceivedMessage>, BrokerError> {
        let queue = self.default_queue()?;
        self.broker.receive(queue, self.receive_timeout)
    }

    /// Recibe, confirma y convierte. Sin semántica de reentrega: pensado
    /// para inspeccionar colas de salida.
    pub fn receive_and_convert<T, C>(&self, converter: &C) -> Result<Option<T>, ItemError>
        where C: MessageConverter<T> + ?Sized
    {
        let Some(received) = self.receive()? else {
            return Ok(None);
        };
        self.broker.ack(received.tag)?;
        converter.from_message(&received.message).map(Some)
    }

    pub fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.broker.ack(tag)
    }

    pub fn requeue(&self, tag: u64) -> Result<(), BrokerError> {
        self.broker.requeue(tag)
    }

    /// Declara la cola por defecto y, si no es el exchange por defecto, el
    /// exchange y su enlace con la cola.
    pub fn declare_topology(&self) -> Result<(), BrokerError> {
        if let Some(queue) = self.queue() {
            self.broker.declare_queue(queue)?;
        }
        if self.exchange != DEFAULT_EXCHANGE {
            self.broker.declare_exchange(&self.exchange)?;
            if let Some(queue) = self.queue() {
                self.broker.bind(queue, &self.exchange, &self.routing_key)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BrokerTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerTemplate")
         .field("exchange", &self.exchange)
         .field("routing_key", &self.routing_key)
         .field("queue", &self.queue)
         .field("receive_timeout", &self.receive_timeout)
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::InMemoryBroker;
    use crate::message::JsonMessageConverter;

    #[test]
    fn output_and_input_templates_share_the_connection() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let config = BatchConfig { receive_timeout: Duration::from_millis(5),
                                   ..BatchConfig::default() };
        let input = BrokerTemplate::input(broker.clone(), &config);
        let output = BrokerTemplate::output(broker.clone(), &config);
        // La cola de entrada enlazada al exchange de salida.
        input.clone()
             .with_exchange(config.exchange_name.clone())
             .declare_topology()
             .unwrap();

        output.convert_and_send(&"ping".to_string(), &JsonMessageConverter).unwrap();
        let got: Option<String> = input.receive_and_convert(&JsonMessageConverter).unwrap();
        assert_eq!(got.as_deref(), Some("ping"));
        assert_eq!(input.receive_and_convert::<String, _>(&JsonMessageConverter).unwrap(), None);
    }

    #[test]
    fn receive_without_default_queue_is_an_error() {
        let template = BrokerTemplate::new(Arc::new(InMemoryBroker::new()));
        assert!(matches!(template.receive(), Err(BrokerError::UnknownQueue(_))));
    }
}
