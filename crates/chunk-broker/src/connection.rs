//! Conexión con el broker: contrato (`Broker`) e implementación en memoria.
//!
//! Modelo AMQP reducido:
//! - colas con entrega explícita: un mensaje recibido queda pendiente de
//!   confirmación (`ack`) y `requeue` lo devuelve a la cabeza de la cola
//!   marcado como reentregado;
//! - exchanges directos: una publicación llega a cada cola enlazada con la
//!   misma routing key;
//! - el exchange por defecto (`""`) entrega en la cola cuyo nombre es la
//!   routing key.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info};

use crate::error::BrokerError;
use crate::message::Message;

pub const DEFAULT_EXCHANGE: &str = "";

/// Mensaje entregado a un consumidor, pendiente de `ack`/`requeue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub tag: u64,
    pub message: Message,
    pub redelivered: bool,
}

/// Operaciones de transporte que usan fuentes y sumideros de cola.
pub trait Broker: Send + Sync {
    fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError>;

    fn queue_exists(&self, name: &str) -> bool;

    fn exchange_exists(&self, name: &str) -> bool;

    fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<(), BrokerError>;

    /// Espera hasta `timeout` por un mensaje. `Ok(None)` si vence el plazo.
    fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError>;

    fn ack(&self, tag: u64) -> Result<(), BrokerError>;

    fn requeue(&self, tag: u64) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

#[derive(Debug)]
struct Envelope {
    message: Message,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Queue {
    ready: Mutex<VecDeque<Envelope>>,
    available: Condvar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

/// Broker en proceso. Un lock por cola; los receptores bloqueados se
/// despiertan con una `Condvar` al publicar, devolver o cerrar.
#[derive(Debug)]
pub struct InMemoryBroker {
    queues: DashMap<String, Arc<Queue>>,
    exchanges: DashMap<String, Vec<Binding>>,
    unacked: DashMap<u64, (String, Envelope)>,
    next_tag: AtomicU64,
    open: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self { queues: DashMap::new(),
               exchanges: DashMap::new(),
               unacked: DashMap::new(),
               next_tag: AtomicU64::new(1),
               open: AtomicBool::new(true) }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    fn enqueue(&self, queue: &Queue, envelope: Envelope, front: bool) -> Result<(), BrokerError> {
        let mut ready = queue.ready.lock().map_err(|_| BrokerError::LockPoisoned)?;
        if front {
            ready.push_front(envelope);
        } else {
            ready.push_back(envelope);
        }
        queue.available.notify_one();
        Ok(())
    }

    /// Mensajes listos para entregar (sin contar los pendientes de ack).
    pub fn ready_count(&self, queue: &str) -> Result<usize, BrokerError> {
        let q = self.queue(queue)?;
        let ready = q.ready.lock().map_err(|_| BrokerError::LockPoisoned)?;
        Ok(ready.len())
    }

    /// Entregas sin confirmar en todas las colas.
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }
}

impl Broker for InMemoryBroker {
    fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.queues.entry(name.to_string()).or_default();
        debug!("queue '{name}' declared");
        Ok(())
    }

    fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.exchanges.entry(name.to_string()).or_default();
        debug!("exchange '{name}' declared");
        Ok(())
    }

    fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if !self.queue_exists(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let mut bindings = self.exchanges
                               .get_mut(exchange)
                               .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let binding = Binding { queue: queue.to_string(),
                                routing_key: routing_key.to_string() };
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    fn queue_exists(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    fn exchange_exists(&self, name: &str) -> bool {
        name == DEFAULT_EXCHANGE || self.exchanges.contains_key(name)
    }

    fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            vec![routing_key.to_string()]
        } else {
            self.exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
                .iter()
                .filter(|b| b.routing_key == routing_key)
                .map(|b| b.queue.clone())
                .collect()
        };
        if targets.is_empty() {
            debug!("message {} on '{exchange}' with key '{routing_key}' is unroutable", message.id);
        }
        for target in targets {
            let queue = self.queue(&target)?;
            self.enqueue(&queue,
                         Envelope { message: message.clone(),
                                    redelivered: false },
                         false)?;
        }
        Ok(())
    }

    fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        let q = self.queue(queue)?;
        let deadline = Instant::now() + timeout;
        let mut ready = q.ready.lock().map_err(|_| BrokerError::LockPoisoned)?;
        loop {
            if !self.is_open() {
                return Err(BrokerError::Closed);
            }
            if let Some(envelope) = ready.pop_front() {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                let received = ReceivedMessage { tag,
                                                 message: envelope.message.clone(),
                                                 redelivered: envelope.redelivered };
                self.unacked.insert(tag, (queue.to_string(), envelope));
                return Ok(Some(received));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = q.available
                              .wait_timeout(ready, deadline - now)
                              .map_err(|_| BrokerError::LockPoisoned)?;
            ready = guard;
        }
    }

    fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.unacked.remove(&tag).map(|_| ()).ok_or(BrokerError::UnknownDelivery(tag))
    }

    fn requeue(&self, tag: u64) -> Result<(), BrokerError> {
        let (_, (queue_name, mut envelope)) = self.unacked.remove(&tag).ok_or(BrokerError::UnknownDelivery(tag))?;
        envelope.redelivered = true;
        let queue = self.queue(&queue_name)?;
        self.enqueue(&queue, envelope, true)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            info!("in-memory broker closed");
        }
        for entry in self.queues.iter() {
            let queue = entry.value();
            // Bajo el lock de la cola para no perder el aviso.
            let _ready = queue.ready.lock();
            queue.available.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn broker_with_queue(name: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(name).unwrap();
        broker
    }

    fn body(received: &ReceivedMessage) -> &str {
        std::str::from_utf8(&received.message.body).unwrap()
    }

    #[test]
    fn default_exchange_routes_by_queue_name() {
        let broker = broker_with_queue("q");
        broker.publish(DEFAULT_EXCHANGE, "q", Message::text("hi")).unwrap();
        let got = broker.receive("q", Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(body(&got), "hi");
        assert!(!got.redelivered);
    }

    #[test]
    fn direct_exchange_delivers_to_bound_queues_only() {
        let broker = broker_with_queue("a");
        broker.declare_queue("b").unwrap();
        broker.declare_exchange("ex").unwrap();
        broker.bind("a", "ex", "key").unwrap();
        broker.bind("b", "ex", "other").unwrap();
        broker.publish("ex", "key", Message::text("m")).unwrap();
        assert_eq!(broker.ready_count("a").unwrap(), 1);
        assert_eq!(broker.ready_count("b").unwrap(), 0);
        assert_eq!(broker.publish("missing", "key", Message::text("m")),
                   Err(BrokerError::UnknownExchange("missing".into())));
    }

    #[test]
    fn requeue_returns_message_to_head_as_redelivered() {
        let broker = broker_with_queue("q");
        broker.publish("", "q", Message::text("1")).unwrap();
        broker.publish("", "q", Message::text("2")).unwrap();
        let first = broker.receive("q", Duration::ZERO).unwrap().unwrap();
        broker.requeue(first.tag).unwrap();
        let again = broker.receive("q", Duration::ZERO).unwrap().unwrap();
        assert_eq!(body(&again), "1");
        assert!(again.redelivered);
        assert_ne!(again.tag, first.tag);
        broker.ack(again.tag).unwrap();
        assert_eq!(broker.ack(again.tag), Err(BrokerError::UnknownDelivery(again.tag)));
        assert_eq!(broker.unacked_count(), 0);
    }

    #[test]
    fn receive_times_out_and_wakes_on_publish() {
        let broker = Arc::new(broker_with_queue("q"));
        assert!(broker.receive("q", Duration::from_millis(5)).unwrap().is_none());

        let publisher = Arc::clone(&broker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish("", "q", Message::text("late")).unwrap();
        });
        let got = broker.receive("q", Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(body(&got.unwrap()), "late");
    }

    #[test]
    fn closed_broker_rejects_operations() {
        let broker = broker_with_queue("q");
        broker.close();
        assert!(!broker.is_open());
        assert_eq!(broker.receive("q", Duration::ZERO), Err(BrokerError::Closed));
        assert_eq!(broker.declare_queue("x"), Err(BrokerError::Closed));
    }
}
