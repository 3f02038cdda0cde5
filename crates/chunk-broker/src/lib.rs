//! chunk-broker: transporte de colas para fuentes y sumideros de chunk-core.
//!
//! `Broker` abstrae la conexión (colas, exchanges directos, entrega con
//! ack/requeue explícitos); `InMemoryBroker` es la implementación en
//! proceso. `QueueItemSource` y `QueueItemSink` adaptan una `BrokerTemplate`
//! a los contratos `ItemSource` / `ItemSink`.
pub mod connection;
pub mod error;
pub mod message;
pub mod reader;
pub mod template;
pub mod writer;

pub use connection::{Broker, InMemoryBroker, ReceivedMessage, DEFAULT_EXCHANGE};
pub use error::BrokerError;
pub use message::{JsonMessageConverter, Message, MessageConverter};
pub use reader::QueueItemSource;
pub use template::BrokerTemplate;
pub use writer::QueueItemSink;
