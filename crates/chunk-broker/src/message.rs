//! Mensajes del broker y conversión item <-> mensaje.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use chunk_core::ItemError;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Mensaje tal como viaja por el broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { id: Uuid::new_v4(),
               content_type: content_type.into(),
               body: body.into() }
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(CONTENT_TYPE_JSON, body)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(CONTENT_TYPE_TEXT, body.into().into_bytes())
    }
}

/// Convierte items en mensajes y viceversa.
pub trait MessageConverter<T>: Send + Sync {
    fn to_message(&self, item: &T) -> Result<Message, ItemError>;

    /// Un error aquí es `ItemError::Deserialization`: afecta sólo a ese
    /// mensaje.
    fn from_message(&self, message: &Message) -> Result<T, ItemError>;
}

/// Conversión JSON.
///
/// Acepta `application/json` y también `text/plain`, cuyo cuerpo se trata
/// como un string JSON (así `T = String` funciona con ambos formatos).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageConverter;

impl<T> MessageConverter<T> for JsonMessageConverter where T: Serialize + DeserializeOwned
{
    fn to_message(&self, item: &T) -> Result<Message, ItemError> {
        let body = serde_json::to_vec(item).map_err(|e| ItemError::Processing(format!("cannot encode item: {e}")))?;
        Ok(Message::json(body))
    }

    fn from_message(&self, message: &Message) -> Result<T, ItemError> {
        match message.content_type.as_str() {
            CONTENT_TYPE_JSON => serde_json::from_slice(&message.body).map_err(|e| {
                                     ItemError::Deserialization(format!("message {}: {e}", message.id))
                                 }),
            CONTENT_TYPE_TEXT => {
                let text = std::str::from_utf8(&message.body).map_err(|e| {
                               ItemError::Deserialization(format!("message {}: body is not utf-8: {e}", message.id))
                           })?;
                serde_json::from_value(Value::String(text.to_string())).map_err(|e| {
                    ItemError::Deserialization(format!("message {}: {e}", message.id))
                })
            }
            other => Err(ItemError::Deserialization(format!("message {}: unsupported content type '{other}'",
                                                            message.id))),
        }
    }
}
