//! `ExecutionContext`: estado durable clave/valor para reinicios.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mapa de claves a valores JSON serializables, adjunto a una ejecución.
///
/// Las fuentes escriben aquí su cursor en cada commit; el motor lo persiste
/// junto con la `StepExecution` para que un reinicio retome tras el último
/// chunk confirmado.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hubo cambios desde el último `clear_dirty`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Reconstruye desde la forma persistida. Un valor que no es objeto
    /// produce un contexto vacío.
    pub fn from_json(value: &Value) -> Self {
        let entries = match value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };
        Self { entries, dirty: false }
    }
}

// La marca `dirty` no forma parte de la igualdad.
impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
