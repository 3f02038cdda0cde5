//! Parámetros de job: pares clave/valor que identifican una `JobInstance`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hashing::hash_value;

/// Parámetros de un job en orden de inserción.
///
/// El orden sólo afecta a la presentación: la identidad (`job_key`) se calcula
/// sobre el JSON canónico, con claves ordenadas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    params: IndexMap<String, String>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade (o reemplaza) un parámetro, estilo builder.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Interpreta `clave=valor`; devuelve `None` si falta el `=` o la clave.
    pub fn parse_pair(raw: &str) -> Option<(String, String)> {
        let (k, v) = raw.split_once('=')?;
        let k = k.trim();
        if k.is_empty() {
            return None;
        }
        Some((k.to_string(), v.trim().to_string()))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.params
                          .iter()
                          .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                          .collect())
    }

    /// Identidad estable de la instancia para un mismo nombre de job.
    pub fn job_key(&self) -> String {
        hash_value(&self.to_json())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = JobParameters::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}
