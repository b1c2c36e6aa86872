// src/data.rs
use crate::broadcast::Registry;
use crate::error::DataError;
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::info;

/// The render context: an arbitrary JSON object.
pub type Context = Map<String, Value>;

/// Holds the one live render context.
///
/// Reads share the lock, replacements take it exclusively, so a render never
/// sees a mix of two payloads. Every successful replacement signals the
/// registry so connected clients re-render.
#[derive(Debug)]
pub struct DataStore {
    context: RwLock<Context>,
    registry: Arc<Registry>,
}

impl DataStore {
    pub fn new(initial: Context, registry: Arc<Registry>) -> Self {
        Self {
            context: RwLock::new(initial),
            registry,
        }
    }

    /// Parses `body` as a JSON object and installs it as the new context.
    ///
    /// On error the previous context is left untouched and nothing is
    /// broadcast.
    pub fn replace_from_slice(&self, body: &[u8]) -> Result<(), DataError> {
        let context = parse_context(body)?;
        self.replace(context);
        Ok(())
    }

    /// Installs `context`, dropping the previous one, and signals a reload.
    pub fn replace(&self, context: Context) {
        {
            let mut current = self
                .context
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *current = context;
        }
        info!("Render context replaced.");
        self.registry.broadcast();
    }

    /// Shared access to the current context. Hold the guard for the whole
    /// render so the template sees a single snapshot.
    pub fn read(&self) -> RwLockReadGuard<'_, Context> {
        self.context.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current context pretty-printed with four-space indentation.
    pub fn pretty(&self) -> String {
        pretty(&self.read())
    }
}

/// Parses raw bytes into a render context, rejecting anything but an object.
pub fn parse_context(body: &[u8]) -> Result<Context, DataError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(DataError::NotAnObject("null")),
        Value::Bool(_) => Err(DataError::NotAnObject("a boolean")),
        Value::Number(_) => Err(DataError::NotAnObject("a number")),
        Value::String(_) => Err(DataError::NotAnObject("a string")),
        Value::Array(_) => Err(DataError::NotAnObject("an array")),
    }
}

pub(crate) fn pretty(context: &Context) -> String {
    use serde::Serialize;

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    // Serializing a Map<String, Value> into memory cannot fail.
    if context.serialize(&mut serializer).is_err() {
        return "{}".to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| "{}".to_string())
}
