use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// Custom prop validation for a flavour, beyond per-field type checks.
///
/// Return `Err(message)` to reject the write; the store turns it into a
/// [`SchemaValidationError`](crate::SchemaValidationError) and applies
/// nothing.
pub trait PropsValidator: Send + Sync {
    fn validate(&self, props: &Map<String, Value>) -> Result<(), String>;
}

impl<F> PropsValidator for F
where
    F: Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, props: &Map<String, Value>) -> Result<(), String> {
        self(props)
    }
}

/// Validates a prop map by deserializing it into a typed struct `P`.
pub struct TypedProps<P> {
    _marker: PhantomData<fn() -> P>,
}

impl<P> TypedProps<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<P> Default for TypedProps<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DeserializeOwned> PropsValidator for TypedProps<P> {
    fn validate(&self, props: &Map<String, Value>) -> Result<(), String> {
        serde_json::from_value::<P>(Value::Object(props.clone()))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
