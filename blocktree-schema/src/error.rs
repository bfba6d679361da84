pub type SchemaResult<T> = Result<T, SchemaValidationError>;

/// A write or a tree shape that the schema forbids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schema validation failed for {flavour}: {message}")]
pub struct SchemaValidationError {
    pub flavour: String,
    pub message: String,
}

impl SchemaValidationError {
    pub fn new(flavour: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            flavour: flavour.into(),
            message: message.into(),
        }
    }
}
